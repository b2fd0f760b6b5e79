use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::MappingError;

// ---------------------------------------------------------------------------
// Engine settings
// ---------------------------------------------------------------------------

/// Tunables for every component. All fields default, so an empty TOML
/// document is a valid config.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub hierarchy: HierarchyConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Exact/fuzzy overlap ratio a discovery candidate must exceed.
    pub discovery_threshold: f64,
    /// Minimum confidence for `find_relationships`.
    pub confidence_threshold: f64,
    /// Distinct values per column before overlap is estimated from a sample.
    pub max_unique_values: usize,
    /// Source values compared during fuzzy discovery.
    pub fuzzy_sample_size: usize,
    /// Matched values echoed back per candidate.
    pub sample_matches: usize,
    pub sampling_seed: u64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            discovery_threshold: 0.7,
            confidence_threshold: 0.7,
            max_unique_values: 10_000,
            fuzzy_sample_size: 100,
            sample_matches: 5,
            sampling_seed: 0,
        }
    }
}

impl MatcherConfig {
    /// Per-value fuzzy score (0–100) required during discovery.
    pub fn fuzzy_score_threshold(&self) -> f64 {
        self.discovery_threshold * 100.0
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    /// Depth cap for structural depth queries.
    pub depth_cap: usize,
    /// Depth cap for rollup traversal.
    pub rollup_depth_cap: usize,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            depth_cap: 20,
            rollup_depth_cap: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Fuzzy score (0–100) a label needs to borrow a mapping key's group.
    pub fuzzy_accept: f64,
    /// Distinct unmapped labels kept for diagnostics.
    pub unmapped_sample_cap: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            fuzzy_accept: 80.0,
            unmapped_sample_cap: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    SumEquals,
    DifferenceEquals,
    GroupsBalance,
    RatioInRange,
}

impl std::fmt::Display for RuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SumEquals => write!(f, "sum_equals"),
            Self::DifferenceEquals => write!(f, "difference_equals"),
            Self::GroupsBalance => write!(f, "groups_balance"),
            Self::RatioInRange => write!(f, "ratio_in_range"),
        }
    }
}

/// One algebraic check over group totals.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidationRule {
    pub rule_type: RuleType,
    #[serde(default)]
    pub left_groups: Vec<String>,
    #[serde(default)]
    pub right_groups: Vec<String>,
    #[serde(default)]
    pub expected: Option<f64>,
    #[serde(default)]
    pub min_ratio: Option<f64>,
    #[serde(default)]
    pub max_ratio: Option<f64>,
    /// Absolute tolerance, in currency units.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Fold group names onto `Asset`, `Liability` and `Equity` by keyword
    /// before summing.
    #[serde(default)]
    pub normalize_groups: bool,
}

fn default_tolerance() -> f64 {
    0.01
}

impl ValidationRule {
    pub fn new(rule_type: RuleType, left: &[&str], right: &[&str]) -> Self {
        Self {
            rule_type,
            left_groups: left.iter().map(|s| s.to_string()).collect(),
            right_groups: right.iter().map(|s| s.to_string()).collect(),
            expected: None,
            min_ratio: None,
            max_ratio: None,
            tolerance: default_tolerance(),
            normalize_groups: false,
        }
    }

    /// `Asset = Liability + Equity`, with group names normalized.
    pub fn balance_sheet() -> Self {
        Self {
            normalize_groups: true,
            ..Self::new(RuleType::SumEquals, &["Asset"], &["Liability", "Equity"])
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_expected(mut self, expected: f64) -> Self {
        self.expected = Some(expected);
        self
    }

    pub fn with_ratio_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_ratio = min;
        self.max_ratio = max;
        self
    }

    pub fn validate(&self) -> Result<(), MappingError> {
        if !(self.tolerance >= 0.0) {
            return Err(MappingError::ConfigValidation(format!(
                "{}: tolerance must be >= 0, got {}",
                self.rule_type, self.tolerance
            )));
        }

        let needs_sides = matches!(
            self.rule_type,
            RuleType::SumEquals | RuleType::DifferenceEquals | RuleType::RatioInRange
        );
        if needs_sides && (self.left_groups.is_empty() || self.right_groups.is_empty()) {
            return Err(MappingError::ConfigValidation(format!(
                "{} requires both left_groups and right_groups",
                self.rule_type
            )));
        }

        if self.rule_type == RuleType::DifferenceEquals && self.expected.is_none() {
            return Err(MappingError::ConfigValidation(
                "difference_equals requires an expected value".into(),
            ));
        }

        if let (Some(min), Some(max)) = (self.min_ratio, self.max_ratio) {
            if min > max {
                return Err(MappingError::ConfigValidation(format!(
                    "ratio_in_range: min_ratio {min} exceeds max_ratio {max}"
                )));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Validation job (file-driven)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationJob {
    pub name: String,
    pub source: SourceSpec,
    #[serde(default)]
    pub mapping: Option<MappingSpec>,
    pub rules: Vec<ValidationRule>,
    #[serde(default)]
    pub settings: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSpec {
    pub file: String,
    pub label_column: String,
    pub amount_column: String,
    /// column -> value; only matching rows are classified.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MappingSpec {
    pub file: String,
    /// Mapping column matching the source labels. Auto-detected when absent.
    #[serde(default)]
    pub key_column: Option<String>,
    /// Mapping column naming the target group. Auto-detected when absent.
    #[serde(default)]
    pub group_column: Option<String>,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl EngineConfig {
    pub fn from_toml(input: &str) -> Result<Self, MappingError> {
        let config: EngineConfig =
            toml::from_str(input).map_err(|e| MappingError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MappingError> {
        let m = &self.matcher;
        for (name, value) in [
            ("matcher.discovery_threshold", m.discovery_threshold),
            ("matcher.confidence_threshold", m.confidence_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(MappingError::ConfigValidation(format!(
                    "{name} must be in (0, 1], got {value}"
                )));
            }
        }

        for (name, value) in [
            ("matcher.max_unique_values", m.max_unique_values),
            ("matcher.fuzzy_sample_size", m.fuzzy_sample_size),
            ("hierarchy.depth_cap", self.hierarchy.depth_cap),
            ("hierarchy.rollup_depth_cap", self.hierarchy.rollup_depth_cap),
        ] {
            if value == 0 {
                return Err(MappingError::ConfigValidation(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        let accept = self.validator.fuzzy_accept;
        if !(0.0..=100.0).contains(&accept) {
            return Err(MappingError::ConfigValidation(format!(
                "validator.fuzzy_accept must be in [0, 100], got {accept}"
            )));
        }

        Ok(())
    }
}

impl ValidationJob {
    pub fn from_toml(input: &str) -> Result<Self, MappingError> {
        let job: ValidationJob =
            toml::from_str(input).map_err(|e| MappingError::ConfigParse(e.to_string()))?;
        job.validate()?;
        Ok(job)
    }

    pub fn validate(&self) -> Result<(), MappingError> {
        if self.rules.is_empty() {
            return Err(MappingError::ConfigValidation(
                "at least one [[rules]] entry is required".into(),
            ));
        }
        for (i, rule) in self.rules.iter().enumerate() {
            rule.validate().map_err(|e| match e {
                MappingError::ConfigValidation(msg) => {
                    MappingError::ConfigValidation(format!("rules[{i}]: {msg}"))
                }
                other => other,
            })?;
        }
        self.settings.validate()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
