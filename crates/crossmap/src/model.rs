use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::RuleType;
use crate::error::MappingError;
use crate::hierarchy::HierarchyPattern;

/// Reserved group absorbing amounts that could not be classified.
pub const UNMAPPED: &str = "_unmapped_";

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Result record of every public operation.
///
/// Serializes as `{"success": true, ...body}` or
/// `{"success": false, "error": "..."}`.
#[derive(Debug, Clone, Serialize)]
pub struct Report<T> {
    pub success: bool,
    #[serde(flatten)]
    pub body: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Report<T> {
    pub fn ok(body: T) -> Self {
        Self {
            success: true,
            body: Some(body),
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            body: None,
            error: Some(message.into()),
        }
    }

    pub fn from_result(result: Result<T, MappingError>) -> Self {
        match result {
            Ok(body) => Self::ok(body),
            Err(e) => {
                log::error!("{e}");
                Self::failure(e.to_string())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Fuzzy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelationshipType {
    #[serde(rename = "1:1")]
    OneToOne,
    #[serde(rename = "1:N")]
    OneToMany,
    #[serde(rename = "N:1")]
    ManyToOne,
    #[serde(rename = "N:N")]
    ManyToMany,
    #[serde(rename = "unknown")]
    Unknown,
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OneToOne => write!(f, "1:1"),
            Self::OneToMany => write!(f, "1:N"),
            Self::ManyToOne => write!(f, "N:1"),
            Self::ManyToMany => write!(f, "N:N"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleMatch {
    pub source_value: String,
    pub target_value: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MatchCandidate {
    pub source_table: String,
    pub source_column: String,
    pub target_table: String,
    pub target_column: String,
    pub match_type: MatchType,
    pub confidence: f64,
    pub relationship_type: RelationshipType,
    pub reasoning: Vec<String>,
    pub sample_matches: Vec<SampleMatch>,
    /// Overlap was estimated from a bounded sample.
    pub sampled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct JoinPath {
    pub path: Vec<String>,
    pub tables_involved: Vec<String>,
}

/// Heuristic hint that a table carries hierarchical structure.
#[derive(Debug, Clone, Serialize)]
pub struct HierarchyIndicators {
    pub table: String,
    pub hierarchy_columns: Vec<String>,
    pub levels: usize,
    pub aggregation_lines: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub source_table: String,
    pub discovered_mappings: Vec<MatchCandidate>,
    pub hierarchies_found: Vec<HierarchyIndicators>,
    pub suggested_join_paths: Vec<JoinPath>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelationshipReport {
    pub tables: Vec<String>,
    pub relationships: Vec<MatchCandidate>,
}

// ---------------------------------------------------------------------------
// Hierarchy analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyKind {
    LevelBased,
    ParentChild,
    NoneDetected,
}

#[derive(Debug, Clone, Serialize)]
pub struct LevelInfo {
    pub level: usize,
    pub column: String,
    pub unique_values: usize,
    pub sample_values: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HierarchyAnalysis {
    pub hierarchy_type: HierarchyKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<HierarchyPattern>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_column: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub detected_level_columns: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub levels: Vec<LevelInfo>,
    pub root_nodes: Vec<String>,
    pub root_count: usize,
    pub leaf_nodes: Vec<String>,
    pub leaf_count: usize,
    pub max_depth: usize,
    pub self_referencing_rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HierarchyAnalysis {
    pub(crate) fn empty(kind: HierarchyKind) -> Self {
        Self {
            hierarchy_type: kind,
            pattern: None,
            parent_column: None,
            child_column: None,
            detected_level_columns: Vec::new(),
            levels: Vec::new(),
            root_nodes: Vec::new(),
            root_count: 0,
            leaf_nodes: Vec::new(),
            leaf_count: 0,
            max_depth: 0,
            self_referencing_rows: 0,
            message: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakdownNode {
    pub element: String,
    pub level: usize,
    pub direct_amount: f64,
    pub total_amount: f64,
    pub children: Vec<BreakdownNode>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cycle_detected: bool,
    /// Children already listed under an earlier occurrence of this element.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub expanded_elsewhere: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RollupReport {
    pub target_rollup: String,
    pub total: f64,
    pub hierarchy_pattern: HierarchyPattern,
    pub self_referencing_rows: usize,
    /// Amount carried by source rows with no label.
    pub unmapped_amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<BreakdownNode>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingCoverage {
    pub mapped_rows: usize,
    pub unmapped_rows: usize,
    pub coverage_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnmappedValue {
    pub value: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleDetails {
    pub left_groups: Vec<String>,
    pub right_groups: Vec<String>,
    pub left_sum: f64,
    pub right_sum: f64,
    pub difference: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_ratio: Option<f64>,
    pub tolerance: f64,
    pub equation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_groups: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleOutcome {
    pub rule_type: RuleType,
    pub passed: bool,
    pub details: RuleDetails,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub validation_passed: bool,
    pub rule_type: RuleType,
    pub rule_details: RuleDetails,
    /// Named groups only; the unmapped bucket is reported separately.
    pub group_totals: BTreeMap<String, f64>,
    pub unmapped_total: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping_coverage: Option<MappingCoverage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unmapped_values: Option<Vec<UnmappedValue>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub name: String,
    pub validation_passed: bool,
    pub rules: Vec<RuleOutcome>,
    pub group_totals: BTreeMap<String, f64>,
    pub unmapped_total: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping_coverage: Option<MappingCoverage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unmapped_values: Option<Vec<UnmappedValue>>,
}

// ---------------------------------------------------------------------------
// Structure comparison
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct FuzzySuggestion {
    pub source_value: String,
    pub potential_match: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StructureComparison {
    pub source_unique_values: usize,
    pub report_unique_values: usize,
    pub exact_matches: usize,
    pub coverage_percentage: f64,
    pub source_only: Vec<String>,
    pub report_only: Vec<String>,
    pub potential_fuzzy_matches: Vec<FuzzySuggestion>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_flattens_body() {
        #[derive(Serialize)]
        struct Body {
            total: f64,
        }
        let json = serde_json::to_value(Report::ok(Body { total: 150.0 })).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["total"], 150.0);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn failure_envelope_carries_error() {
        let report: Report<RollupReport> = Report::from_result(Err(MappingError::MissingColumn {
            table: "gl".into(),
            column: "amount".into(),
        }));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "table 'gl': missing column 'amount'");
    }

    #[test]
    fn relationship_type_serializes_as_ratio() {
        assert_eq!(serde_json::to_value(RelationshipType::OneToMany).unwrap(), "1:N");
        assert_eq!(RelationshipType::ManyToOne.to_string(), "N:1");
    }

    #[test]
    fn rounding() {
        assert_eq!(round_to(1.005_1, 2), 1.01);
        assert_eq!(round_to(66.666, 1), 66.7);
    }
}
