//! Label classification into groups and rule checks over the group totals.

use std::collections::{BTreeMap, HashMap};

use crate::config::{EngineConfig, RuleType, ValidationRule, ValidatorConfig};
use crate::error::MappingError;
use crate::model::{
    round_to, JobReport, MappingCoverage, RuleDetails, RuleOutcome, UnmappedValue,
    ValidationReport, UNMAPPED,
};
use crate::similarity;
use crate::table::Table;

/// Totals per group, including the [`UNMAPPED`] bucket when non-empty.
pub type GroupTotals = BTreeMap<String, f64>;

/// Absorbs float noise when comparing against a zero tolerance.
const EPSILON: f64 = 1e-9;

const KEY_HINTS: &[&str] = &["source", "from", "code"];
const GROUP_HINTS: &[&str] = &["category", "type", "class", "group"];

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

/// Raw label → group name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueMapping {
    groups: BTreeMap<String, String>,
}

impl ValueMapping {
    pub fn from_pairs<I, K, G>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, G)>,
        K: Into<String>,
        G: Into<String>,
    {
        Self {
            groups: pairs.into_iter().map(|(k, g)| (k.into(), g.into())).collect(),
        }
    }

    /// Build from two columns of a mapping table. Unset columns are
    /// detected from the header names; rows missing either side are skipped.
    pub fn from_table(
        table: &Table,
        key_col: Option<&str>,
        group_col: Option<&str>,
    ) -> Result<Self, MappingError> {
        if table.columns.len() < 2 {
            return Err(MappingError::ConfigValidation(format!(
                "mapping table '{}' needs at least two columns",
                table.name
            )));
        }

        let key_name = match key_col {
            Some(k) => k.to_string(),
            None => last_column_matching(table, KEY_HINTS)
                .unwrap_or_else(|| table.columns[0].name.clone()),
        };
        let group_name = match group_col {
            Some(g) => g.to_string(),
            None => last_column_matching(table, GROUP_HINTS)
                .unwrap_or_else(|| table.columns[table.columns.len() - 1].name.clone()),
        };
        log::debug!("mapping '{}': {key_name} -> {group_name}", table.name);

        let keys = table.column(&key_name)?;
        let groups = table.column(&group_name)?;

        let mut out = Self::default();
        for i in 0..table.row_count() {
            if let (Some(k), Some(g)) = (keys.get(i).key(), groups.get(i).key()) {
                out.groups.insert(k, g);
            }
        }
        Ok(out)
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.groups.get(label).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

fn last_column_matching(table: &Table, hints: &[&str]) -> Option<String> {
    table
        .columns
        .iter()
        .rev()
        .find(|c| {
            let lower = c.name.to_lowercase();
            hints.iter().any(|h| lower.contains(h))
        })
        .map(|c| c.name.clone())
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Classification {
    pub totals: GroupTotals,
    /// Present only when a mapping was applied.
    pub coverage: Option<MappingCoverage>,
    pub unmapped_values: Vec<UnmappedValue>,
}

impl Classification {
    /// Named group totals, rounded, without the unmapped bucket.
    pub fn named_totals(&self) -> BTreeMap<String, f64> {
        self.totals
            .iter()
            .filter(|(g, _)| g.as_str() != UNMAPPED)
            .map(|(g, v)| (g.clone(), round_to(*v, 2)))
            .collect()
    }

    pub fn unmapped_total(&self) -> f64 {
        self.totals.get(UNMAPPED).copied().unwrap_or(0.0)
    }
}

/// Assign every source row's amount to a group.
///
/// With a mapping, labels are looked up verbatim, then fuzzily; misses land
/// in [`UNMAPPED`]. Without one, each label is its own group.
pub fn classify(
    source: &Table,
    label_col: &str,
    amount_col: &str,
    mapping: Option<&ValueMapping>,
    config: &ValidatorConfig,
) -> Result<Classification, MappingError> {
    let labels = source.column(label_col)?;
    let amounts = source.amounts(amount_col)?;

    let mut totals = GroupTotals::new();
    let mut mapped_rows = 0usize;
    let mut fuzzy_cache: HashMap<String, Option<String>> = HashMap::new();
    let mut unmapped: Vec<UnmappedValue> = Vec::new();
    let mut unmapped_index: HashMap<String, usize> = HashMap::new();

    for (i, amount) in amounts.iter().copied().enumerate() {
        let label = labels.get(i).key();
        let group = match (&label, mapping) {
            (None, _) => None,
            (Some(l), None) => Some(l.clone()),
            (Some(l), Some(m)) => match m.get(l) {
                Some(g) => Some(g.to_string()),
                None => fuzzy_cache
                    .entry(l.clone())
                    .or_insert_with(|| {
                        similarity::extract_above(l, m.keys(), config.fuzzy_accept)
                            .and_then(|(hit, score)| {
                                log::debug!("'{l}' fuzzy-mapped via '{hit}' ({score:.1})");
                                m.get(hit).map(str::to_string)
                            })
                    })
                    .clone(),
            },
        };

        match group {
            Some(g) => {
                if mapping.is_some() {
                    mapped_rows += 1;
                }
                *totals.entry(g).or_insert(0.0) += amount;
            }
            None => {
                *totals.entry(UNMAPPED.to_string()).or_insert(0.0) += amount;
                if let Some(l) = label.filter(|_| mapping.is_some()) {
                    match unmapped_index.get(&l) {
                        Some(&at) => unmapped[at].amount += amount,
                        None if unmapped.len() < config.unmapped_sample_cap => {
                            unmapped_index.insert(l.clone(), unmapped.len());
                            unmapped.push(UnmappedValue { value: l, amount });
                        }
                        None => {}
                    }
                }
            }
        }
    }

    let coverage = mapping.map(|_| {
        let total_rows = amounts.len();
        let coverage_pct = if total_rows == 0 {
            100.0
        } else {
            round_to(mapped_rows as f64 / total_rows as f64 * 100.0, 1)
        };
        MappingCoverage {
            mapped_rows,
            unmapped_rows: total_rows - mapped_rows,
            coverage_pct,
        }
    });
    if let Some(c) = &coverage {
        if c.unmapped_rows > 0 {
            log::warn!("{} source rows could not be mapped", c.unmapped_rows);
        }
    }

    for u in &mut unmapped {
        u.amount = round_to(u.amount, 2);
    }

    Ok(Classification {
        totals,
        coverage,
        unmapped_values: unmapped,
    })
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Balance-sheet group named by `group`, matched on keywords.
pub fn balance_sheet_group(group: &str) -> Option<&'static str> {
    let lower = group.to_lowercase();
    if lower.contains("asset") {
        Some("Asset")
    } else if lower.contains("liabilit") {
        Some("Liability")
    } else if lower.contains("equity") || lower.contains("capital") {
        Some("Equity")
    } else {
        None
    }
}

fn fold_balance_sheet_groups(totals: &GroupTotals) -> GroupTotals {
    let mut out = GroupTotals::new();
    for (group, value) in totals {
        let name = match group.as_str() {
            UNMAPPED => group.as_str(),
            _ => balance_sheet_group(group).unwrap_or(group.as_str()),
        };
        *out.entry(name.to_string()).or_insert(0.0) += value;
    }
    out
}

fn side_sum(groups: &[String], totals: &GroupTotals, missing: &mut Vec<String>) -> f64 {
    groups
        .iter()
        .map(|g| match totals.get(g) {
            Some(v) => *v,
            None => {
                if !missing.contains(g) {
                    missing.push(g.clone());
                }
                0.0
            }
        })
        .sum()
}

fn expr(groups: &[String]) -> String {
    if groups.is_empty() {
        "0".to_string()
    } else {
        groups.join(" + ")
    }
}

fn bound(value: Option<f64>, unbounded: &str) -> String {
    value.map_or_else(|| unbounded.to_string(), |v| format!("{v:.2}"))
}

/// Check one rule against group totals. Groups absent from `totals` count
/// as zero and are listed in the details; a side whose groups are all absent
/// fails the rule.
pub fn evaluate_rule(rule: &ValidationRule, totals: &GroupTotals) -> Result<RuleOutcome, MappingError> {
    rule.validate()?;

    let folded;
    let totals = if rule.normalize_groups {
        folded = fold_balance_sheet_groups(totals);
        &folded
    } else {
        totals
    };

    let mut missing = Vec::new();
    let mut left_groups = rule.left_groups.clone();
    let mut right_groups = rule.right_groups.clone();
    let one_sided_balance = rule.rule_type == RuleType::GroupsBalance
        && (left_groups.is_empty() || right_groups.is_empty());

    if one_sided_balance {
        left_groups.append(&mut right_groups);
        if left_groups.is_empty() {
            left_groups = totals.keys().filter(|g| g.as_str() != UNMAPPED).cloned().collect();
        }
    }

    let left_sum = side_sum(&left_groups, totals, &mut missing);
    let right_sum = side_sum(&right_groups, totals, &mut missing);
    let difference = left_sum - right_sum;
    let tolerance = rule.tolerance;

    let mut ratio = None;
    let mut message = None;
    let (mut passed, equation) = match rule.rule_type {
        RuleType::SumEquals => (
            difference.abs() <= tolerance + EPSILON,
            format!(
                "{} = {}: {left_sum:.2} vs {right_sum:.2}",
                expr(&left_groups),
                expr(&right_groups)
            ),
        ),
        RuleType::GroupsBalance if one_sided_balance => (
            left_sum.abs() <= tolerance + EPSILON,
            format!("{} = 0: {left_sum:.2}", expr(&left_groups)),
        ),
        RuleType::GroupsBalance => (
            difference.abs() <= tolerance + EPSILON,
            format!(
                "{} = {}: {left_sum:.2} vs {right_sum:.2}",
                expr(&left_groups),
                expr(&right_groups)
            ),
        ),
        RuleType::DifferenceEquals => {
            // validate() guarantees the expectation
            let expected = rule.expected.unwrap_or_default();
            (
                (difference - expected).abs() <= tolerance + EPSILON,
                format!(
                    "({}) - ({}) = {expected:.2}: actual {difference:.2}",
                    expr(&left_groups),
                    expr(&right_groups)
                ),
            )
        }
        RuleType::RatioInRange => {
            let range = format!(
                "[{}, {}]",
                bound(rule.min_ratio, "-inf"),
                bound(rule.max_ratio, "inf")
            );
            if right_sum.abs() < EPSILON {
                message = Some(format!(
                    "denominator ({}) is zero; ratio is undefined",
                    expr(&right_groups)
                ));
                (
                    false,
                    format!("({}) / ({}) in {range}: undefined", expr(&left_groups), expr(&right_groups)),
                )
            } else {
                let r = left_sum / right_sum;
                ratio = Some(round_to(r, 4));
                let above_min = rule.min_ratio.map_or(true, |m| r >= m - EPSILON);
                let below_max = rule.max_ratio.map_or(true, |m| r <= m + EPSILON);
                (
                    above_min && below_max,
                    format!(
                        "({}) / ({}) in {range}: {r:.4}",
                        expr(&left_groups),
                        expr(&right_groups)
                    ),
                )
            }
        }
    };

    if !missing.is_empty() {
        log::warn!("{}: groups not found, counted as 0: {}", rule.rule_type, missing.join(", "));
    }
    for (side, groups) in [("left", &left_groups), ("right", &right_groups)] {
        if !groups.is_empty() && groups.iter().all(|g| missing.contains(g)) {
            passed = false;
            message = Some(format!("no groups found for {side} side: {}", groups.join(", ")));
        }
    }

    Ok(RuleOutcome {
        rule_type: rule.rule_type,
        passed,
        details: RuleDetails {
            left_groups,
            right_groups,
            left_sum: round_to(left_sum, 2),
            right_sum: round_to(right_sum, 2),
            difference: round_to(difference, 2),
            expected: rule.expected,
            ratio,
            min_ratio: rule.min_ratio,
            max_ratio: rule.max_ratio,
            tolerance,
            equation,
            message,
            missing_groups: missing,
        },
    })
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Classify `source` and check a single rule.
pub fn validate_amounts(
    source: &Table,
    label_col: &str,
    amount_col: &str,
    mapping: Option<&ValueMapping>,
    rule: &ValidationRule,
    config: &EngineConfig,
) -> Result<ValidationReport, MappingError> {
    let classification = classify(source, label_col, amount_col, mapping, &config.validator)?;
    let outcome = evaluate_rule(rule, &classification.totals)?;

    Ok(ValidationReport {
        validation_passed: outcome.passed,
        rule_type: outcome.rule_type,
        rule_details: outcome.details,
        group_totals: classification.named_totals(),
        unmapped_total: round_to(classification.unmapped_total(), 2),
        mapping_coverage: classification.coverage.clone(),
        unmapped_values: mapping.map(|_| classification.unmapped_values.clone()),
    })
}

/// Classify `source` once and check every rule. Passes only if all pass.
pub fn validate_rules(
    name: &str,
    source: &Table,
    label_col: &str,
    amount_col: &str,
    mapping: Option<&ValueMapping>,
    rules: &[ValidationRule],
    config: &EngineConfig,
) -> Result<JobReport, MappingError> {
    let classification = classify(source, label_col, amount_col, mapping, &config.validator)?;
    let outcomes = rules
        .iter()
        .map(|r| evaluate_rule(r, &classification.totals))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(JobReport {
        name: name.to_string(),
        validation_passed: outcomes.iter().all(|o| o.passed),
        rules: outcomes,
        group_totals: classification.named_totals(),
        unmapped_total: round_to(classification.unmapped_total(), 2),
        mapping_coverage: classification.coverage.clone(),
        unmapped_values: mapping.map(|_| classification.unmapped_values.clone()),
    })
}
