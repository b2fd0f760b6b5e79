//! Column correspondence scoring and cross-table mapping discovery.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::MatcherConfig;
use crate::error::MappingError;
use crate::hierarchy::scan_indicators;
use crate::model::{
    round_to, DiscoveryReport, JoinPath, MatchCandidate, MatchType, RelationshipType, SampleMatch,
};
use crate::similarity;
use crate::table::{Column, ColumnType, Table};

/// Suffix tokens that commonly mark a key-like column.
const COMMON_SUFFIXES: &[&str] = &["id", "key", "code", "name", "date"];

/// Candidates at or above this confidence become suggested join paths.
const JOIN_PATH_CONFIDENCE: f64 = 0.9;

// ---------------------------------------------------------------------------
// Name similarity
// ---------------------------------------------------------------------------

pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' ' | '.'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Similarity of two column names in [0, 1].
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let n1 = normalize_name(a);
    let n2 = normalize_name(b);

    if n1 == n2 {
        return 1.0;
    }
    if n1.is_empty() || n2.is_empty() {
        return 0.0;
    }
    if n1.contains(&n2) || n2.contains(&n1) {
        return 0.8;
    }

    // Shared suffix token with one prefix abbreviating the other: cust_id / customer_id.
    for suffix in COMMON_SUFFIXES {
        if let (Some(p1), Some(p2)) = (n1.strip_suffix(suffix), n2.strip_suffix(suffix)) {
            if !p1.is_empty() && !p2.is_empty() && (p1.starts_with(p2) || p2.starts_with(p1)) {
                return 0.9;
            }
        }
    }

    let chars1: BTreeSet<char> = n1.chars().collect();
    let chars2: BTreeSet<char> = n2.chars().collect();
    let inter = chars1.intersection(&chars2).count();
    let union = chars1.union(&chars2).count();
    if union == 0 {
        0.0
    } else {
        inter as f64 / union as f64
    }
}

// ---------------------------------------------------------------------------
// Column profiles
// ---------------------------------------------------------------------------

/// Per-call summary of one column: bounded distinct values plus the exact
/// cardinality figures needed for relationship typing.
#[derive(Debug, Clone)]
pub struct ColumnProfile {
    pub table: String,
    pub name: String,
    pub column_type: ColumnType,
    /// Distinct keys, or a seeded sample of them when over the cap.
    pub values: BTreeSet<String>,
    pub sampled: bool,
    pub unique_count: usize,
    pub non_null_count: usize,
}

impl ColumnProfile {
    pub fn new(table: &str, column: &Column, config: &MatcherConfig) -> Self {
        let unique = column.unique_keys();
        let unique_count = unique.len();
        let (values, sampled) = if unique_count > config.max_unique_values {
            log::debug!(
                "{table}.{}: {unique_count} distinct values, sampling {}",
                column.name,
                config.max_unique_values
            );
            let sample = sample_sorted(&unique, config.max_unique_values, config.sampling_seed);
            (sample.into_iter().cloned().collect(), true)
        } else {
            (unique, false)
        };

        Self {
            table: table.to_string(),
            name: column.name.clone(),
            column_type: column.column_type,
            values,
            sampled,
            unique_count,
            non_null_count: column.non_null_count(),
        }
    }

    pub fn is_fully_unique(&self) -> bool {
        self.non_null_count > 0 && self.unique_count == self.non_null_count
    }
}

/// Seeded sample of `amount` items from a sorted set, returned in set order.
fn sample_sorted(set: &BTreeSet<String>, amount: usize, seed: u64) -> Vec<&String> {
    if set.len() <= amount {
        return set.iter().collect();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picks = rand::seq::index::sample(&mut rng, set.len(), amount).into_vec();
    picks.sort_unstable();
    let items: Vec<&String> = set.iter().collect();
    picks.into_iter().map(|i| items[i]).collect()
}

fn profiles(table: &Table, config: &MatcherConfig) -> Vec<ColumnProfile> {
    table
        .columns
        .iter()
        .map(|c| ColumnProfile::new(&table.name, c, config))
        .collect()
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// `|a ∩ b| / min(|a|, |b|)`; 0 when either side is empty.
pub fn overlap_ratio(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let smaller = a.len().min(b.len());
    if smaller == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / smaller as f64
}

pub fn relationship_type(a: &ColumnProfile, b: &ColumnProfile) -> (RelationshipType, Option<String>) {
    if a.non_null_count == 0 || b.non_null_count == 0 {
        return (RelationshipType::Unknown, None);
    }
    match (a.is_fully_unique(), b.is_fully_unique()) {
        (true, false) => (
            RelationshipType::OneToMany,
            Some(format!("{} appears to be unique (primary key)", a.name)),
        ),
        (false, true) => (
            RelationshipType::ManyToOne,
            Some(format!("{} appears to be unique (primary key)", b.name)),
        ),
        (true, true) => (
            RelationshipType::OneToOne,
            Some("both columns appear to be unique".to_string()),
        ),
        (false, false) => (RelationshipType::ManyToMany, None),
    }
}

fn name_contribution(similarity: f64) -> (f64, Option<String>) {
    if similarity > 0.8 {
        (0.3, Some(format!("column names are similar ({similarity:.2})")))
    } else if similarity > 0.5 {
        (0.15, Some(format!("column names have some similarity ({similarity:.2})")))
    } else {
        (0.0, None)
    }
}

fn overlap_contribution(ratio: f64) -> (f64, Option<String>) {
    let pct = ratio * 100.0;
    if ratio > 0.9 {
        (0.7, Some(format!("high value overlap ({pct:.0}%)")))
    } else if ratio > 0.5 {
        (0.5, Some(format!("moderate value overlap ({pct:.0}%)")))
    } else if ratio > 0.2 {
        (0.3, Some(format!("some value overlap ({pct:.0}%)")))
    } else if ratio > 0.05 {
        (0.15, Some(format!("low value overlap ({pct:.0}%)")))
    } else {
        (0.0, None)
    }
}

/// Score how likely two profiled columns hold the same attribute.
///
/// Returns `None` for incompatible column types.
pub fn score_profiles(
    a: &ColumnProfile,
    b: &ColumnProfile,
    config: &MatcherConfig,
) -> Option<MatchCandidate> {
    if !a.column_type.compatible_with(b.column_type) {
        return None;
    }

    let mut candidate = MatchCandidate {
        source_table: a.table.clone(),
        source_column: a.name.clone(),
        target_table: b.table.clone(),
        target_column: b.name.clone(),
        match_type: MatchType::Exact,
        confidence: 0.0,
        relationship_type: RelationshipType::Unknown,
        reasoning: Vec::new(),
        sample_matches: Vec::new(),
        sampled: a.sampled || b.sampled,
    };

    if a.values.is_empty() || b.values.is_empty() {
        candidate.reasoning.push("no non-null values to compare".to_string());
        return Some(candidate);
    }

    let mut confidence = 0.0;

    let (points, reason) = name_contribution(name_similarity(&a.name, &b.name));
    confidence += points;
    candidate.reasoning.extend(reason);

    let ratio = overlap_ratio(&a.values, &b.values);
    let (points, reason) = overlap_contribution(ratio);
    confidence += points;
    candidate.reasoning.extend(reason);
    if candidate.sampled {
        candidate.reasoning.push(format!(
            "overlap estimated from a sample of at most {} distinct values",
            config.max_unique_values
        ));
    }

    let (rel, reason) = relationship_type(a, b);
    candidate.relationship_type = rel;
    candidate.reasoning.extend(reason);

    candidate.sample_matches = a
        .values
        .intersection(&b.values)
        .take(config.sample_matches)
        .map(|v| SampleMatch {
            source_value: v.clone(),
            target_value: v.clone(),
            score: 1.0,
        })
        .collect();

    candidate.confidence = round_to(confidence.min(1.0), 2);
    Some(candidate)
}

/// Score two columns directly. `None` when their types are incompatible.
pub fn score_columns(
    source_table: &str,
    source: &Column,
    target_table: &str,
    target: &Column,
    config: &MatcherConfig,
) -> Option<MatchCandidate> {
    let a = ColumnProfile::new(source_table, source, config);
    let b = ColumnProfile::new(target_table, target, config);
    score_profiles(&a, &b, config)
}

// ---------------------------------------------------------------------------
// Discovery between two tables
// ---------------------------------------------------------------------------

struct FuzzyOutcome {
    match_ratio: f64,
    sampled_count: usize,
    samples: Vec<SampleMatch>,
}

fn fuzzy_match_values(
    source: &BTreeSet<String>,
    target: &BTreeSet<String>,
    config: &MatcherConfig,
) -> FuzzyOutcome {
    let sampled = sample_sorted(source, config.fuzzy_sample_size, config.sampling_seed);
    let threshold = config.fuzzy_score_threshold();
    let mut matched = 0usize;
    let mut samples = Vec::new();

    for value in &sampled {
        let best = similarity::extract_above(value, target.iter().map(String::as_str), threshold);
        if let Some((hit, score)) = best {
            matched += 1;
            if samples.len() < config.sample_matches {
                samples.push(SampleMatch {
                    source_value: (*value).clone(),
                    target_value: hit.to_string(),
                    score: round_to(score / 100.0, 2),
                });
            }
        }
    }

    let match_ratio = if sampled.is_empty() {
        0.0
    } else {
        matched as f64 / sampled.len() as f64
    };

    FuzzyOutcome {
        match_ratio,
        sampled_count: sampled.len(),
        samples,
    }
}

fn discover_pair(
    a: &ColumnProfile,
    b: &ColumnProfile,
    config: &MatcherConfig,
) -> Option<MatchCandidate> {
    if !a.column_type.compatible_with(b.column_type) || a.values.is_empty() || b.values.is_empty() {
        return None;
    }

    let threshold = config.discovery_threshold;
    let (rel, rel_reason) = relationship_type(a, b);
    let mut candidate = MatchCandidate {
        source_table: a.table.clone(),
        source_column: a.name.clone(),
        target_table: b.table.clone(),
        target_column: b.name.clone(),
        match_type: MatchType::Exact,
        confidence: 0.0,
        relationship_type: rel,
        reasoning: Vec::new(),
        sample_matches: Vec::new(),
        sampled: a.sampled || b.sampled,
    };

    let common: Vec<&String> = a.values.intersection(&b.values).collect();
    let exact_ratio = common.len() as f64 / a.values.len() as f64;

    if exact_ratio > threshold {
        candidate.confidence = round_to(exact_ratio, 2);
        candidate
            .reasoning
            .push(format!("{:.0}% of source values found verbatim", exact_ratio * 100.0));
        candidate.sample_matches = common
            .iter()
            .take(config.sample_matches)
            .map(|v| SampleMatch {
                source_value: (*v).clone(),
                target_value: (*v).clone(),
                score: 1.0,
            })
            .collect();
    } else {
        let fuzzy = fuzzy_match_values(&a.values, &b.values, config);
        if fuzzy.match_ratio <= threshold {
            return None;
        }
        candidate.match_type = MatchType::Fuzzy;
        candidate.confidence = round_to(fuzzy.match_ratio, 2);
        candidate.reasoning.push(format!(
            "{:.0}% of {} sampled source values fuzzy-match (score >= {:.0})",
            fuzzy.match_ratio * 100.0,
            fuzzy.sampled_count,
            config.fuzzy_score_threshold()
        ));
        candidate.sampled |= a.values.len() > fuzzy.sampled_count;
        candidate.sample_matches = fuzzy.samples;
    }

    candidate.reasoning.extend(rel_reason);
    Some(candidate)
}

/// Stricter discovery mode between two different tables: exact overlap
/// first, sampled fuzzy matching as the fallback.
pub fn discover_between(source: &Table, target: &Table, config: &MatcherConfig) -> Vec<MatchCandidate> {
    let source_profiles = profiles(source, config);
    let target_profiles = profiles(target, config);
    discover_profiles(&source_profiles, &target_profiles, config)
}

fn discover_profiles(
    source: &[ColumnProfile],
    target: &[ColumnProfile],
    config: &MatcherConfig,
) -> Vec<MatchCandidate> {
    let mut out = Vec::new();
    for a in source {
        for b in target {
            if let Some(candidate) = discover_pair(a, b, config) {
                out.push(candidate);
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Multi-table entry points
// ---------------------------------------------------------------------------

/// Score every compatible column pair across every pair of tables, keeping
/// candidates at or above the confidence threshold, best first.
pub fn find_relationships(tables: &[Table], config: &MatcherConfig) -> Vec<MatchCandidate> {
    let all: Vec<Vec<ColumnProfile>> = tables.iter().map(|t| profiles(t, config)).collect();
    let mut out = Vec::new();

    for (i, left) in all.iter().enumerate() {
        for right in &all[i + 1..] {
            for a in left {
                for b in right {
                    if let Some(c) = score_profiles(a, b, config) {
                        if c.confidence >= config.confidence_threshold {
                            out.push(c);
                        }
                    }
                }
            }
        }
    }

    sort_by_confidence(&mut out);
    out
}

fn sort_by_confidence(candidates: &mut [MatchCandidate]) {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

pub fn suggest_join_paths(candidates: &[MatchCandidate]) -> Vec<JoinPath> {
    candidates
        .iter()
        .filter(|c| c.confidence >= JOIN_PATH_CONFIDENCE)
        .map(|c| JoinPath {
            path: vec![format!(
                "{}.{} -> {}.{}",
                c.source_table, c.source_column, c.target_table, c.target_column
            )],
            tables_involved: vec![c.source_table.clone(), c.target_table.clone()],
        })
        .collect()
}

/// Discover mappings from `source` to every other loaded table, scan all
/// tables for hierarchy hints, and suggest join paths.
pub fn discover_mappings(
    tables: &[Table],
    source: &str,
    config: &MatcherConfig,
) -> Result<DiscoveryReport, MappingError> {
    let source_table = tables
        .iter()
        .find(|t| t.name == source)
        .ok_or_else(|| MappingError::TableNotFound(source.to_string()))?;
    let source_profiles = profiles(source_table, config);

    let mut discovered = Vec::new();
    for target in tables.iter().filter(|t| t.name != source) {
        let target_profiles = profiles(target, config);
        discovered.extend(discover_profiles(&source_profiles, &target_profiles, config));
    }
    sort_by_confidence(&mut discovered);

    let hierarchies_found = tables.iter().filter_map(scan_indicators).collect();
    let suggested_join_paths = suggest_join_paths(&discovered);

    Ok(DiscoveryReport {
        source_table: source.to_string(),
        discovered_mappings: discovered,
        hierarchies_found,
        suggested_join_paths,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Value;

    fn ints(name: &str, vals: &[i64]) -> Column {
        Column::new(name, vals.iter().map(|v| Value::Int(*v)).collect())
    }

    fn texts(name: &str, vals: &[&str]) -> Column {
        Column::new(name, vals.iter().map(|v| Value::from(*v)).collect())
    }

    #[test]
    fn name_similarity_bands() {
        assert_eq!(name_similarity("Customer_ID", "customerid"), 1.0);
        assert_eq!(name_similarity("account", "account_code"), 0.8);
        assert_eq!(name_similarity("cust_id", "customer_id"), 0.9);
        let j = name_similarity("abc", "abd");
        assert!((j - 0.5).abs() < 1e-9); // {a,b} / {a,b,c,d}
        assert_eq!(name_similarity("__", "x"), 0.0);
    }

    #[test]
    fn one_to_many_relationship() {
        let config = MatcherConfig::default();
        let a = ints("customer_id", &[1, 2, 3, 4, 5]);
        let b = ints("customer_id", &[1, 1, 2, 3, 5]);
        let c = score_columns("customers", &a, "orders", &b, &config).unwrap();
        assert_eq!(c.relationship_type, RelationshipType::OneToMany);
        assert!(c
            .reasoning
            .iter()
            .any(|r| r == "customer_id appears to be unique (primary key)"));
        // name 1.0 → 0.3, overlap 4/4 → 0.7
        assert_eq!(c.confidence, 1.0);
        assert_eq!(c.match_type, MatchType::Exact);
        assert_eq!(c.sample_matches.len(), 4);
    }

    #[test]
    fn many_to_one_and_one_to_one() {
        let config = MatcherConfig::default();
        let a = ints("x", &[1, 1, 2]);
        let b = ints("y", &[1, 2]);
        let c = score_columns("t1", &a, "t2", &b, &config).unwrap();
        assert_eq!(c.relationship_type, RelationshipType::ManyToOne);

        let c = score_columns("t1", &b, "t2", &b, &config).unwrap();
        assert_eq!(c.relationship_type, RelationshipType::OneToOne);

        let c = score_columns("t1", &a, "t2", &a, &config).unwrap();
        assert_eq!(c.relationship_type, RelationshipType::ManyToMany);
    }

    #[test]
    fn incompatible_types_are_skipped() {
        let config = MatcherConfig::default();
        let a = ints("code", &[1, 2]);
        let b = texts("code", &["A", "B"]);
        assert!(score_columns("t1", &a, "t2", &b, &config).is_none());
    }

    #[test]
    fn empty_column_scores_zero() {
        let config = MatcherConfig::default();
        let a = Column::new("code", vec![Value::Null, Value::Null]);
        let b = texts("code", &["A"]);
        let c = score_columns("t1", &a, "t2", &b, &config).unwrap();
        assert_eq!(c.confidence, 0.0);
        assert_eq!(c.relationship_type, RelationshipType::Unknown);
    }

    #[test]
    fn overlap_bands() {
        let config = MatcherConfig::default();
        // names dissimilar, overlap 3/10 → 0.3
        let a = ints("alpha", &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let b = ints("zz", &[1, 2, 3, 11, 12, 13, 14, 15, 16, 17]);
        let c = score_columns("t1", &a, "t2", &b, &config).unwrap();
        assert_eq!(c.confidence, 0.3);
        assert!(c.reasoning.iter().any(|r| r.starts_with("some value overlap")));
    }

    #[test]
    fn high_cardinality_is_sampled_deterministically() {
        let config = MatcherConfig {
            max_unique_values: 50,
            ..MatcherConfig::default()
        };
        let vals: Vec<i64> = (0..500).collect();
        let a = ints("id", &vals);
        let c1 = score_columns("t1", &a, "t2", &a, &config).unwrap();
        let c2 = score_columns("t1", &a, "t2", &a, &config).unwrap();
        assert!(c1.sampled);
        assert_eq!(c1.confidence, c2.confidence);
        assert_eq!(c1.sample_matches, c2.sample_matches);
        let p = ColumnProfile::new("t1", &a, &config);
        assert_eq!(p.values.len(), 50);
        assert_eq!(p.unique_count, 500);
    }

    #[test]
    fn discovery_prefers_exact() {
        let config = MatcherConfig::default();
        let src = Table::new("gl", vec![texts("account", &["Cash", "Inventory", "Payables", "Debt"])]);
        let tgt = Table::new(
            "map",
            vec![texts("acct", &["Cash", "Inventory", "Payables", "Debt", "Equity"])],
        );
        let found = discover_between(&src, &tgt, &config);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].match_type, MatchType::Exact);
        assert_eq!(found[0].confidence, 1.0);
    }

    #[test]
    fn discovery_falls_back_to_fuzzy() {
        let config = MatcherConfig::default();
        let src = Table::new(
            "gl",
            vec![texts("account", &["Cash at Bank", "Inventory ", "Trade Payables", "Long Term Debt"])],
        );
        let tgt = Table::new(
            "map",
            vec![texts("acct", &["Cash at bank", "Inventories", "Trade payables", "Long-term debt"])],
        );
        let found = discover_between(&src, &tgt, &config);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].match_type, MatchType::Fuzzy);
        assert!(found[0].confidence > 0.7);
        assert!(!found[0].sample_matches.is_empty());
    }

    #[test]
    fn discovery_rejects_unrelated_columns() {
        let config = MatcherConfig::default();
        let src = Table::new("a", vec![texts("x", &["apple", "pear"])]);
        let tgt = Table::new("b", vec![texts("y", &["truck", "boat"])]);
        assert!(discover_between(&src, &tgt, &config).is_empty());
    }

    #[test]
    fn relationships_sorted_and_filtered() {
        let config = MatcherConfig::default();
        let customers = Table::new(
            "customers",
            vec![ints("customer_id", &[1, 2, 3, 4]), texts("name", &["a", "b", "c", "d"])],
        );
        let orders = Table::new(
            "orders",
            vec![ints("cust_id", &[1, 1, 2, 4]), ints("qty", &[9, 8, 7, 6])],
        );
        let rels = find_relationships(&[customers, orders], &config);
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].source_column, "customer_id");
        assert_eq!(rels[0].target_column, "cust_id");
        assert_eq!(rels[0].relationship_type, RelationshipType::OneToMany);

        let paths = suggest_join_paths(&rels);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].path[0], "customers.customer_id -> orders.cust_id");
    }

    #[test]
    fn discover_mappings_requires_source() {
        let config = MatcherConfig::default();
        let t = Table::new("a", vec![texts("x", &["1"])]);
        let err = discover_mappings(&[t], "missing", &config).unwrap_err();
        assert!(matches!(err, MappingError::TableNotFound(_)));
    }
}
