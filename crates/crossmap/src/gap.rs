//! Value-level gap analysis between a source column and a report column.

use std::collections::BTreeSet;

use crate::error::MappingError;
use crate::model::{round_to, FuzzySuggestion, StructureComparison};
use crate::similarity;
use crate::table::Table;

const ONLY_SAMPLE: usize = 20;
const SUGGESTION_CAP: usize = 10;
const SUGGESTION_SCORE: f64 = 70.0;

pub fn compare_structures(
    source: &Table,
    source_col: &str,
    report: &Table,
    report_col: &str,
) -> Result<StructureComparison, MappingError> {
    let source_values = source.column(source_col)?.unique_keys();
    let report_values = report.column(report_col)?.unique_keys();

    let exact_matches = source_values.intersection(&report_values).count();
    let source_only: BTreeSet<&String> = source_values.difference(&report_values).collect();
    let report_only: BTreeSet<&String> = report_values.difference(&source_values).collect();

    let mut potential_fuzzy_matches = Vec::new();
    for value in &source_only {
        if potential_fuzzy_matches.len() >= SUGGESTION_CAP {
            break;
        }
        let hit = similarity::extract_above(
            value,
            report_only.iter().map(|s| s.as_str()),
            SUGGESTION_SCORE,
        );
        if let Some((candidate, score)) = hit {
            potential_fuzzy_matches.push(FuzzySuggestion {
                source_value: (*value).clone(),
                potential_match: candidate.to_string(),
                similarity: round_to(score, 1),
            });
        }
    }

    let coverage_percentage = if source_values.is_empty() {
        100.0
    } else {
        round_to(exact_matches as f64 / source_values.len() as f64 * 100.0, 1)
    };

    Ok(StructureComparison {
        source_unique_values: source_values.len(),
        report_unique_values: report_values.len(),
        exact_matches,
        coverage_percentage,
        source_only: source_only.iter().take(ONLY_SAMPLE).map(|s| (*s).clone()).collect(),
        report_only: report_only.iter().take(ONLY_SAMPLE).map(|s| (*s).clone()).collect(),
        potential_fuzzy_matches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaps_and_suggestions() {
        let source =
            Table::from_csv_str("gl", "account\nCash\nInventory\nTrade Payables\nGoodwill\n").unwrap();
        let report =
            Table::from_csv_str("bs", "line\nCash\nInventories\nTrade payables\nTotal Assets\n").unwrap();
        let cmp = compare_structures(&source, "account", &report, "line").unwrap();

        assert_eq!(cmp.exact_matches, 1);
        assert_eq!(cmp.coverage_percentage, 25.0);
        assert_eq!(cmp.source_only, vec!["Goodwill", "Inventory", "Trade Payables"]);
        assert_eq!(cmp.report_only.len(), 3);

        let pairs: Vec<(&str, &str)> = cmp
            .potential_fuzzy_matches
            .iter()
            .map(|s| (s.source_value.as_str(), s.potential_match.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![("Inventory", "Inventories"), ("Trade Payables", "Trade payables")]
        );
    }

    #[test]
    fn empty_source_is_fully_covered() {
        let source = Table::from_csv_str("gl", "account\n").unwrap();
        let report = Table::from_csv_str("bs", "line\nCash\n").unwrap();
        let cmp = compare_structures(&source, "account", &report, "line").unwrap();
        assert_eq!(cmp.coverage_percentage, 100.0);
        assert_eq!(cmp.report_only, vec!["Cash"]);
    }
}
