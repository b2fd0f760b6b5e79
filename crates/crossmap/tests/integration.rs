use std::path::PathBuf;

use crossmap::model::{HierarchyKind, MatchType, RelationshipType};
use crossmap::ops;
use crossmap::{
    AnalysisRequest, EngineConfig, HierarchyPattern, RollupRequest, RuleType, Table,
    ValidationRule, ValueMapping,
};

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn load(name: &str) -> Table {
    let path = fixtures_dir().join(name);
    Table::from_csv_path(&path).unwrap_or_else(|e| panic!("cannot load {}: {e}", path.display()))
}

fn gl_rollup(target: &str, include_breakdown: bool) -> RollupRequest {
    RollupRequest {
        label_column: "account".into(),
        amount_column: "amount".into(),
        parent_column: None,
        child_column: None,
        target: target.into(),
        include_breakdown,
    }
}

// -------------------------------------------------------------------------
// Matching
// -------------------------------------------------------------------------

#[test]
fn relationships_between_customers_and_orders() {
    let tables = vec![load("customers.csv"), load("orders.csv")];
    let report = ops::relationships(&tables, &EngineConfig::default());
    assert!(report.success);

    let body = report.body.unwrap();
    assert_eq!(body.tables, vec!["customers", "orders"]);
    let top = &body.relationships[0];
    assert_eq!(top.source_column, "customer_id");
    assert_eq!(top.target_column, "cust_id");
    assert_eq!(top.relationship_type, RelationshipType::OneToMany);
    assert!(top.reasoning.iter().any(|r| r.contains("primary key")));
}

#[test]
fn discover_from_customers() {
    let tables = vec![load("customers.csv"), load("orders.csv")];
    let report = ops::discover(&tables, "customers", &EngineConfig::default());
    let body = report.body.unwrap();

    assert_eq!(body.discovered_mappings.len(), 1);
    let m = &body.discovered_mappings[0];
    assert_eq!(m.match_type, MatchType::Exact);
    assert_eq!(m.confidence, 0.8);
    assert!(body.suggested_join_paths.is_empty());
}

#[test]
fn discover_reports_envelope_json() {
    let tables = vec![load("customers.csv"), load("orders.csv")];
    let report = ops::discover(&tables, "customers", &EngineConfig::default());
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["success"], true);
    assert_eq!(json["source_table"], "customers");
    assert_eq!(json["discovered_mappings"][0]["relationship_type"], "1:N");
}

// -------------------------------------------------------------------------
// Hierarchy
// -------------------------------------------------------------------------

#[test]
fn formula_tables_are_auto_detected() {
    let report = ops::analyze_hierarchy(
        &load("formula.csv"),
        &AnalysisRequest::default(),
        &EngineConfig::default(),
    );
    let a = report.body.unwrap();
    assert_eq!(a.hierarchy_type, HierarchyKind::ParentChild);
    assert_eq!(a.pattern, Some(HierarchyPattern::ChildReferencesParent));
    assert_eq!(a.parent_column.as_deref(), Some("Formula Header"));
    assert_eq!(a.child_column.as_deref(), Some("Formula Element"));
    assert_eq!(a.max_depth, 2);
    assert_eq!(a.self_referencing_rows, 0);
}

#[test]
fn level_columns_are_analyzed() {
    let report = ops::analyze_hierarchy(
        &load("levels.csv"),
        &AnalysisRequest::default(),
        &EngineConfig::default(),
    );
    let a = report.body.unwrap();
    assert_eq!(a.hierarchy_type, HierarchyKind::LevelBased);
    assert_eq!(a.detected_level_columns, vec!["level_1", "level_2"]);
    assert_eq!(a.levels[0].unique_values, 2);
    assert_eq!(a.levels[1].unique_values, 3);
}

#[test]
fn explicit_columns_must_exist() {
    let request = AnalysisRequest {
        parent: Some("nope".into()),
        child: Some("child".into()),
        levels: Vec::new(),
    };
    let report = ops::analyze_hierarchy(&load("tree.csv"), &request, &EngineConfig::default());
    assert!(!report.success);
    assert!(report.error.unwrap().contains("missing column 'nope'"));
}

// -------------------------------------------------------------------------
// Rollup
// -------------------------------------------------------------------------

#[test]
fn rollup_total_assets() {
    let report = ops::rollup(
        &load("gl.csv"),
        &load("tree.csv"),
        &gl_rollup("Total Assets", true),
        &EngineConfig::default(),
    );
    let body = report.body.unwrap();
    assert_eq!(body.total, 9000.0);
    assert_eq!(body.hierarchy_pattern, HierarchyPattern::ParentContainsChildren);
    assert_eq!(body.self_referencing_rows, 3);

    let tree = body.breakdown.unwrap();
    assert_eq!(tree.children.len(), 1);
    let current = &tree.children[0];
    assert_eq!(current.element, "Current Assets");
    assert_eq!(current.total_amount, 9000.0);
    let leaves: Vec<&str> = current.children.iter().map(|c| c.element.as_str()).collect();
    assert_eq!(leaves, vec!["1000", "1100", "1200"]);
}

#[test]
fn rollup_of_a_leaf_is_its_amount() {
    let report = ops::rollup(
        &load("gl.csv"),
        &load("tree.csv"),
        &gl_rollup("1100", false),
        &EngineConfig::default(),
    );
    let body = report.body.unwrap();
    assert_eq!(body.total, 2500.0);
    assert!(body.breakdown.is_none());
}

// -------------------------------------------------------------------------
// Validation
// -------------------------------------------------------------------------

#[test]
fn balance_sheet_validates_through_chart() {
    let chart = ValueMapping::from_table(&load("chart.csv"), None, None).unwrap();
    let report = ops::validate_amounts(
        &load("gl.csv"),
        "account",
        "amount",
        Some(&chart),
        &ValidationRule::balance_sheet(),
        &EngineConfig::default(),
    );
    let body = report.body.unwrap();
    assert!(body.validation_passed);
    assert_eq!(body.group_totals["Asset"], 9000.0);
    assert_eq!(body.group_totals["Liability"], 4000.0);
    assert_eq!(body.group_totals["Equity"], 5000.0);
    assert_eq!(body.unmapped_total, 12.0);

    let coverage = body.mapping_coverage.unwrap();
    assert_eq!(coverage.mapped_rows, 6);
    assert_eq!(coverage.coverage_pct, 85.7);
    assert_eq!(body.unmapped_values.unwrap()[0].value, "9999");
}

#[test]
fn failing_rule_reports_difference() {
    let chart = ValueMapping::from_table(&load("chart.csv"), None, None).unwrap();
    let rule = ValidationRule::new(RuleType::SumEquals, &["Asset"], &["Liability"]);
    let report = ops::validate_amounts(
        &load("gl.csv"),
        "account",
        "amount",
        Some(&chart),
        &rule,
        &EngineConfig::default(),
    );
    let body = report.body.unwrap();
    assert!(!body.validation_passed);
    assert_eq!(body.rule_details.difference, 5000.0);
}

#[test]
fn job_file_runs_all_rules() {
    let report = ops::run_job(&fixtures_dir().join("close.job.toml"), None);
    assert!(report.success, "{:?}", report.error);
    let body = report.body.unwrap();
    assert_eq!(body.name, "Month-end close");
    assert!(body.validation_passed);
    assert_eq!(body.rules.len(), 2);
    assert_eq!(body.rules[1].details.ratio, Some(0.8));
}

fn write_job(dir: &std::path::Path, gl: &str, map: &str, job: &str) -> PathBuf {
    std::fs::write(dir.join("gl.csv"), gl).unwrap();
    std::fs::write(dir.join("map.csv"), map).unwrap();
    let path = dir.join("job.toml");
    std::fs::write(&path, job).unwrap();
    path
}

#[test]
fn job_filters_select_source_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_job(
        dir.path(),
        "account,entity,amount\nCash,US,100\nDebt,US,60\nStock,US,40\nCash,UK,999\nDebt,,5\n",
        "source_code,category\nCash,Asset\nDebt,Liability\nStock,Equity\n",
        r#"
name = "US close"

[source]
file = "gl.csv"
label_column = "account"
amount_column = "amount"
filters = { entity = "US", region = "EMEA" }

[mapping]
file = "map.csv"

[[rules]]
rule_type = "sum_equals"
left_groups = ["Asset"]
right_groups = ["Liability", "Equity"]
"#,
    );

    let report = ops::run_job(&path, None);
    assert!(report.success, "{:?}", report.error);
    let body = report.body.unwrap();
    assert!(body.validation_passed);
    assert_eq!(body.group_totals["Asset"], 100.0);
    assert_eq!(body.group_totals["Liability"], 60.0);
    assert_eq!(body.mapping_coverage.unwrap().mapped_rows, 3);

    let unfiltered = std::fs::read_to_string(&path)
        .unwrap()
        .replace("filters = { entity = \"US\", region = \"EMEA\" }\n", "");
    std::fs::write(&path, unfiltered).unwrap();
    let body = ops::run_job(&path, None).body.unwrap();
    assert!(!body.validation_passed);
    assert_eq!(body.group_totals["Asset"], 1099.0);
}

#[test]
fn job_rule_normalizes_group_names() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_job(
        dir.path(),
        "account,amount\nCash,100\nDebt,60\nStock,40\n",
        "source_code,category\nCash,Current Assets\nDebt,Liabilities\nStock,Share Capital\n",
        r#"
name = "close"

[source]
file = "gl.csv"
label_column = "account"
amount_column = "amount"

[mapping]
file = "map.csv"

[[rules]]
rule_type = "sum_equals"
left_groups = ["Asset"]
right_groups = ["Liability", "Equity"]
normalize_groups = true

[[rules]]
rule_type = "sum_equals"
left_groups = ["Asset"]
right_groups = ["Liability", "Equity"]
"#,
    );

    let body = ops::run_job(&path, None).body.unwrap();
    assert!(body.rules[0].passed);
    assert_eq!(body.rules[0].details.left_sum, 100.0);
    assert!(!body.rules[1].passed);
    assert_eq!(
        body.rules[1].details.message.as_deref(),
        Some("no groups found for right side: Liability, Equity")
    );
    assert_eq!(body.group_totals["Current Assets"], 100.0);
}

// -------------------------------------------------------------------------
// Structure comparison
// -------------------------------------------------------------------------

#[test]
fn chart_against_report_lines() {
    let report = ops::compare_structures(
        &load("chart.csv"),
        "account_name",
        &load("report.csv"),
        "line",
    );
    let body = report.body.unwrap();
    assert_eq!(body.exact_matches, 3);
    assert_eq!(body.coverage_percentage, 50.0);
    assert_eq!(body.source_only, vec!["Accrued Expenses", "Inventory", "Receivables"]);
    assert_eq!(body.report_only.len(), 4);
    assert_eq!(body.potential_fuzzy_matches.len(), 3);
    assert_eq!(body.potential_fuzzy_matches[2].potential_match, "Receivable");
}
