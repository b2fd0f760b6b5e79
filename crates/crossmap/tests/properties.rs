// Property-based tests for rollup and validation invariants.
// CI: 256 cases (default). Soak: PROPTEST_CASES=10000 cargo test --release

use proptest::prelude::*;

use crossmap::config::{HierarchyConfig, ValidatorConfig};
use crossmap::hierarchy::detect;
use crossmap::model::BreakdownNode;
use crossmap::validate::{classify, evaluate_rule};
use crossmap::{
    Column, GroupTotals, HierarchyPattern, LeafAmounts, Rollup, RuleType, Table, ValidationRule,
    Value, ValueMapping,
};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn config_256() -> ProptestConfig {
    ProptestConfig {
        cases: std::env::var("PROPTEST_CASES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(256),
        failure_persistence: None,
        ..ProptestConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// A random tree over nodes `n0..nN`: node i hangs under some node < i.
/// Returns (parent index per node, whole-number amount per node).
fn arb_tree(max_nodes: usize) -> impl Strategy<Value = (Vec<Option<usize>>, Vec<i64>)> {
    (1..=max_nodes).prop_flat_map(|n| {
        let parents: Vec<BoxedStrategy<Option<usize>>> = (0..n)
            .map(|i| {
                if i == 0 {
                    Just(None::<usize>).boxed()
                } else {
                    (0..i).prop_map(Some).boxed()
                }
            })
            .collect();
        let amounts = prop::collection::vec(-10_000i64..10_000, n);
        (parents, amounts)
    })
}

fn tree_table(parents: &[Option<usize>]) -> Table {
    let element = parents
        .iter()
        .enumerate()
        .map(|(i, _)| Value::from(format!("n{i}")))
        .collect();
    let parent = parents
        .iter()
        .map(|p| Value::from(p.map(|p| format!("n{p}"))))
        .collect();
    Table::new(
        "tree",
        vec![Column::new("element", element), Column::new("parent", parent)],
    )
}

fn leaf_amounts(amounts: &[i64]) -> LeafAmounts {
    LeafAmounts::from_pairs(
        amounts
            .iter()
            .enumerate()
            .map(|(i, a)| (format!("n{i}"), *a as f64)),
    )
}

/// The same tree as parent/child edge rows, with a self row declaring each
/// leaf.
fn edge_table(parents: &[Option<usize>]) -> Table {
    let mut rows: Vec<(String, String)> = Vec::new();
    for (i, p) in parents.iter().enumerate() {
        if let Some(p) = p {
            rows.push((format!("n{p}"), format!("n{i}")));
        }
    }
    for i in 0..parents.len() {
        if !parents.contains(&Some(i)) {
            rows.push((format!("n{i}"), format!("n{i}")));
        }
    }
    pair_rows(&rows)
}

fn pair_rows(rows: &[(String, String)]) -> Table {
    let parent = rows.iter().map(|(p, _)| Value::from(p.as_str())).collect();
    let child = rows.iter().map(|(_, c)| Value::from(c.as_str())).collect();
    Table::new(
        "edges",
        vec![Column::new("parent", parent), Column::new("child", child)],
    )
}

/// Arbitrary directed edges over `n0..nK`; cycles and self loops allowed.
fn arb_graph() -> impl Strategy<Value = (Vec<(usize, usize)>, Vec<i64>)> {
    (1usize..8).prop_flat_map(|k| {
        (
            prop::collection::vec((0..k, 0..k), 0..30),
            prop::collection::vec(-1_000i64..1_000, k),
        )
    })
}

fn breakdown_size(node: &BreakdownNode) -> usize {
    1 + node.children.iter().map(breakdown_size).sum::<usize>()
}

/// Ledger rows over a small label alphabet; blank labels included.
fn arb_ledger(max_rows: usize) -> impl Strategy<Value = Vec<(String, i64)>> {
    let label = prop_oneof![
        4 => prop::sample::select(vec!["Cash", "Debt", "Stock", "Sales", "Rent", "Misc"])
            .prop_map(str::to_string),
        1 => Just(String::new()),
    ];
    prop::collection::vec((label, -100_000i64..100_000), 0..max_rows)
}

fn ledger_table(rows: &[(String, i64)]) -> Table {
    let labels = rows.iter().map(|(l, _)| Value::from(l.as_str())).collect();
    let amounts = rows.iter().map(|(_, a)| Value::Int(*a)).collect();
    Table::new(
        "gl",
        vec![Column::new("account", labels), Column::new("amount", amounts)],
    )
}

fn arb_mapping() -> impl Strategy<Value = Option<ValueMapping>> {
    prop::option::of(prop::collection::btree_map(
        prop::sample::select(vec!["Cash", "Debt", "Stock", "Sales", "Rent"]),
        prop::sample::select(vec!["Asset", "Liability", "Revenue"]),
        0..5,
    ))
    .prop_map(|m| m.map(ValueMapping::from_pairs))
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(config_256())]

    #[test]
    fn root_total_consolidates_every_node((parents, amounts) in arb_tree(30)) {
        let table = tree_table(&parents);
        let h = detect(&table, "parent", "element", &HierarchyConfig::default()).unwrap();
        let leaves = leaf_amounts(&amounts);
        let mut rollup = Rollup::new(&h, &leaves, 50);

        let expected: i64 = amounts.iter().sum();
        prop_assert_eq!(rollup.total("n0"), expected as f64);

        // every subtree consolidates the same way
        for i in 0..parents.len() {
            let node = format!("n{i}");
            let subtree: f64 = std::iter::once(node.clone())
                .chain(h.descendants(&node, usize::MAX))
                .map(|n| leaves.direct(&n))
                .sum();
            prop_assert_eq!(rollup.total(&node), subtree, "node {}", node);
        }
    }

    #[test]
    fn total_is_idempotent((parents, amounts) in arb_tree(30)) {
        let table = tree_table(&parents);
        let h = detect(&table, "parent", "element", &HierarchyConfig::default()).unwrap();
        let leaves = leaf_amounts(&amounts);
        let before = leaves.clone();

        let mut rollup = Rollup::new(&h, &leaves, 50);
        let first = rollup.total("n0");
        let second = rollup.total("n0");
        prop_assert_eq!(first, second);
        prop_assert_eq!(&leaves, &before);
    }

    #[test]
    fn classification_conserves_amounts(rows in arb_ledger(40), mapping in arb_mapping()) {
        let table = ledger_table(&rows);
        let c = classify(&table, "account", "amount", mapping.as_ref(), &ValidatorConfig::default())
            .unwrap();

        let source: i64 = rows.iter().map(|(_, a)| a).sum();
        let grouped: f64 = c.totals.values().sum();
        prop_assert_eq!(grouped, source as f64);

        if let Some(cov) = c.coverage {
            prop_assert_eq!(cov.mapped_rows + cov.unmapped_rows, rows.len());
        }
    }

    #[test]
    fn sum_equals_is_reflexive(value in -1.0e9f64..1.0e9, tolerance in 0.0f64..100.0) {
        let rule = ValidationRule::new(RuleType::SumEquals, &["A"], &["A"]).with_tolerance(tolerance);
        let mut totals = GroupTotals::new();
        totals.insert("A".to_string(), value);

        let out = evaluate_rule(&rule, &totals).unwrap();
        prop_assert!(out.passed);
        prop_assert_eq!(out.details.difference, 0.0);
    }

    #[test]
    fn self_declared_leaves_roll_up_like_plain_edges((parents, amounts) in arb_tree(30)) {
        let table = edge_table(&parents);
        let h = detect(&table, "parent", "child", &HierarchyConfig::default()).unwrap();
        prop_assert_eq!(h.pattern, HierarchyPattern::ParentContainsChildren);

        let leaf_count = (0..parents.len()).filter(|i| !parents.contains(&Some(*i))).count();
        prop_assert_eq!(h.self_referencing_rows, leaf_count);
        prop_assert_eq!(h.leaves.len(), leaf_count);
        for leaf in &h.leaves {
            prop_assert!(h.children(leaf).is_empty(), "leaf {} has children", leaf);
        }

        let leaves = leaf_amounts(&amounts);
        let mut rollup = Rollup::new(&h, &leaves, 50);
        let expected: i64 = amounts.iter().sum();
        prop_assert_eq!(rollup.total("n0"), expected as f64);
        prop_assert_eq!(rollup.breakdown("n0").total_amount, expected as f64);
    }

    #[test]
    fn cyclic_graphs_terminate((edges, amounts) in arb_graph()) {
        let rows: Vec<(String, String)> = edges
            .iter()
            .map(|(a, b)| (format!("n{a}"), format!("n{b}")))
            .collect();
        let table = pair_rows(&rows);
        let config = HierarchyConfig::default();
        let h = detect(&table, "parent", "child", &config).unwrap();
        prop_assert!(h.max_depth <= config.depth_cap);

        let edge_count: usize = h.adjacency.values().map(|c| c.len()).sum();
        let leaves = leaf_amounts(&amounts);
        let mut rollup = Rollup::new(&h, &leaves, config.rollup_depth_cap);
        for i in 0..amounts.len() {
            let node = format!("n{i}");
            prop_assert!(rollup.total(&node).is_finite(), "node {}", node);
            let b = rollup.breakdown(&node);
            prop_assert!(b.total_amount.is_finite());
            prop_assert!(breakdown_size(&b) <= 1 + edge_count);
        }
    }
}
