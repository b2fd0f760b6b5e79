//! Recursive rollup of leaf amounts through a detected hierarchy.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::config::EngineConfig;
use crate::error::MappingError;
use crate::hierarchy::{detect, detect_roles, Hierarchy};
use crate::model::{round_to, BreakdownNode, RollupReport};
use crate::table::Table;

// ---------------------------------------------------------------------------
// Leaf amounts
// ---------------------------------------------------------------------------

/// Direct amount per label, summed over source rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeafAmounts {
    amounts: BTreeMap<String, f64>,
    unlabeled: f64,
}

impl LeafAmounts {
    /// Sum `amount_col` per trimmed `label_col` value. Rows with no label
    /// accumulate separately in [`LeafAmounts::unlabeled`].
    pub fn from_table(table: &Table, label_col: &str, amount_col: &str) -> Result<Self, MappingError> {
        let labels = table.column(label_col)?;
        let amounts = table.amounts(amount_col)?;

        let mut out = Self::default();
        for (i, amount) in amounts.into_iter().enumerate() {
            match labels.get(i).key() {
                Some(label) => *out.amounts.entry(label).or_insert(0.0) += amount,
                None => out.unlabeled += amount,
            }
        }
        Ok(out)
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut out = Self::default();
        for (label, amount) in pairs {
            *out.amounts.entry(label.into()).or_insert(0.0) += amount;
        }
        out
    }

    pub fn direct(&self, node: &str) -> f64 {
        self.amounts.get(node).copied().unwrap_or(0.0)
    }

    pub fn contains(&self, node: &str) -> bool {
        self.amounts.contains_key(node)
    }

    pub fn unlabeled(&self) -> f64 {
        self.unlabeled
    }

    pub fn labeled_total(&self) -> f64 {
        self.amounts.values().sum()
    }
}

// ---------------------------------------------------------------------------
// Rollup
// ---------------------------------------------------------------------------

/// One rollup invocation. Owns its memoization cache; drop it to start over.
pub struct Rollup<'a> {
    adjacency: &'a BTreeMap<String, BTreeSet<String>>,
    amounts: &'a LeafAmounts,
    depth_cap: usize,
    cache: HashMap<String, f64>,
    on_path: HashSet<String>,
}

impl<'a> Rollup<'a> {
    pub fn new(hierarchy: &'a Hierarchy, amounts: &'a LeafAmounts, depth_cap: usize) -> Self {
        Self {
            adjacency: &hierarchy.adjacency,
            amounts,
            depth_cap,
            cache: HashMap::new(),
            on_path: HashSet::new(),
        }
    }

    /// Direct amount of `node` plus the totals of all its children.
    ///
    /// A node met again on the current path, or past the depth cap,
    /// contributes only its direct amount and is not cached.
    pub fn total(&mut self, node: &str) -> f64 {
        self.total_at(node, 0)
    }

    fn total_at(&mut self, node: &str, depth: usize) -> f64 {
        if let Some(&cached) = self.cache.get(node) {
            return cached;
        }
        let direct = self.amounts.direct(node);
        if self.on_path.contains(node) {
            log::warn!("cycle detected at '{node}', using its direct amount");
            return direct;
        }
        if depth > self.depth_cap {
            log::warn!("rollup depth cap {} exceeded at '{node}'", self.depth_cap);
            return direct;
        }

        self.on_path.insert(node.to_string());
        let mut sum = direct;
        let adjacency = self.adjacency;
        if let Some(children) = adjacency.get(node) {
            for child in children {
                sum += self.total_at(child, depth + 1);
            }
        }
        self.on_path.remove(node);

        self.cache.insert(node.to_string(), sum);
        sum
    }

    /// Tree of direct and rolled-up amounts under `node`.
    ///
    /// Each element's children are listed once. Later occurrences of a
    /// shared element carry its totals with `expanded_elsewhere` set.
    pub fn breakdown(&mut self, node: &str) -> BreakdownNode {
        let mut path = HashSet::new();
        let mut expanded = HashSet::new();
        self.breakdown_at(node, 0, &mut path, &mut expanded)
    }

    fn breakdown_at(
        &mut self,
        node: &str,
        level: usize,
        path: &mut HashSet<String>,
        expanded: &mut HashSet<String>,
    ) -> BreakdownNode {
        let direct = self.amounts.direct(node);
        let mut out = BreakdownNode {
            element: node.to_string(),
            level,
            direct_amount: round_to(direct, 2),
            total_amount: round_to(direct, 2),
            children: Vec::new(),
            cycle_detected: false,
            expanded_elsewhere: false,
        };
        if path.contains(node) {
            out.cycle_detected = true;
            return out;
        }

        out.total_amount = round_to(self.total(node), 2);
        let adjacency = self.adjacency;
        let Some(kids) = adjacency.get(node) else {
            return out;
        };
        if expanded.contains(node) {
            out.expanded_elsewhere = true;
            return out;
        }
        if level < self.depth_cap {
            expanded.insert(node.to_string());
            path.insert(node.to_string());
            for child in kids {
                out.children.push(self.breakdown_at(child, level + 1, path, expanded));
            }
            path.remove(node);
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RollupRequest {
    pub label_column: String,
    pub amount_column: String,
    /// Auto-detected on the hierarchy table when unset.
    pub parent_column: Option<String>,
    pub child_column: Option<String>,
    pub target: String,
    pub include_breakdown: bool,
}

pub fn rollup_through_hierarchy(
    source: &Table,
    hierarchy_table: &Table,
    request: &RollupRequest,
    config: &EngineConfig,
) -> Result<RollupReport, MappingError> {
    let amounts = LeafAmounts::from_table(source, &request.label_column, &request.amount_column)?;

    let (parent, child) = match (&request.parent_column, &request.child_column) {
        (Some(p), Some(c)) => (p.clone(), c.clone()),
        (p, c) => {
            let roles = detect_roles(hierarchy_table);
            match (p.clone().or(roles.parent), c.clone().or(roles.child)) {
                (Some(p), Some(c)) => (p, c),
                _ => {
                    return Err(MappingError::ConfigValidation(format!(
                        "cannot detect parent/child columns in '{}'; name them explicitly",
                        hierarchy_table.name
                    )))
                }
            }
        }
    };

    let hierarchy = detect(hierarchy_table, &parent, &child, &config.hierarchy)?;
    let known = hierarchy.contains(&request.target);
    if !known && !amounts.contains(&request.target) {
        log::warn!("rollup target '{}' is not in the hierarchy or source", request.target);
    }

    let mut rollup = Rollup::new(&hierarchy, &amounts, config.hierarchy.rollup_depth_cap);
    let total = rollup.total(&request.target);
    let breakdown = (request.include_breakdown && known).then(|| rollup.breakdown(&request.target));

    Ok(RollupReport {
        target_rollup: request.target.clone(),
        total: round_to(total, 2),
        hierarchy_pattern: hierarchy.pattern,
        self_referencing_rows: hierarchy.self_referencing_rows,
        unmapped_amount: round_to(amounts.unlabeled(), 2),
        breakdown,
    })
}
