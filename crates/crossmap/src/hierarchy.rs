//! Parent/child hierarchy detection over two columns of a table.
//!
//! Two conventions are recognized. In `parent_contains_children` every row
//! is a parent→child edge and rows whose two values are equal declare leaves.
//! In `child_references_parent` each row names an element and its direct
//! parent. A table is assigned exactly one convention.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use serde::Serialize;

use crate::config::HierarchyConfig;
use crate::error::MappingError;
use crate::matcher::normalize_name;
use crate::model::{HierarchyAnalysis, HierarchyIndicators, HierarchyKind, LevelInfo};
use crate::table::Table;

/// Node lists in analysis output are truncated to this many entries.
const NODE_SAMPLE: usize = 20;
const LEVEL_SAMPLE: usize = 5;
const AGGREGATION_SAMPLE: usize = 10;

const INDICATOR_WORDS: &[&str] = &[
    "level",
    "parent",
    "child",
    "row_number",
    "sequence",
    "rollup",
    "total",
    "subtotal",
    "aggregation",
];
const AGGREGATION_WORDS: &[&str] = &["total", "sum", "subtotal"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyPattern {
    ParentContainsChildren,
    ChildReferencesParent,
}

impl std::fmt::Display for HierarchyPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParentContainsChildren => write!(f, "parent_contains_children"),
            Self::ChildReferencesParent => write!(f, "child_references_parent"),
        }
    }
}

// ---------------------------------------------------------------------------
// Hierarchy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Hierarchy {
    pub pattern: HierarchyPattern,
    /// parent -> children
    pub adjacency: BTreeMap<String, BTreeSet<String>>,
    pub roots: BTreeSet<String>,
    pub leaves: BTreeSet<String>,
    pub max_depth: usize,
    pub self_referencing_rows: usize,
    nodes: BTreeSet<String>,
}

impl Hierarchy {
    /// Every label seen in either column.
    pub fn nodes(&self) -> &BTreeSet<String> {
        &self.nodes
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.contains(node)
    }

    pub fn children(&self, node: &str) -> Vec<&str> {
        self.adjacency
            .get(node)
            .map(|c| c.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Breadth-first descendants of `node`, each reported once, at most
    /// `max_depth` edges away.
    pub fn descendants(&self, node: &str, max_depth: usize) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        seen.insert(node);
        let mut out = Vec::new();
        let mut queue: VecDeque<(&str, usize)> = VecDeque::new();
        queue.push_back((node, 0));

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for child in self.children(current) {
                if seen.insert(child) {
                    out.push(child.to_string());
                    queue.push_back((child, depth + 1));
                }
            }
        }
        out
    }

    /// `node` followed by its ancestors. Multiple parents resolve to the
    /// lexicographically smallest; stops on the first revisit.
    pub fn path_to_root(&self, node: &str) -> Vec<String> {
        let mut parents: BTreeMap<&str, &str> = BTreeMap::new();
        for (parent, children) in &self.adjacency {
            for child in children {
                parents.entry(child.as_str()).or_insert(parent.as_str());
            }
        }

        let mut path = vec![node.to_string()];
        let mut seen: HashSet<&str> = HashSet::new();
        seen.insert(node);
        let mut current = node;
        while let Some(&parent) = parents.get(current) {
            if !seen.insert(parent) {
                break;
            }
            path.push(parent.to_string());
            current = parent;
        }
        path
    }
}

/// Build the hierarchy encoded by `parent_col` / `child_col`.
pub fn detect(
    table: &Table,
    parent_col: &str,
    child_col: &str,
    config: &HierarchyConfig,
) -> Result<Hierarchy, MappingError> {
    let parent = table.column(parent_col)?;
    let child = table.column(child_col)?;

    let rows: Vec<(Option<String>, String)> = (0..table.row_count())
        .filter_map(|i| {
            let c = child.get(i).key()?;
            Some((parent.get(i).key(), c))
        })
        .collect();

    let self_referencing_rows = rows
        .iter()
        .filter(|(p, c)| p.as_deref() == Some(c.as_str()))
        .count();

    let pattern = if self_referencing_rows > 0 {
        HierarchyPattern::ParentContainsChildren
    } else {
        HierarchyPattern::ChildReferencesParent
    };
    log::debug!(
        "{}: {parent_col}/{child_col} detected as {pattern} ({self_referencing_rows} self-referencing rows)",
        table.name
    );

    let mut adjacency: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut nodes = BTreeSet::new();
    let (roots, leaves) = match pattern {
        HierarchyPattern::ParentContainsChildren => {
            let mut parents = BTreeSet::new();
            let mut children = BTreeSet::new();
            let mut declared = BTreeSet::new();
            for (p, c) in &rows {
                nodes.insert(c.clone());
                match p {
                    Some(p) if p == c => {
                        declared.insert(c.clone());
                    }
                    Some(p) => {
                        nodes.insert(p.clone());
                        parents.insert(p.clone());
                        children.insert(c.clone());
                        adjacency.entry(p.clone()).or_default().insert(c.clone());
                    }
                    None => {
                        children.insert(c.clone());
                    }
                }
            }
            let roots: BTreeSet<String> = parents.difference(&children).cloned().collect();
            let mut leaves: BTreeSet<String> = children.difference(&parents).cloned().collect();
            leaves.extend(declared);
            (roots, leaves)
        }
        HierarchyPattern::ChildReferencesParent => {
            let mut raw_parents = BTreeSet::new();
            let mut raw_children = BTreeSet::new();
            for (p, c) in &rows {
                nodes.insert(c.clone());
                raw_children.insert(c.clone());
                if let Some(p) = p {
                    nodes.insert(p.clone());
                    raw_parents.insert(p.clone());
                    adjacency.entry(p.clone()).or_default().insert(c.clone());
                }
            }
            let roots = raw_children.difference(&raw_parents).cloned().collect();
            let leaves = raw_parents.difference(&raw_children).cloned().collect();
            (roots, leaves)
        }
    };

    let max_depth = longest_path(&adjacency, config.depth_cap);

    Ok(Hierarchy {
        pattern,
        adjacency,
        roots,
        leaves,
        max_depth,
        self_referencing_rows,
        nodes,
    })
}

/// Longest edge count from any structural top, bounded by `cap`.
///
/// With no tops (every node has a parent) each node is tried as a start.
/// Results are memoized per node and depth, so shared subtrees are walked
/// once per depth; exact on acyclic input.
pub fn longest_path(adjacency: &BTreeMap<String, BTreeSet<String>>, cap: usize) -> usize {
    let targets: HashSet<&str> = adjacency.values().flatten().map(String::as_str).collect();
    let tops: Vec<&str> = adjacency
        .keys()
        .map(String::as_str)
        .filter(|k| !targets.contains(k))
        .collect();
    let starts: Vec<&str> = if tops.is_empty() {
        adjacency.keys().map(String::as_str).collect()
    } else {
        tops
    };

    let mut walk = DepthWalk {
        adjacency,
        cap,
        on_path: HashSet::new(),
        memo: HashMap::new(),
    };
    starts
        .into_iter()
        .map(|s| walk.depth_from(s, 0))
        .max()
        .unwrap_or(0)
}

struct DepthWalk<'a> {
    adjacency: &'a BTreeMap<String, BTreeSet<String>>,
    cap: usize,
    on_path: HashSet<&'a str>,
    memo: HashMap<(&'a str, usize), usize>,
}

impl<'a> DepthWalk<'a> {
    fn depth_from(&mut self, node: &'a str, depth: usize) -> usize {
        if depth >= self.cap {
            return 0;
        }
        if let Some(&known) = self.memo.get(&(node, depth)) {
            return known;
        }

        self.on_path.insert(node);
        let mut best = 0;
        let adjacency = self.adjacency;
        if let Some(children) = adjacency.get(node) {
            for child in children {
                if self.on_path.contains(child.as_str()) {
                    continue;
                }
                best = best.max(1 + self.depth_from(child, depth + 1));
            }
        }
        self.on_path.remove(node);

        self.memo.insert((node, depth), best);
        best
    }
}

// ---------------------------------------------------------------------------
// Column roles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Level,
    Parent,
    Child,
}

struct RoleRule {
    matches: fn(&str) -> bool,
    role: ColumnRole,
}

fn contains_any(name: &str, words: &[&str]) -> bool {
    words.iter().any(|w| name.contains(w))
}

/// Evaluated in order; a column takes the first rule it matches.
const ROLE_RULES: &[RoleRule] = &[
    RoleRule {
        matches: |n| contains_any(n, &["level", "lvl", "tier", "depth"]),
        role: ColumnRole::Level,
    },
    RoleRule {
        matches: |n| contains_any(n, &["parent", "header"]),
        role: ColumnRole::Parent,
    },
    RoleRule {
        matches: |n| contains_any(n, &["child", "element", "id", "code", "key"]),
        role: ColumnRole::Child,
    },
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectedRoles {
    pub parent: Option<String>,
    pub child: Option<String>,
    pub levels: Vec<String>,
}

pub fn detect_roles(table: &Table) -> DetectedRoles {
    let mut roles = DetectedRoles::default();

    let header = table
        .columns
        .iter()
        .find(|c| normalize_name(&c.name) == "formulaheader");
    let element = table
        .columns
        .iter()
        .find(|c| normalize_name(&c.name) == "formulaelement");
    if let (Some(h), Some(e)) = (header, element) {
        roles.parent = Some(h.name.clone());
        roles.child = Some(e.name.clone());
        return roles;
    }

    for column in &table.columns {
        let normalized = normalize_name(&column.name);
        let Some(rule) = ROLE_RULES.iter().find(|r| (r.matches)(&normalized)) else {
            continue;
        };
        match rule.role {
            ColumnRole::Level => roles.levels.push(column.name.clone()),
            ColumnRole::Parent if roles.parent.is_none() => roles.parent = Some(column.name.clone()),
            ColumnRole::Child if roles.child.is_none() => roles.child = Some(column.name.clone()),
            _ => {}
        }
    }

    if (roles.parent.is_none() || roles.child.is_none()) && table.columns.len() >= 2 {
        let first = &table.columns[0];
        let second = &table.columns[1];
        let shared = {
            let a = first.unique_keys();
            second.keys().any(|k| a.contains(&k))
        };
        if shared {
            log::debug!(
                "{}: falling back to first two columns {}/{}",
                table.name,
                first.name,
                second.name
            );
            roles.parent = Some(first.name.clone());
            roles.child = Some(second.name.clone());
        }
    }

    roles
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Explicit column choices for [`analyze`]. Anything left unset is
/// auto-detected.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub parent: Option<String>,
    pub child: Option<String>,
    pub levels: Vec<String>,
}

pub fn analyze(
    table: &Table,
    request: &AnalysisRequest,
    config: &HierarchyConfig,
) -> Result<HierarchyAnalysis, MappingError> {
    if !request.levels.is_empty() {
        return level_analysis(table, &request.levels);
    }

    let detected = detect_roles(table);
    let parent = request.parent.clone().or(detected.parent);
    let child = request.child.clone().or(detected.child);

    match (parent, child) {
        (Some(parent), Some(child)) => parent_child_analysis(table, &parent, &child, config),
        _ if !detected.levels.is_empty() => level_analysis(table, &detected.levels),
        _ => {
            let mut analysis = HierarchyAnalysis::empty(HierarchyKind::NoneDetected);
            analysis.message = Some("no hierarchy columns detected".to_string());
            Ok(analysis)
        }
    }
}

fn sample<'a, I: IntoIterator<Item = &'a String>>(items: I, cap: usize) -> Vec<String> {
    items.into_iter().take(cap).cloned().collect()
}

fn parent_child_analysis(
    table: &Table,
    parent: &str,
    child: &str,
    config: &HierarchyConfig,
) -> Result<HierarchyAnalysis, MappingError> {
    let h = detect(table, parent, child, config)?;
    let mut analysis = HierarchyAnalysis::empty(HierarchyKind::ParentChild);
    analysis.pattern = Some(h.pattern);
    analysis.parent_column = Some(parent.to_string());
    analysis.child_column = Some(child.to_string());
    analysis.root_nodes = sample(&h.roots, NODE_SAMPLE);
    analysis.root_count = h.roots.len();
    analysis.leaf_nodes = sample(&h.leaves, NODE_SAMPLE);
    analysis.leaf_count = h.leaves.len();
    analysis.max_depth = h.max_depth;
    analysis.self_referencing_rows = h.self_referencing_rows;
    Ok(analysis)
}

fn level_analysis(table: &Table, level_columns: &[String]) -> Result<HierarchyAnalysis, MappingError> {
    let mut analysis = HierarchyAnalysis::empty(HierarchyKind::LevelBased);
    let mut first_last = (None, None);

    for (i, name) in level_columns.iter().enumerate() {
        let unique = table.column(name)?.unique_keys();
        analysis.levels.push(LevelInfo {
            level: i + 1,
            column: name.clone(),
            unique_values: unique.len(),
            sample_values: sample(&unique, LEVEL_SAMPLE),
        });
        if i == 0 {
            first_last.0 = Some(unique.clone());
        }
        first_last.1 = Some(unique);
    }

    if let (Some(top), Some(bottom)) = first_last {
        analysis.root_nodes = sample(&top, NODE_SAMPLE);
        analysis.root_count = top.len();
        analysis.leaf_nodes = sample(&bottom, NODE_SAMPLE);
        analysis.leaf_count = bottom.len();
    }
    analysis.detected_level_columns = level_columns.to_vec();
    analysis.max_depth = level_columns.len();
    Ok(analysis)
}

/// Cheap scan for hierarchy hints: indicator column names and rows that look
/// like aggregation lines. `None` when nothing is found.
pub fn scan_indicators(table: &Table) -> Option<HierarchyIndicators> {
    let hierarchy_columns: Vec<String> = table
        .columns
        .iter()
        .filter(|c| contains_any(&c.name.to_lowercase(), INDICATOR_WORDS))
        .map(|c| c.name.clone())
        .collect();

    let mut aggregation_lines: BTreeSet<String> = BTreeSet::new();
    'scan: for column in &table.columns {
        for key in column.keys() {
            if aggregation_lines.len() >= AGGREGATION_SAMPLE {
                break 'scan;
            }
            if contains_any(&key.to_lowercase(), AGGREGATION_WORDS) {
                aggregation_lines.insert(key);
            }
        }
    }

    if hierarchy_columns.is_empty() && aggregation_lines.is_empty() {
        return None;
    }

    let levels = hierarchy_columns
        .iter()
        .filter(|c| c.to_lowercase().contains("level"))
        .count();

    Some(HierarchyIndicators {
        table: table.name.clone(),
        hierarchy_columns,
        levels,
        aggregation_lines: aggregation_lines.into_iter().collect(),
    })
}
