//! Subcommand implementations. Each prints one JSON envelope on stdout and a
//! short human summary on stderr.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crossmap::hierarchy::{self, AnalysisRequest};
use crossmap::model::{HierarchyKind, Report};
use crossmap::{gap, matcher, ops, rollup};
use crossmap::{EngineConfig, MappingError, RollupRequest, Table};

use crate::exit_codes::{EXIT_ENGINE, EXIT_USAGE, EXIT_VALIDATION_FAILED};
use crate::CliError;

/// Read `--config`, or fall back to defaults.
pub fn load_settings(path: Option<&Path>) -> Result<Option<EngineConfig>, CliError> {
    let Some(path) = path else {
        return Ok(None);
    };
    let text = std::fs::read_to_string(path)
        .map_err(|e| CliError::io(format!("cannot read config {}: {e}", path.display())))?;
    EngineConfig::from_toml(&text)
        .map(Some)
        .map_err(CliError::mapping)
}

/// Tables are named after their file stem, so two inputs sharing a stem
/// would shadow each other.
fn check_distinct_stems(paths: &[PathBuf]) -> Result<(), CliError> {
    let mut seen: HashMap<String, &Path> = HashMap::new();
    for path in paths {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        if let Some(first) = seen.insert(stem.clone(), path.as_path()) {
            return Err(CliError {
                code: EXIT_USAGE,
                message: format!(
                    "{} and {} would both load as table '{stem}'",
                    first.display(),
                    path.display()
                ),
                hint: Some("copy or rename one file so every input has a distinct name".to_string()),
            });
        }
    }
    Ok(())
}

fn load_tables(paths: &[PathBuf]) -> Result<Vec<Table>, MappingError> {
    paths.iter().map(|p| Table::from_csv_path(p)).collect()
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| CliError {
        code: EXIT_ENGINE,
        message: format!("JSON serialization error: {e}"),
        hint: None,
    })?;
    println!("{json}");
    Ok(())
}

/// Print the failure envelope for `err`.
fn fail(err: MappingError) -> CliError {
    if let Err(e) = print_json(&Report::<()>::failure(err.to_string())) {
        return e;
    }
    CliError::mapping(err)
}

/// Print the envelope for `result` and hand back the body.
fn emit<T: Serialize>(result: Result<T, MappingError>) -> Result<T, CliError> {
    let body = result.map_err(fail)?;
    print_json(&Report::ok(&body))?;
    Ok(body)
}

// ---------------------------------------------------------------------------
// discover / relationships
// ---------------------------------------------------------------------------

pub fn cmd_discover(
    source: PathBuf,
    others: Vec<PathBuf>,
    threshold: Option<f64>,
    mut config: EngineConfig,
) -> Result<(), CliError> {
    if let Some(t) = threshold {
        if !(t > 0.0 && t <= 1.0) {
            return Err(CliError {
                code: EXIT_USAGE,
                message: format!("--threshold must be in (0, 1], got {t}"),
                hint: Some("use a ratio such as 0.7, not a percentage".to_string()),
            });
        }
        config.matcher.discovery_threshold = t;
    }

    let mut paths = vec![source];
    paths.extend(others);
    check_distinct_stems(&paths)?;
    let tables = load_tables(&paths).map_err(fail)?;
    let source_name = tables[0].name.clone();

    let report = emit(matcher::discover_mappings(&tables, &source_name, &config.matcher))?;
    eprintln!(
        "discover: {} mappings from '{}' across {} tables, {} join paths",
        report.discovered_mappings.len(),
        source_name,
        tables.len() - 1,
        report.suggested_join_paths.len(),
    );
    Ok(())
}

pub fn cmd_relationships(files: Vec<PathBuf>, config: EngineConfig) -> Result<(), CliError> {
    check_distinct_stems(&files)?;
    let tables = load_tables(&files);
    let report = emit(tables.map(|t| ops::relationships_body(&t, &config)))?;
    eprintln!(
        "relationships: {} candidates over {} tables",
        report.relationships.len(),
        report.tables.len(),
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// hierarchy / rollup
// ---------------------------------------------------------------------------

pub fn cmd_hierarchy(
    file: PathBuf,
    parent: Option<String>,
    child: Option<String>,
    levels: Vec<String>,
    config: EngineConfig,
) -> Result<(), CliError> {
    let request = AnalysisRequest { parent, child, levels };
    let analysis = emit(
        Table::from_csv_path(&file).and_then(|t| hierarchy::analyze(&t, &request, &config.hierarchy)),
    )?;

    match analysis.hierarchy_type {
        HierarchyKind::ParentChild => eprintln!(
            "hierarchy: parent/child ({}), depth {}, {} roots, {} leaves",
            analysis
                .pattern
                .map(|p| p.to_string())
                .unwrap_or_default(),
            analysis.max_depth,
            analysis.root_count,
            analysis.leaf_count,
        ),
        HierarchyKind::LevelBased => eprintln!(
            "hierarchy: {} level columns",
            analysis.detected_level_columns.len()
        ),
        HierarchyKind::NoneDetected => eprintln!("hierarchy: none detected"),
    }
    Ok(())
}

pub struct RollupArgs {
    pub source: PathBuf,
    pub hierarchy: PathBuf,
    pub request: RollupRequest,
}

pub fn cmd_rollup(args: RollupArgs, config: EngineConfig) -> Result<(), CliError> {
    let result = Table::from_csv_path(&args.source).and_then(|source| {
        let tree = Table::from_csv_path(&args.hierarchy)?;
        rollup::rollup_through_hierarchy(&source, &tree, &args.request, &config)
    });
    let report = emit(result)?;
    eprintln!(
        "rollup '{}': {:.2} ({}, {} self-referencing rows)",
        report.target_rollup, report.total, report.hierarchy_pattern, report.self_referencing_rows,
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// validate / compare
// ---------------------------------------------------------------------------

pub fn cmd_validate(job: PathBuf, settings: Option<EngineConfig>) -> Result<(), CliError> {
    let report = emit(ops::run_job_result(&job, settings.as_ref()))?;

    for rule in &report.rules {
        eprintln!(
            "  {:<18} {}  {}",
            rule.rule_type.to_string(),
            if rule.passed { "pass" } else { "FAIL" },
            rule.details.equation,
        );
    }
    if let Some(cov) = &report.mapping_coverage {
        eprintln!(
            "coverage: {}/{} rows mapped ({:.1}%), unmapped total {:.2}",
            cov.mapped_rows,
            cov.mapped_rows + cov.unmapped_rows,
            cov.coverage_pct,
            report.unmapped_total,
        );
    }

    let failed = report.rules.iter().filter(|r| !r.passed).count();
    if failed > 0 {
        return Err(CliError {
            code: EXIT_VALIDATION_FAILED,
            message: format!(
                "validation '{}' failed: {failed} of {} rules",
                report.name,
                report.rules.len()
            ),
            hint: None,
        });
    }
    eprintln!("validation '{}' passed", report.name);
    Ok(())
}

pub fn cmd_compare(
    source: PathBuf,
    report: PathBuf,
    source_column: String,
    report_column: String,
) -> Result<(), CliError> {
    let result = Table::from_csv_path(&source).and_then(|s| {
        let r = Table::from_csv_path(&report)?;
        gap::compare_structures(&s, &source_column, &r, &report_column)
    });
    let cmp = emit(result)?;
    eprintln!(
        "compare: {}/{} source values found in report ({:.1}%), {} fuzzy suggestions",
        cmp.exact_matches,
        cmp.source_unique_values,
        cmp.coverage_percentage,
        cmp.potential_fuzzy_matches.len(),
    );
    Ok(())
}
