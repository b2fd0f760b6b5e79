//! Public entry points. Each returns a [`Report`] envelope; failures are
//! logged and carried as `{"success": false, "error": ...}`.
//!
//! The `*_result` variants keep the typed error for callers that need to
//! tell failure kinds apart.

use std::path::{Path, PathBuf};

use crate::config::{EngineConfig, ValidationJob, ValidationRule};
use crate::error::MappingError;
use crate::gap;
use crate::hierarchy::{self, AnalysisRequest};
use crate::matcher;
use crate::model::{
    DiscoveryReport, HierarchyAnalysis, JobReport, RelationshipReport, Report, RollupReport,
    StructureComparison, ValidationReport,
};
use crate::rollup::{self, RollupRequest};
use crate::table::Table;
use crate::validate::{self, ValueMapping};

pub fn discover(tables: &[Table], source: &str, config: &EngineConfig) -> Report<DiscoveryReport> {
    Report::from_result(matcher::discover_mappings(tables, source, &config.matcher))
}

pub fn relationships(tables: &[Table], config: &EngineConfig) -> Report<RelationshipReport> {
    Report::ok(relationships_body(tables, config))
}

pub fn relationships_body(tables: &[Table], config: &EngineConfig) -> RelationshipReport {
    RelationshipReport {
        tables: tables.iter().map(|t| t.name.clone()).collect(),
        relationships: matcher::find_relationships(tables, &config.matcher),
    }
}

pub fn analyze_hierarchy(
    table: &Table,
    request: &AnalysisRequest,
    config: &EngineConfig,
) -> Report<HierarchyAnalysis> {
    Report::from_result(hierarchy::analyze(table, request, &config.hierarchy))
}

pub fn rollup(
    source: &Table,
    hierarchy_table: &Table,
    request: &RollupRequest,
    config: &EngineConfig,
) -> Report<RollupReport> {
    Report::from_result(rollup::rollup_through_hierarchy(
        source,
        hierarchy_table,
        request,
        config,
    ))
}

pub fn validate_amounts(
    source: &Table,
    label_col: &str,
    amount_col: &str,
    mapping: Option<&ValueMapping>,
    rule: &ValidationRule,
    config: &EngineConfig,
) -> Report<ValidationReport> {
    Report::from_result(validate::validate_amounts(
        source, label_col, amount_col, mapping, rule, config,
    ))
}

pub fn compare_structures(
    source: &Table,
    source_col: &str,
    report: &Table,
    report_col: &str,
) -> Report<StructureComparison> {
    Report::from_result(gap::compare_structures(source, source_col, report, report_col))
}

// ---------------------------------------------------------------------------
// File-driven validation jobs
// ---------------------------------------------------------------------------

/// Run a validation job file. `settings` replaces the job's own `[settings]`
/// when given.
pub fn run_job(path: &Path, settings: Option<&EngineConfig>) -> Report<JobReport> {
    Report::from_result(run_job_result(path, settings))
}

pub fn run_job_result(path: &Path, settings: Option<&EngineConfig>) -> Result<JobReport, MappingError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| MappingError::Io(format!("cannot read {}: {e}", path.display())))?;
    let job = ValidationJob::from_toml(&text)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    run_loaded_job(&job, base, settings)
}

/// Run an already-parsed job; relative file paths resolve against `base`.
pub fn run_loaded_job(
    job: &ValidationJob,
    base: &Path,
    settings: Option<&EngineConfig>,
) -> Result<JobReport, MappingError> {
    let config = settings.unwrap_or(&job.settings);

    let mut source = Table::from_csv_path(&resolve(base, &job.source.file))?;
    if !job.source.filters.is_empty() {
        source = source.filter_rows(&job.source.filters);
    }
    let mapping = match &job.mapping {
        Some(spec) => {
            let table = Table::from_csv_path(&resolve(base, &spec.file))?;
            Some(ValueMapping::from_table(
                &table,
                spec.key_column.as_deref(),
                spec.group_column.as_deref(),
            )?)
        }
        None => None,
    };

    log::info!(
        "job '{}': {} rules over {} rows",
        job.name,
        job.rules.len(),
        source.row_count()
    );

    validate::validate_rules(
        &job.name,
        &source,
        &job.source.label_column,
        &job.source.amount_column,
        mapping.as_ref(),
        &job.rules,
        config,
    )
}

fn resolve(base: &Path, file: &str) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(p)
    }
}
