// crossmap CLI - mapping discovery, hierarchy rollup and rule validation over CSV tables

mod commands;
mod exit_codes;
mod logger;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use crossmap::{MappingError, RollupRequest};

use exit_codes::{mapping_exit_code, EXIT_CONFIG, EXIT_IO, EXIT_SUCCESS};

#[derive(Parser)]
#[command(name = "crossmap")]
#[command(about = "Discover mappings between tables, roll amounts up hierarchies, validate totals")]
#[command(version)]
struct Cli {
    /// Engine settings file (TOML: [matcher], [hierarchy], [validator])
    #[arg(long, global = true, env = "CROSSMAP_CONFIG")]
    config: Option<PathBuf>,

    /// Log detection decisions to stderr
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find columns in other tables that correspond to columns of a source table
    #[command(after_help = "\
Examples:
  crossmap discover gl.csv chart.csv
  crossmap discover customers.csv orders.csv invoices.csv --threshold 0.8")]
    Discover {
        /// Source table
        source: PathBuf,

        /// Tables to search for matching columns
        #[arg(required = true)]
        others: Vec<PathBuf>,

        /// Minimum exact/fuzzy match ratio (0-1]
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Score column relationships (1:1, 1:N, N:1, N:N) across tables
    #[command(after_help = "\
Examples:
  crossmap relationships customers.csv orders.csv")]
    Relationships {
        /// Two or more tables
        #[arg(num_args = 2.., required = true)]
        files: Vec<PathBuf>,
    },

    /// Detect parent/child or level-based hierarchies in a table
    #[command(after_help = "\
Examples:
  crossmap hierarchy tree.csv
  crossmap hierarchy formula.csv --parent 'Formula Header' --child 'Formula Element'
  crossmap hierarchy report.csv --level level_1 --level level_2")]
    Hierarchy {
        file: PathBuf,

        /// Parent column (auto-detected when omitted)
        #[arg(long)]
        parent: Option<String>,

        /// Child column (auto-detected when omitted)
        #[arg(long)]
        child: Option<String>,

        /// Level column, outermost first. Repeatable.
        #[arg(long = "level", value_name = "COLUMN")]
        levels: Vec<String>,
    },

    /// Roll source amounts up through a hierarchy to a target node
    #[command(after_help = "\
Examples:
  crossmap rollup --source gl.csv --hierarchy tree.csv --label account --amount amount --target 'Total Assets'
  crossmap rollup --source gl.csv --hierarchy tree.csv --label account --amount amount --target 'Total Assets' --detail")]
    Rollup {
        /// Table holding labelled amounts
        #[arg(long)]
        source: PathBuf,

        /// Table holding the parent/child hierarchy
        #[arg(long)]
        hierarchy: PathBuf,

        /// Source column with the amount
        #[arg(long)]
        amount: String,

        /// Source column with the node label
        #[arg(long)]
        label: String,

        /// Node to roll up to
        #[arg(long)]
        target: String,

        #[arg(long)]
        parent: Option<String>,

        #[arg(long)]
        child: Option<String>,

        /// Include the per-node breakdown tree
        #[arg(long)]
        detail: bool,
    },

    /// Run a validation job file (exit 1 when a rule fails)
    #[command(after_help = "\
Examples:
  crossmap validate close.job.toml
  crossmap validate close.job.toml --config strict.toml")]
    Validate {
        /// Path to the job TOML
        job: PathBuf,
    },

    /// Compare the distinct values of a source column against a report column
    #[command(after_help = "\
Examples:
  crossmap compare chart.csv report.csv --source-column account_name --report-column line")]
    Compare {
        source: PathBuf,
        report: PathBuf,

        #[arg(long)]
        source_column: String,

        #[arg(long)]
        report_column: String,
    },
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn io(msg: impl Into<String>) -> Self {
        Self { code: EXIT_IO, message: msg.into(), hint: None }
    }

    pub fn mapping(err: MappingError) -> Self {
        let code = mapping_exit_code(&err);
        let hint = match &err {
            MappingError::MissingColumn { .. } => {
                Some("column names are matched exactly; check the CSV header".to_string())
            }
            _ if code == EXIT_CONFIG => {
                Some("see [matcher], [hierarchy] and [validator] settings and rule fields".to_string())
            }
            _ => None,
        };
        Self { code, message: err.to_string(), hint }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logger::init(cli.verbose);

    let result = run(cli);

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let settings = commands::load_settings(cli.config.as_deref())?;

    match cli.command {
        // Jobs carry their own [settings]; --config replaces them.
        Commands::Validate { job } => commands::cmd_validate(job, settings),
        Commands::Discover { source, others, threshold } => {
            commands::cmd_discover(source, others, threshold, settings.unwrap_or_default())
        }
        Commands::Relationships { files } => {
            commands::cmd_relationships(files, settings.unwrap_or_default())
        }
        Commands::Hierarchy { file, parent, child, levels } => {
            commands::cmd_hierarchy(file, parent, child, levels, settings.unwrap_or_default())
        }
        Commands::Rollup { source, hierarchy, amount, label, target, parent, child, detail } => {
            let args = commands::RollupArgs {
                source,
                hierarchy,
                request: RollupRequest {
                    label_column: label,
                    amount_column: amount,
                    parent_column: parent,
                    child_column: child,
                    target,
                    include_breakdown: detail,
                },
            };
            commands::cmd_rollup(args, settings.unwrap_or_default())
        }
        Commands::Compare { source, report, source_column, report_column } => {
            commands::cmd_compare(source, report, source_column, report_column)
        }
    }
}
