//! `crossmap`: cross-table mapping discovery and financial consolidation engine.
//!
//! Pure engine crate: loads tables, infers how their columns correspond,
//! detects parent/child hierarchies, rolls amounts up through them and
//! checks algebraic rules over grouped totals. No CLI dependencies.

pub mod config;
pub mod error;
pub mod gap;
pub mod hierarchy;
pub mod matcher;
pub mod model;
pub mod ops;
pub mod rollup;
pub mod similarity;
pub mod table;
pub mod validate;

pub use config::{EngineConfig, RuleType, ValidationJob, ValidationRule};
pub use error::MappingError;
pub use hierarchy::{AnalysisRequest, Hierarchy, HierarchyPattern};
pub use model::{Report, UNMAPPED};
pub use rollup::{LeafAmounts, Rollup, RollupRequest};
pub use table::{Column, ColumnType, Table, Value};
pub use validate::{GroupTotals, ValueMapping};
