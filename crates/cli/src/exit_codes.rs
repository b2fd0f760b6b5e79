//! CLI Exit Code Registry
//!
//! Single source of truth for `crossmap` exit codes. Scripts rely on them.
//!
//! | Code | Meaning                                                  |
//! |------|----------------------------------------------------------|
//! | 0    | Success                                                  |
//! | 1    | Validation ran and at least one rule failed              |
//! | 2    | Usage error (bad arguments; clap uses this too)          |
//! | 3    | I/O error (unreadable file, malformed CSV, empty table)  |
//! | 4    | Configuration error (settings or job file invalid)       |
//! | 5    | Engine failure (missing column, bad amount, no table)    |

use crossmap::MappingError;

/// Success - command completed, and any validation passed.
pub const EXIT_SUCCESS: u8 = 0;

/// Validation ran to completion and reported a failing rule.
pub const EXIT_VALIDATION_FAILED: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

pub const EXIT_IO: u8 = 3;

pub const EXIT_CONFIG: u8 = 4;

pub const EXIT_ENGINE: u8 = 5;

pub fn mapping_exit_code(err: &MappingError) -> u8 {
    match err {
        MappingError::ConfigParse(_) | MappingError::ConfigValidation(_) => EXIT_CONFIG,
        MappingError::Io(_) | MappingError::Csv(_) | MappingError::EmptyTable(_) => EXIT_IO,
        MappingError::MissingColumn { .. }
        | MappingError::AmountParse { .. }
        | MappingError::TableNotFound(_) => EXIT_ENGINE,
    }
}
