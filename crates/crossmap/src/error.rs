use std::fmt;

#[derive(Debug)]
pub enum MappingError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (threshold out of range, missing rule field, etc.).
    ConfigValidation(String),
    /// A referenced column does not exist in the table.
    MissingColumn { table: String, column: String },
    /// A measure cell could not be read as a number.
    AmountParse { table: String, row: usize, value: String },
    /// Table has no columns (or no header row).
    EmptyTable(String),
    /// A named table was not among the loaded tables.
    TableNotFound(String),
    /// CSV read error.
    Csv(String),
    /// IO error (file read, etc.).
    Io(String),
}

impl fmt::Display for MappingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::MissingColumn { table, column } => {
                write!(f, "table '{table}': missing column '{column}'")
            }
            Self::AmountParse { table, row, value } => {
                write!(f, "table '{table}', row {row}: cannot parse amount '{value}'")
            }
            Self::EmptyTable(name) => write!(f, "table '{name}' has no columns"),
            Self::TableNotFound(name) => write!(f, "table not found: {name}"),
            Self::Csv(msg) => write!(f, "CSV error: {msg}"),
            Self::Io(msg) => write!(f, "IO error: {msg}"),
        }
    }
}

impl std::error::Error for MappingError {}

impl From<csv::Error> for MappingError {
    fn from(e: csv::Error) -> Self {
        Self::Csv(e.to_string())
    }
}

impl From<std::io::Error> for MappingError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
