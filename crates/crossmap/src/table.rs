//! In-memory tables and the CSV loader that materializes them.
//!
//! Tables are read-only once loaded. Every non-null value exposes a canonical
//! string key so columns of different physical types can be compared as sets.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::MappingError;

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Coarse declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Numeric,
    String,
    Temporal,
}

impl ColumnType {
    /// Numeric pairs with numeric, string with string; anything else only
    /// with an identical declared type.
    pub fn compatible_with(self, other: ColumnType) -> bool {
        self == other
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Numeric => write!(f, "numeric"),
            Self::String => write!(f, "string"),
            Self::Temporal => write!(f, "temporal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        self.key().is_none()
    }

    /// Canonical comparison key. Blank text counts as null; integral floats
    /// render without a fractional part so `1` and `1.0` share a key.
    pub fn key(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Int(i) => Some(i.to_string()),
            Self::Float(f) => {
                if f.is_nan() {
                    None
                } else if f.fract() == 0.0 && f.abs() < 1e15 {
                    Some(format!("{}", *f as i64))
                } else {
                    Some(f.to_string())
                }
            }
            Self::Text(s) => {
                let t = s.trim();
                if t.is_empty() {
                    None
                } else {
                    Some(t.to_string())
                }
            }
            Self::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        }
    }

    /// Numeric reading of the value. Text is parsed; dates are not numbers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Text(s) => s.trim().parse().ok(),
            Self::Null | Self::Date(_) => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

// ---------------------------------------------------------------------------
// Column + Table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    pub values: Vec<Value>,
}

impl Column {
    /// Build a column, inferring its declared type from the non-null values.
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        let column_type = infer_type(&values);
        Self {
            name: name.into(),
            column_type,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn non_null_count(&self) -> usize {
        self.values.iter().filter(|v| !v.is_null()).count()
    }

    /// Canonical keys of all non-null values, null-aware and ordered.
    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.values.iter().filter_map(Value::key)
    }

    /// Distinct non-null keys, sorted.
    pub fn unique_keys(&self) -> BTreeSet<String> {
        self.keys().collect()
    }

    pub fn unique_count(&self) -> usize {
        self.unique_keys().len()
    }

    /// Every non-null value is distinct (and there is at least one).
    pub fn is_fully_unique(&self) -> bool {
        let non_null = self.non_null_count();
        non_null > 0 && self.unique_count() == non_null
    }

    pub fn get(&self, row: usize) -> &Value {
        static NULL: Value = Value::Null;
        self.values.get(row).unwrap_or(&NULL)
    }
}

fn infer_type(values: &[Value]) -> ColumnType {
    let mut numeric = true;
    let mut temporal = true;
    let mut seen = false;
    for v in values.iter().filter(|v| !v.is_null()) {
        seen = true;
        match v {
            Value::Int(_) | Value::Float(_) => temporal = false,
            Value::Date(_) => numeric = false,
            _ => {
                numeric = false;
                temporal = false;
            }
        }
    }
    if !seen {
        ColumnType::String
    } else if numeric {
        ColumnType::Numeric
    } else if temporal {
        ColumnType::Temporal
    } else {
        ColumnType::String
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Result<&Column, MappingError> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| MappingError::MissingColumn {
                table: self.name.clone(),
                column: name.to_string(),
            })
    }

    pub fn row_count(&self) -> usize {
        self.columns.iter().map(Column::len).max().unwrap_or(0)
    }

    /// Rows whose `column` key equals the given value, for every filter.
    /// Filters naming a column this table lacks are skipped.
    pub fn filter_rows(&self, filters: &BTreeMap<String, String>) -> Table {
        let mut active: Vec<(&Column, &str)> = Vec::new();
        for (column, value) in filters {
            match self.column(column) {
                Ok(c) => active.push((c, value.trim())),
                Err(_) => log::warn!("{}: filter column '{column}' not found, skipped", self.name),
            }
        }
        if active.is_empty() {
            return self.clone();
        }

        let keep: Vec<usize> = (0..self.row_count())
            .filter(|&i| {
                active
                    .iter()
                    .all(|(c, v)| c.get(i).key().as_deref() == Some(*v))
            })
            .collect();
        log::debug!("{}: filters kept {} of {} rows", self.name, keep.len(), self.row_count());

        let columns = self
            .columns
            .iter()
            .map(|c| Column::new(c.name.clone(), keep.iter().map(|&i| c.get(i).clone()).collect()))
            .collect();
        Table::new(self.name.clone(), columns)
    }

    /// Numeric reading of every row of `column`. Nulls read as 0; any other
    /// non-numeric cell is an error naming its 1-based row.
    pub fn amounts(&self, column: &str) -> Result<Vec<f64>, MappingError> {
        let col = self.column(column)?;
        (0..self.row_count())
            .map(|i| {
                let v = col.get(i);
                if v.is_null() {
                    return Ok(0.0);
                }
                v.as_f64().ok_or_else(|| MappingError::AmountParse {
                    table: self.name.clone(),
                    row: i + 1,
                    value: v.key().unwrap_or_default(),
                })
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // CSV loading
    // -----------------------------------------------------------------------

    /// Parse CSV text (delimiter sniffed) into a typed table.
    pub fn from_csv_str(name: &str, data: &str) -> Result<Self, MappingError> {
        let delimiter = sniff_delimiter(data);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(data.as_bytes());

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().trim_start_matches('\u{feff}').to_string())
            .collect();

        if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
            return Err(MappingError::EmptyTable(name.to_string()));
        }

        let mut raw: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for record in reader.records() {
            let record = record?;
            for (i, cells) in raw.iter_mut().enumerate() {
                cells.push(record.get(i).unwrap_or("").to_string());
            }
        }

        let columns = headers
            .into_iter()
            .zip(raw)
            .map(|(header, cells)| parse_column(header, cells))
            .collect();

        Ok(Self::new(name, columns))
    }

    /// Read a CSV file. Invalid UTF-8 is decoded lossily; the table is named
    /// after the file stem.
    pub fn from_csv_path(path: &Path) -> Result<Self, MappingError> {
        let bytes = std::fs::read(path)
            .map_err(|e| MappingError::Io(format!("cannot read {}: {e}", path.display())))?;
        let content = String::from_utf8_lossy(&bytes);
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_csv_str(&name, &content)
    }
}

/// Type a column of raw cells: all-int, all-float, all-date, else text.
fn parse_column(name: String, cells: Vec<String>) -> Column {
    let filled = || cells.iter().map(|c| c.trim()).filter(|c| !c.is_empty());

    let values: Vec<Value> = if filled().all(|c| c.parse::<i64>().is_ok()) {
        cells
            .iter()
            .map(|c| c.trim().parse::<i64>().map(Value::Int).unwrap_or(Value::Null))
            .collect()
    } else if filled().all(|c| c.parse::<f64>().is_ok()) {
        cells
            .iter()
            .map(|c| c.trim().parse::<f64>().map(Value::Float).unwrap_or(Value::Null))
            .collect()
    } else if filled().all(|c| NaiveDate::parse_from_str(c, "%Y-%m-%d").is_ok()) {
        cells
            .iter()
            .map(|c| {
                NaiveDate::parse_from_str(c.trim(), "%Y-%m-%d")
                    .map(Value::Date)
                    .unwrap_or(Value::Null)
            })
            .collect()
    } else {
        cells
            .into_iter()
            .map(|c| if c.trim().is_empty() { Value::Null } else { Value::Text(c) })
            .collect()
    };

    Column::new(name, values)
}

/// Pick the delimiter whose field count (more than one) holds steadiest over
/// the first ten lines. Comma when nothing splits.
fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample_lines: Vec<&str> = content.lines().take(10).collect();

    let mut best = b',';
    let mut best_score = 0u64;

    for &delim in candidates {
        let counts: Vec<usize> = sample_lines
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        let target = counts.first().copied().unwrap_or(0);
        if target <= 1 {
            continue;
        }

        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;
        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}
