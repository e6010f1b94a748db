//! Value types for portico-adapter
//!
//! The value model is the common denominator of the four supported engines,
//! so the same type serves both driver parameter binding and the pipeline
//! wire format.

use serde::{Deserialize, Serialize};

/// SQL value that every supported engine can represent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean value (stored as integer by engines without a native type)
    Bool { value: bool },
    /// 64-bit signed integer
    Integer { value: i64 },
    /// 64-bit floating point
    Float { value: f64 },
    /// Text string
    Text { value: String },
    /// Binary data
    Blob { value: Vec<u8> },
}

impl Value {
    /// Check if value is NULL
    #[inline]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Try to convert to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer { value } => Some(*value),
            Self::Bool { value } => Some(i64::from(*value)),
            Self::Float { value } if value.is_finite() => Some(*value as i64),
            Self::Text { value } => value.parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float { value } => Some(*value),
            Self::Integer { value } => Some(*value as f64),
            Self::Text { value } => value.parse().ok(),
            _ => None,
        }
    }

    /// Try to convert to string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text { value } => Some(value.as_str()),
            _ => None,
        }
    }

    /// Render the value for display (raw-row dumps, logs)
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Bool { value } => value.to_string(),
            Self::Integer { value } => value.to_string(),
            Self::Float { value } => value.to_string(),
            Self::Text { value } => value.clone(),
            Self::Blob { value } => format!("<{} bytes>", value.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer { value }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float { value }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool { value }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text {
            value: value.to_string(),
        }
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text { value }
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob { value }
    }
}

/// A single result row: column names plus values, index-aligned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Column names in result order
    pub columns: Vec<String>,
    /// Values, index-aligned with `columns`
    pub values: Vec<Value>,
}

impl Row {
    /// Create a new row
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Get a value by column name
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Result of executing a single statement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names (empty for statements without a result set)
    pub columns: Vec<String>,
    /// Result rows
    pub rows: Vec<Row>,
    /// Rows affected by a write statement
    pub affected_rows: u64,
    /// Last inserted row id, when the engine reports one
    pub last_insert_rowid: Option<i64>,
}

impl QueryResult {
    /// Result of a write with no result set
    pub fn affected(affected_rows: u64) -> Self {
        Self {
            affected_rows,
            ..Default::default()
        }
    }

    /// Take the first row, if any
    pub fn into_first_row(self) -> Option<Row> {
        self.rows.into_iter().next()
    }
}
