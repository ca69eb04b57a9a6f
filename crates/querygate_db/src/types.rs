//! Result types shared by every execution backend.

use base64::Engine as _;
use serde::{Serialize, Serializer};

/// A single cell returned by the store.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
}

impl DbValue {
    /// Render the cell as JSON. Blobs are base64 encoded.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            DbValue::Null => serde_json::Value::Null,
            DbValue::Integer(v) => serde_json::Value::from(*v),
            DbValue::Real(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            DbValue::Text(v) => serde_json::Value::String(v.clone()),
            DbValue::Blob(v) => serde_json::Value::String(
                base64::engine::general_purpose::STANDARD.encode(v),
            ),
            DbValue::Boolean(v) => serde_json::Value::Bool(*v),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DbValue::Null)
    }
}

impl Serialize for DbValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl From<i64> for DbValue {
    fn from(v: i64) -> Self {
        DbValue::Integer(v)
    }
}

impl From<f64> for DbValue {
    fn from(v: f64) -> Self {
        DbValue::Real(v)
    }
}

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        DbValue::Text(v.to_string())
    }
}

impl From<String> for DbValue {
    fn from(v: String) -> Self {
        DbValue::Text(v)
    }
}

impl From<bool> for DbValue {
    fn from(v: bool) -> Self {
        DbValue::Boolean(v)
    }
}

/// Columns and rows produced by one statement.
///
/// Mutating statements carry no columns and report `rows_affected` instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<DbValue>>,
    pub rows_affected: u64,
    /// Set when rows were dropped to honor a row budget.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl QueryOutput {
    /// Output of a statement that returns no result set.
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            ..Self::default()
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Look up a cell by row index and column name.
    pub fn cell(&self, row: usize, column: &str) -> Option<&DbValue> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).and_then(|r| r.get(index))
    }

    /// Drop rows beyond `max_rows`, flagging the output as truncated.
    pub fn enforce_row_limit(mut self, max_rows: usize) -> Self {
        if self.rows.len() > max_rows {
            self.rows.truncate(max_rows);
            self.truncated = true;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_lookup_by_column_name() {
        let output = QueryOutput {
            columns: vec!["drug_id".to_string(), "drug_name".to_string()],
            rows: vec![vec![DbValue::from(4), DbValue::from("Oxycodone")]],
            ..QueryOutput::default()
        };

        assert_eq!(output.cell(0, "drug_name"), Some(&DbValue::from("Oxycodone")));
        assert_eq!(output.cell(0, "missing"), None);
        assert_eq!(output.cell(1, "drug_id"), None);
    }

    #[test]
    fn test_enforce_row_limit() {
        let output = QueryOutput {
            columns: vec!["n".to_string()],
            rows: (0..5).map(|i| vec![DbValue::from(i as i64)]).collect(),
            ..QueryOutput::default()
        };

        let limited = output.clone().enforce_row_limit(3);
        assert_eq!(limited.row_count(), 3);
        assert!(limited.truncated);

        let untouched = output.enforce_row_limit(10);
        assert_eq!(untouched.row_count(), 5);
        assert!(!untouched.truncated);
    }

    #[test]
    fn test_json_rendering() {
        assert_eq!(DbValue::Null.to_json(), serde_json::Value::Null);
        assert_eq!(DbValue::from(0.1).to_json(), serde_json::json!(0.1));
        assert_eq!(DbValue::Blob(vec![1, 2, 3]).to_json(), serde_json::json!("AQID"));
    }
}
