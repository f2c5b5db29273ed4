//! Result rows returned by [`InstanceGateway::execute`](super::InstanceGateway::execute).
//!
//! Columns are keyed by name; typed getters turn a missing or mistyped
//! column into a transport error instead of a panic.

use std::collections::BTreeMap;

use serde_json::Value;

use super::errors::{GatewayError, GatewayResult};

/// Result set.
pub type Rows = Vec<Row>;

/// One result row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder used by gateway implementations.
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.columns.insert(column.to_string(), value.into());
        self
    }

    /// Raw column value.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    fn missing(column: &str) -> GatewayError {
        GatewayError::unexpected_result(format!("missing or mistyped column '{}'", column))
    }

    pub fn str(&self, column: &str) -> GatewayResult<&str> {
        self.opt_str(column).ok_or_else(|| Self::missing(column))
    }

    /// String column; `None` for SQL NULL or a missing column.
    pub fn opt_str(&self, column: &str) -> Option<&str> {
        self.columns.get(column).and_then(Value::as_str)
    }

    pub fn u64(&self, column: &str) -> GatewayResult<u64> {
        self.opt_u64(column).ok_or_else(|| Self::missing(column))
    }

    pub fn opt_u64(&self, column: &str) -> Option<u64> {
        self.columns.get(column).and_then(Value::as_u64)
    }

    pub fn f64(&self, column: &str) -> GatewayResult<f64> {
        self.columns
            .get(column)
            .and_then(Value::as_f64)
            .ok_or_else(|| Self::missing(column))
    }

    pub fn bool(&self, column: &str) -> GatewayResult<bool> {
        self.columns
            .get(column)
            .and_then(Value::as_bool)
            .ok_or_else(|| Self::missing(column))
    }
}

/// First row of a result, or an error naming what was expected.
pub fn single_row<'a>(rows: &'a Rows, what: &str) -> GatewayResult<&'a Row> {
    rows.first()
        .ok_or_else(|| GatewayError::unexpected_result(format!("empty result for {}", what)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_getters() {
        let row = Row::new()
            .with("name", "x")
            .with("count", 3u64)
            .with("flag", true)
            .with("ratio", 1.5)
            .with("nothing", Value::Null);
        assert_eq!(row.str("name").unwrap(), "x");
        assert_eq!(row.u64("count").unwrap(), 3);
        assert!(row.bool("flag").unwrap());
        assert_eq!(row.f64("ratio").unwrap(), 1.5);
        assert!(row.opt_str("nothing").is_none());
        assert!(row.str("count").is_err());
        assert!(row.u64("absent").is_err());
    }

    #[test]
    fn test_single_row() {
        let rows: Rows = vec![];
        assert!(single_row(&rows, "identity").is_err());
    }
}
