//! Query engine contract.
//!
//! The export pipeline never manages connections itself. It consumes a
//! [`QueryEngine`] that already has the working table loaded and can describe
//! it, answer queries, and run export directives through its vector driver.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// One result row, keyed by output column name.
pub type Row = Map<String, Value>;

/// Result type alias for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by a query engine implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not open its database or prepare the connection
    #[error("Failed to open database '{database}': {message}")]
    Connect {
        /// Database the engine tried to open
        database: String,
        /// Message reported by the engine, preserved verbatim
        message: String,
    },

    /// The engine rejected or failed to run a statement
    #[error("Statement failed: {message}")]
    Statement {
        /// Message reported by the engine, preserved verbatim
        message: String,
    },

    /// The engine answered with output that could not be decoded
    #[error("Failed to decode engine output: {message}")]
    Decode {
        /// Description of the decoding problem
        message: String,
    },

    /// A result row is missing an expected column
    #[error("Result row is missing column '{column}'")]
    MissingColumn {
        /// The expected column name
        column: String,
    },
}

/// A query engine holding the working table.
///
/// Implementations are not assumed to be reentrant: callers issue one
/// statement at a time and implementations may serialize internally.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Describes `table`, returning `(column name, declared type)` pairs in
    /// column order. The declared type is the engine's raw type string.
    async fn describe(&self, table: &str) -> EngineResult<Vec<(String, String)>>;

    /// Runs a query and returns its rows.
    async fn query(&self, sql: &str) -> EngineResult<Vec<Row>>;

    /// Runs a statement that produces no rows, such as an export directive.
    async fn execute(&self, sql: &str) -> EngineResult<()>;
}

/// Typed accessors over [`Row`].
pub trait RowExt {
    /// Returns the value of `column` as a string, `None` when it is NULL.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingColumn`] if the column is absent and
    /// [`EngineError::Decode`] if the value is not a string.
    fn opt_str(&self, column: &str) -> EngineResult<Option<&str>>;

    /// Returns the value of `column` as an unsigned integer.
    ///
    /// Engines that render big integers as strings are accepted too.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingColumn`] if the column is absent and
    /// [`EngineError::Decode`] if the value is not a non-negative integer.
    fn u64_value(&self, column: &str) -> EngineResult<u64>;
}

impl RowExt for Row {
    fn opt_str(&self, column: &str) -> EngineResult<Option<&str>> {
        match self.get(column) {
            None => Err(EngineError::MissingColumn {
                column: column.to_string(),
            }),
            Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(EngineError::Decode {
                message: format!("column '{column}' is not a string: {other}"),
            }),
        }
    }

    fn u64_value(&self, column: &str) -> EngineResult<u64> {
        let value = self.get(column).ok_or_else(|| EngineError::MissingColumn {
            column: column.to_string(),
        })?;

        let parsed = match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        };

        parsed.ok_or_else(|| EngineError::Decode {
            message: format!("column '{column}' is not a non-negative integer: {value}"),
        })
    }
}
