//! In-process `DuckDB` engine over a single connection.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use duckdb::types::Value as DuckValue;
use duckdb::{AccessMode, Config, Connection, InterruptHandle};
use geoflat_core_common::{EngineError, EngineResult, QueryEngine, Row, RowExt};
use log::{debug, info, warn};
use serde_json::{Number, Value};

/// Options for opening the `DuckDB` database.
#[derive(Debug, Clone)]
pub struct DuckDbOptions {
    /// Extensions loaded once when the connection opens (default: `spatial`)
    pub extensions: Vec<String>,
    /// Install each extension before loading it (default: false)
    pub install_extensions: bool,
    /// Open the database read-only (default: false)
    pub read_only: bool,
}

impl Default for DuckDbOptions {
    fn default() -> Self {
        Self {
            extensions: vec!["spatial".to_string()],
            install_extensions: false,
            read_only: false,
        }
    }
}

impl DuckDbOptions {
    /// Create new options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether extensions are installed before loading
    #[must_use]
    pub fn with_install_extensions(mut self, install: bool) -> Self {
        self.install_extensions = install;
        self
    }

    /// Set read-only mode
    #[must_use]
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Statements run once right after the connection opens.
    pub(crate) fn setup_script(&self) -> String {
        let mut statements = Vec::new();
        for extension in &self.extensions {
            if self.install_extensions {
                statements.push(format!("INSTALL {extension};"));
            }
            statements.push(format!("LOAD {extension};"));
        }
        statements.join("\n")
    }
}

/// A [`QueryEngine`] holding one `DuckDB` connection for its whole lifetime.
///
/// Statements run on the blocking pool one at a time behind the connection
/// lock, so session state such as temporary tables stays visible to every
/// later statement. Dropping an in-flight call interrupts the running
/// statement.
pub struct DuckDbEngine {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
}

impl std::fmt::Debug for DuckDbEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuckDbEngine").finish_non_exhaustive()
    }
}

impl DuckDbEngine {
    /// Opens the database file at `database` and loads the configured
    /// extensions.
    ///
    /// A missing file is created unless `read_only` is set.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Connect`] if the database cannot be opened or an
    /// extension fails to load.
    pub fn open(database: impl AsRef<Path>, options: &DuckDbOptions) -> EngineResult<Self> {
        let database = database.as_ref();
        let label = database.display().to_string();
        let connect_error = |e: duckdb::Error| EngineError::Connect {
            database: label.clone(),
            message: e.to_string(),
        };

        let mode = if options.read_only {
            AccessMode::ReadOnly
        } else {
            AccessMode::ReadWrite
        };
        let config = Config::default().access_mode(mode).map_err(connect_error)?;
        let conn = Connection::open_with_flags(database, config).map_err(connect_error)?;

        info!("Opened DuckDB database {label}");
        Self::with_connection(conn, options, &label)
    }

    fn with_connection(conn: Connection, options: &DuckDbOptions, label: &str) -> EngineResult<Self> {
        let setup = options.setup_script();
        if !setup.is_empty() {
            debug!("duckdb setup: {setup}");
            conn.execute_batch(&setup)
                .map_err(|e| EngineError::Connect {
                    database: label.to_string(),
                    message: e.to_string(),
                })?;
        }

        let interrupt = conn.interrupt_handle();
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
        })
    }

    async fn run<T, F>(&self, sql: &str, work: F) -> EngineResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str) -> duckdb::Result<T> + Send + 'static,
    {
        debug!("duckdb: {sql}");
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let mut guard = InterruptOnDrop {
            handle: Arc::clone(&self.interrupt),
            armed: true,
        };

        let joined = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| EngineError::Statement {
                message: "connection lock poisoned".to_string(),
            })?;
            work(&conn, &sql).map_err(|e| EngineError::Statement {
                message: e.to_string(),
            })
        })
        .await;
        guard.armed = false;

        joined.map_err(|e| EngineError::Statement {
            message: format!("statement task failed: {e}"),
        })?
    }
}

/// Interrupts the connection when a statement's future is dropped before it
/// finishes.
struct InterruptOnDrop {
    handle: Arc<InterruptHandle>,
    armed: bool,
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if self.armed {
            warn!("Interrupting in-flight DuckDB statement");
            self.handle.interrupt();
        }
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn float_value(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

/// Converts one `DuckDB` cell into the engine-neutral JSON value.
fn json_value(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Bool(b),
        DuckValue::TinyInt(v) => v.into(),
        DuckValue::SmallInt(v) => v.into(),
        DuckValue::Int(v) => v.into(),
        DuckValue::BigInt(v) => v.into(),
        DuckValue::HugeInt(v) => {
            i64::try_from(v).map_or_else(|_| Value::String(v.to_string()), Value::from)
        },
        DuckValue::UTinyInt(v) => v.into(),
        DuckValue::USmallInt(v) => v.into(),
        DuckValue::UInt(v) => v.into(),
        DuckValue::UBigInt(v) => v.into(),
        DuckValue::Float(v) => float_value(f64::from(v)),
        DuckValue::Double(v) => float_value(v),
        DuckValue::Text(s) => Value::String(s),
        DuckValue::List(items) => {
            Value::Array(items.into_iter().map(json_value).collect())
        },
        other => Value::String(format!("{other:?}")),
    }
}

#[async_trait]
impl QueryEngine for DuckDbEngine {
    async fn describe(&self, table: &str) -> EngineResult<Vec<(String, String)>> {
        let rows = self
            .query(&format!("DESCRIBE {}", quote_identifier(table)))
            .await?;

        rows.iter()
            .map(|row| {
                let name = row.opt_str("column_name")?.unwrap_or_default().to_string();
                let data_type = row.opt_str("column_type")?.unwrap_or_default().to_string();
                Ok((name, data_type))
            })
            .collect()
    }

    async fn query(&self, sql: &str) -> EngineResult<Vec<Row>> {
        self.run(sql, |conn, sql| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([])?;
            let names = rows
                .as_ref()
                .map(|stmt| stmt.column_names())
                .unwrap_or_default();

            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                let mut record = Row::new();
                for (idx, name) in names.iter().enumerate() {
                    record.insert(name.clone(), json_value(row.get::<_, DuckValue>(idx)?));
                }
                records.push(record);
            }
            Ok(records)
        })
        .await
    }

    async fn execute(&self, sql: &str) -> EngineResult<()> {
        self.run(sql, |conn, sql| conn.execute_batch(sql)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn memory_engine() -> DuckDbEngine {
        let options = DuckDbOptions {
            extensions: Vec::new(),
            ..DuckDbOptions::default()
        };
        DuckDbEngine::with_connection(Connection::open_in_memory().unwrap(), &options, ":memory:")
            .unwrap()
    }

    #[test]
    fn test_setup_script_loads_spatial() {
        assert_eq!(DuckDbOptions::new().setup_script(), "LOAD spatial;");
        assert_eq!(
            DuckDbOptions::new()
                .with_install_extensions(true)
                .setup_script(),
            "INSTALL spatial;\nLOAD spatial;"
        );
    }

    #[test]
    fn test_quote_identifier_escapes_quotes() {
        assert_eq!(quote_identifier("places"), "\"places\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[tokio::test]
    async fn test_temp_table_is_visible_to_later_statements() {
        let engine = memory_engine();
        engine
            .execute("CREATE TEMP TABLE working AS SELECT 1 AS id, 'a' AS name")
            .await
            .unwrap();

        let columns = engine.describe("working").await.unwrap();
        assert_eq!(
            columns,
            vec![
                ("id".to_string(), "INTEGER".to_string()),
                ("name".to_string(), "VARCHAR".to_string()),
            ]
        );

        let rows = engine
            .query("SELECT count(*) AS n FROM working")
            .await
            .unwrap();
        assert_eq!(rows[0].u64_value("n").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_query_converts_cells() {
        let engine = memory_engine();
        let rows = engine
            .query(
                "SELECT 42::BIGINT AS n, NULL AS missing, 1.5::DOUBLE AS x, \
                 true AS flag, 'POINT' AS label, [1, 2] AS xs",
            )
            .await
            .unwrap();

        let row = &rows[0];
        assert_eq!(row["n"], Value::from(42));
        assert_eq!(row["missing"], Value::Null);
        assert_eq!(row["x"], Value::from(1.5));
        assert_eq!(row["flag"], Value::Bool(true));
        assert_eq!(row.opt_str("label").unwrap(), Some("POINT"));
        assert_eq!(row["xs"], serde_json::json!([1, 2]));
    }

    #[tokio::test]
    async fn test_query_without_rows_is_empty() {
        let engine = memory_engine();
        let rows = engine
            .query("SELECT 1 AS n WHERE false")
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_table_is_statement_error() {
        let engine = memory_engine();
        let err = engine.describe("nope").await.unwrap_err();
        assert!(matches!(err, EngineError::Statement { .. }));
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn test_read_only_missing_database_is_connect_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("missing.duckdb");
        let options = DuckDbOptions {
            extensions: Vec::new(),
            ..DuckDbOptions::default()
        }
        .with_read_only(true);

        let err = DuckDbEngine::open(&path, &options).unwrap_err();
        assert!(matches!(err, EngineError::Connect { .. }));
        assert!(err.to_string().contains("missing.duckdb"));
    }

    #[tokio::test]
    async fn test_open_creates_database_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("release.duckdb");
        let options = DuckDbOptions {
            extensions: Vec::new(),
            ..DuckDbOptions::default()
        };

        let engine = DuckDbEngine::open(&path, &options).unwrap();
        engine
            .execute("CREATE TABLE places (id INTEGER)")
            .await
            .unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_unknown_extension_is_connect_error() {
        let options = DuckDbOptions {
            extensions: vec!["no_such_extension".to_string()],
            ..DuckDbOptions::default()
        };
        let err =
            DuckDbEngine::with_connection(Connection::open_in_memory().unwrap(), &options, ":memory:")
                .unwrap_err();
        assert!(matches!(err, EngineError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_dropped_statement_is_interrupted() {
        let engine = memory_engine();

        let slow = engine.query("SELECT count(*) AS n FROM range(1000000000000)");
        assert!(
            tokio::time::timeout(Duration::from_millis(200), slow)
                .await
                .is_err()
        );

        // The connection is released once the interrupted statement unwinds.
        let rows = tokio::time::timeout(Duration::from_secs(30), engine.query("SELECT 7 AS n"))
            .await
            .expect("connection stayed busy after interrupt")
            .unwrap();
        assert_eq!(rows[0].u64_value("n").unwrap(), 7);
    }
}
