//! Schema introspection of the working table.

use geoflat_core_common::{EngineError, QueryEngine};
use log::debug;

use crate::error::{GeoFlatError, Result, SchemaError};
use crate::types::{ColumnDescriptor, TableSchema};

/// Reads the live schema of `table`.
///
/// Declared types are kept exactly as the engine reports them so the flatten
/// rules can match on nested type markers.
///
/// # Errors
///
/// Returns [`GeoFlatError::Engine`] if the engine has no usable connection,
/// and [`SchemaError::Unavailable`] if no table name is given, the engine
/// cannot describe the table, or the table has no columns.
pub async fn introspect(engine: &dyn QueryEngine, table: &str) -> Result<TableSchema> {
    if table.trim().is_empty() {
        return Err(SchemaError::Unavailable {
            table: table.to_string(),
            reason: "no working table is loaded".to_string(),
        }
        .into());
    }

    let described = engine
        .describe(table)
        .await
        .map_err(|e| match e {
            EngineError::Connect { .. } => GeoFlatError::Engine(e),
            e => SchemaError::Unavailable {
                table: table.to_string(),
                reason: e.to_string(),
            }
            .into(),
        })?;

    if described.is_empty() {
        return Err(SchemaError::Unavailable {
            table: table.to_string(),
            reason: "table has no columns".to_string(),
        }
        .into());
    }

    let columns: Vec<ColumnDescriptor> = described
        .into_iter()
        .map(|(name, declared_type)| ColumnDescriptor::new(name, declared_type))
        .collect();

    for column in &columns {
        debug!(
            "{table}.{}: {} ({:?})",
            column.name, column.declared_type, column.shape
        );
    }

    Ok(TableSchema {
        table: table.to_string(),
        columns,
    })
}
