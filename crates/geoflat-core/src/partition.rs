//! Geometry-type partitioning of the working table.
//!
//! The authoritative path groups every row by the exact label of the
//! geometry-type function and yields one partition per label. Labels are
//! never merged, so `POLYGON` and `MULTIPOLYGON` become two partitions of
//! the same [`ShapeClass`].
//!
//! [`detect_shape_class`] is an advisory shortcut that only samples rows. It
//! must never be used to choose the partition set.

use geoflat_core_common::{EngineError, QueryEngine, RowExt};
use log::{debug, warn};

use crate::error::{GeoFlatError, PartitionError, Result};
use crate::types::{GeometryPartition, ShapeClass, TableSchema};
use crate::utils::{quote_identifier, quote_literal};

const LABEL_COLUMN: &str = "geometry_type";
const COUNT_COLUMN: &str = "row_count";

/// SQL expression yielding the geometry-type label of each row.
#[must_use]
pub fn geometry_type_expression(geometry_column: &str) -> String {
    format!(
        "CAST(ST_GeometryType({}) AS VARCHAR)",
        quote_identifier(geometry_column)
    )
}

/// Query returning every distinct label with its row count.
#[must_use]
pub fn discovery_query(table: &str, geometry_column: &str) -> String {
    format!(
        "SELECT {} AS {LABEL_COLUMN}, COUNT(*) AS {COUNT_COLUMN} FROM {} GROUP BY {LABEL_COLUMN} ORDER BY {LABEL_COLUMN} NULLS LAST",
        geometry_type_expression(geometry_column),
        quote_identifier(table)
    )
}

/// Query returning the distinct labels among the first `sample_size` rows.
#[must_use]
pub fn sample_query(table: &str, geometry_column: &str, sample_size: usize) -> String {
    format!(
        "SELECT DISTINCT {} AS {LABEL_COLUMN} FROM (SELECT {} FROM {} LIMIT {sample_size})",
        geometry_type_expression(geometry_column),
        quote_identifier(geometry_column),
        quote_identifier(table)
    )
}

/// Build the partition for one label.
#[must_use]
pub fn partition_for_label(geometry_column: &str, label: &str, row_count: u64) -> GeometryPartition {
    GeometryPartition {
        geometry_type_label: label.to_string(),
        shape_class: ShapeClass::from_label(label),
        row_filter_predicate: format!(
            "{} = {}",
            geometry_type_expression(geometry_column),
            quote_literal(label)
        ),
        row_count,
    }
}

/// Connection failures stay engine errors; anything else failed the query.
fn discovery_error(table: &str, source: EngineError) -> GeoFlatError {
    match source {
        EngineError::Connect { .. } => GeoFlatError::Engine(source),
        source => PartitionError::Discovery {
            table: table.to_string(),
            source,
        }
        .into(),
    }
}

/// Discover one partition per distinct geometry-type label.
///
/// Partitions are returned sorted by label. Rows whose geometry type is NULL
/// match no partition; they are counted and logged.
///
/// # Errors
///
/// Returns [`PartitionError::NoGeometryData`] when the geometry column is
/// missing, the table is empty, or no row has a geometry type,
/// [`GeoFlatError::Engine`] when the engine has no usable connection, and
/// [`PartitionError::Discovery`] when the discovery query fails.
pub async fn discover_partitions(
    engine: &dyn QueryEngine,
    schema: &TableSchema,
    geometry_column: &str,
) -> Result<Vec<GeometryPartition>> {
    let no_data = |reason: String| -> GeoFlatError {
        PartitionError::NoGeometryData {
            table: schema.table.clone(),
            reason,
        }
        .into()
    };

    if schema.column(geometry_column).is_none() {
        return Err(no_data(format!("no geometry column '{geometry_column}'")));
    }

    let discovery_failed = |source| discovery_error(&schema.table, source);

    let rows = engine
        .query(&discovery_query(&schema.table, geometry_column))
        .await
        .map_err(discovery_failed)?;

    let mut partitions = Vec::with_capacity(rows.len());
    let mut total_rows: u64 = 0;
    let mut untyped_rows: u64 = 0;

    for row in &rows {
        let count = row.u64_value(COUNT_COLUMN).map_err(discovery_failed)?;
        total_rows += count;
        match row.opt_str(LABEL_COLUMN).map_err(discovery_failed)? {
            Some(label) if !label.trim().is_empty() => {
                let partition = partition_for_label(geometry_column, label, count);
                debug!(
                    "Partition {label}: {count} row(s) -> {}",
                    partition.shape_class
                );
                partitions.push(partition);
            },
            _ => untyped_rows += count,
        }
    }

    if total_rows == 0 {
        return Err(no_data("table has no rows".to_string()));
    }
    if partitions.is_empty() {
        return Err(no_data(format!(
            "all {total_rows} row(s) have a NULL geometry"
        )));
    }
    if untyped_rows > 0 {
        warn!(
            "{untyped_rows} row(s) of '{}' have a NULL geometry and will not be exported",
            schema.table
        );
    }

    partitions.sort_by(|a, b| a.geometry_type_label.cmp(&b.geometry_type_label));
    Ok(partitions)
}

/// Pick one class for a mixed set of labels, `Polygon > Line > Point`.
#[must_use]
pub fn pick_shape_class<'a>(labels: impl IntoIterator<Item = &'a str>) -> Option<ShapeClass> {
    labels.into_iter().map(ShapeClass::from_label).max()
}

/// Advisory single-class detection from a sample of up to `sample_size` rows.
///
/// Returns `None` when the sample holds no typed geometry.
///
/// # Errors
///
/// Returns [`PartitionError::Discovery`] when the sample query fails.
pub async fn detect_shape_class(
    engine: &dyn QueryEngine,
    table: &str,
    geometry_column: &str,
    sample_size: usize,
) -> Result<Option<ShapeClass>> {
    let discovery_failed = |source| discovery_error(table, source);

    let rows = engine
        .query(&sample_query(table, geometry_column, sample_size))
        .await
        .map_err(discovery_failed)?;

    let mut labels = Vec::with_capacity(rows.len());
    for row in &rows {
        if let Some(label) = row.opt_str(LABEL_COLUMN).map_err(discovery_failed)? {
            labels.push(label.to_string());
        }
    }

    Ok(pick_shape_class(labels.iter().map(String::as_str)))
}
