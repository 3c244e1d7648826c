//! Statement text for partition exports.
//!
//! These are pure functions: they only assemble SQL for the engine and never
//! fetch data.

use std::path::Path;

use crate::types::{ProjectionExpression, ShapeClass};
use crate::utils::{quote_identifier, quote_literal};

/// Vector driver used for every artifact.
pub const SHAPEFILE_DRIVER: &str = "ESRI Shapefile";

/// Geometry projection, reprojected from `source_srs` to `target_srs`.
///
/// The output column keeps the geometry column's name.
#[must_use]
pub fn geometry_projection(geometry_column: &str, source_srs: &str, target_srs: &str) -> String {
    let column = quote_identifier(geometry_column);
    format!(
        "ST_Transform({column}, {}, {}, always_xy := true) AS {column}",
        quote_literal(source_srs),
        quote_literal(target_srs)
    )
}

/// `SELECT` over `table`: every projection in order, geometry last, and an
/// optional partition filter.
#[must_use]
pub fn build_select(
    table: &str,
    projections: &[ProjectionExpression],
    geometry_projection: &str,
    partition_filter: Option<&str>,
) -> String {
    let columns = projections
        .iter()
        .map(|p| {
            format!(
                "{} AS {}",
                p.source_expression,
                quote_identifier(&p.output_name)
            )
        })
        .chain(std::iter::once(geometry_projection.to_string()))
        .collect::<Vec<_>>()
        .join(", ");

    let mut select = format!("SELECT {columns} FROM {}", quote_identifier(table));
    if let Some(filter) = partition_filter {
        select.push_str(" WHERE ");
        select.push_str(filter);
    }
    select
}

/// Export directive writing `select` to `output_path` as a shapefile.
///
/// `geometry_type_label` refines the point layer type (`MULTIPOINT` labels
/// need a multipoint layer).
#[must_use]
pub fn build_export(
    select: &str,
    output_path: &Path,
    shape_class: ShapeClass,
    geometry_type_label: &str,
    spatial_reference: &str,
) -> String {
    format!(
        "COPY ({select}) TO {} WITH (FORMAT GDAL, DRIVER {}, SRS {}, LAYER_CREATION_OPTIONS ({}, 'ENCODING=UTF-8'))",
        quote_literal(&output_path.to_string_lossy()),
        quote_literal(SHAPEFILE_DRIVER),
        quote_literal(spatial_reference),
        quote_literal(&format!(
            "SHPT={}",
            shape_class.shape_type(geometry_type_label)
        )),
    )
}
