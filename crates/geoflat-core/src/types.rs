//! Data types for the flatten-and-export pipeline.
//!
//! This module defines the structures that flow between the pipeline stages:
//! the introspected schema, projection expressions, geometry partitions and
//! export targets.

use std::fmt;
use std::path::PathBuf;

/// Structural shape of a declared column type.
///
/// Resolved once from the engine's raw type string so later stages never
/// re-parse type prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeShape {
    /// Any non-nested type (numbers, text, dates, geometry, JSON text)
    Scalar,
    /// `STRUCT(...)`
    Struct,
    /// `MAP(...)`
    Map,
    /// Variable- or fixed-length collection, `T[]` / `T[n]` / `LIST(T)`
    List,
    /// `UNION(...)`
    Union,
}

impl TypeShape {
    /// Classify a raw engine type string.
    #[must_use]
    pub fn parse(declared_type: &str) -> Self {
        let upper = declared_type.trim().to_ascii_uppercase();

        // A trailing bracket wraps the whole type, so `STRUCT(...)[]` is a list.
        if upper.ends_with(']') || upper.starts_with("LIST(") || upper.starts_with("LIST<") {
            TypeShape::List
        } else if upper.starts_with("STRUCT") && upper[6..].trim_start().starts_with(['(', '<']) {
            TypeShape::Struct
        } else if upper.starts_with("MAP") && upper[3..].trim_start().starts_with(['(', '<']) {
            TypeShape::Map
        } else if upper.starts_with("UNION") && upper[5..].trim_start().starts_with('(') {
            TypeShape::Union
        } else {
            TypeShape::Scalar
        }
    }

    /// Returns `true` for every shape except [`TypeShape::Scalar`].
    #[must_use]
    pub fn is_nested(self) -> bool {
        !matches!(self, TypeShape::Scalar)
    }
}

/// One column of the working table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    /// Column name
    pub name: String,
    /// Raw type string reported by the engine
    pub declared_type: String,
    /// Shape resolved from `declared_type`
    pub shape: TypeShape,
}

impl ColumnDescriptor {
    /// Creates a descriptor, resolving its [`TypeShape`].
    #[must_use]
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        let declared_type = declared_type.into();
        Self {
            name: name.into(),
            shape: TypeShape::parse(&declared_type),
            declared_type,
        }
    }
}

/// Ordered schema of the working table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Name of the working table
    pub table: String,
    /// Columns in source order
    pub columns: Vec<ColumnDescriptor>,
}

impl TableSchema {
    /// Looks up a column by exact name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// One output attribute of the flattened schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionExpression {
    /// Output attribute name, at most ten characters
    pub output_name: String,
    /// SQL expression producing the value
    pub source_expression: String,
}

impl ProjectionExpression {
    /// Creates a projection.
    #[must_use]
    pub fn new(output_name: impl Into<String>, source_expression: impl Into<String>) -> Self {
        Self {
            output_name: output_name.into(),
            source_expression: source_expression.into(),
        }
    }
}

/// Geometry class of the legacy flat vector format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ShapeClass {
    /// Points and multipoints
    Point,
    /// Line strings and multi line strings
    Line,
    /// Polygons and multipolygons
    Polygon,
}

impl ShapeClass {
    /// Classify a geometry-type label such as `MULTIPOLYGON`.
    ///
    /// Polygon labels win over line labels; everything else is a point.
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        let upper = label.to_ascii_uppercase();
        if upper.contains("POLYGON") {
            ShapeClass::Polygon
        } else if upper.contains("LINESTRING") || upper.contains("LINE") {
            ShapeClass::Line
        } else {
            ShapeClass::Point
        }
    }

    /// Shapefile `SHPT` layer type for this class and label.
    #[must_use]
    pub fn shape_type(self, label: &str) -> &'static str {
        match self {
            ShapeClass::Polygon => "POLYGON",
            ShapeClass::Line => "ARC",
            ShapeClass::Point if label.to_ascii_uppercase().starts_with("MULTI") => "MULTIPOINT",
            ShapeClass::Point => "POINT",
        }
    }

    /// Returns the string representation of this class.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ShapeClass::Point => "Point",
            ShapeClass::Line => "Line",
            ShapeClass::Polygon => "Polygon",
        }
    }
}

impl fmt::Display for ShapeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rows sharing one exact geometry-type label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeometryPartition {
    /// Label reported by the geometry-type function, e.g. `MULTIPOLYGON`
    pub geometry_type_label: String,
    /// Output class the label maps to
    pub shape_class: ShapeClass,
    /// SQL predicate selecting exactly this partition's rows
    pub row_filter_predicate: String,
    /// Number of rows observed during discovery
    pub row_count: u64,
}

/// Where and how one partition is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTarget {
    /// Path of the primary `.shp` file
    pub output_path: PathBuf,
    /// Layer name shown by the registrar
    pub layer_display_name: String,
    /// Output geometry class
    pub shape_class: ShapeClass,
    /// Output spatial reference, e.g. `EPSG:4326`
    pub spatial_reference: String,
}
