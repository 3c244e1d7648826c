//! Custom error types for `GeoFlat` operations.
//!
//! This module provides structured error handling using `thiserror`. Errors are
//! split by pipeline stage so callers can tell prerequisite failures (schema,
//! flattening, partition discovery) from per-partition export failures.

use std::path::PathBuf;

use geoflat_core_common::EngineError;
use thiserror::Error;

/// Main error type for `GeoFlat` operations.
///
/// This is the root error type that encompasses all domain-specific errors.
/// It uses `#[error(transparent)]` to delegate display formatting to the
/// underlying error variants.
#[derive(Debug, Error)]
pub enum GeoFlatError {
    /// Schema introspection errors
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Column flattening errors
    #[error(transparent)]
    Flatten(#[from] FlattenError),

    /// Geometry partition discovery errors
    #[error(transparent)]
    Partition(#[from] PartitionError),

    /// Per-partition export errors
    #[error(transparent)]
    Export(#[from] ExportError),

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Query engine errors outside a partition export
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The caller cancelled the operation
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O errors on the output folder
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// The path involved
        path: PathBuf,
        /// The underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Schema introspection errors.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// No working table is loaded (or it cannot be described)
    #[error("Schema unavailable for table '{table}': {reason}")]
    Unavailable {
        /// The working table name
        table: String,
        /// Why the schema could not be read
        reason: String,
    },
}

/// Column flattening errors.
#[derive(Debug, Error)]
pub enum FlattenError {
    /// A nested column has no rule and the policy forbids dropping it
    #[error("Column '{column}' has unsupported nested type {declared_type}")]
    UnsupportedColumnShape {
        /// The column name
        column: String,
        /// Its declared type
        declared_type: String,
    },
}

/// Geometry partition discovery errors.
#[derive(Debug, Error)]
pub enum PartitionError {
    /// The table has no rows, no geometry column or only NULL geometries
    #[error("No geometry data in table '{table}': {reason}")]
    NoGeometryData {
        /// The working table name
        table: String,
        /// What was missing
        reason: String,
    },

    /// Partition discovery query failed
    #[error("Failed to discover geometry types in '{table}': {source}")]
    Discovery {
        /// The working table name
        table: String,
        /// The engine error
        #[source]
        source: EngineError,
    },
}

/// Per-partition export errors.
///
/// These are collected by the orchestrator and never abort sibling
/// partitions.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The export directive failed in the engine or vector driver
    #[error("Export of {label} for layer '{layer}' failed: {source}")]
    PartitionExportFailure {
        /// Layer display name
        layer: String,
        /// Geometry-type label of the partition
        label: String,
        /// The driver error, message preserved
        #[source]
        source: EngineError,
    },

    /// The export ran but the artifact is missing or empty although rows were expected
    #[error("Artifact '{path}' for {label} is {problem} but {expected_rows} row(s) were exported")]
    ArtifactValidationFailure {
        /// Primary artifact path
        path: PathBuf,
        /// Geometry-type label of the partition
        label: String,
        /// `missing` or `empty`
        problem: &'static str,
        /// Rows counted during discovery
        expected_rows: u64,
    },
}

/// Configuration errors.
///
/// These errors occur when options or configuration are invalid.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid option value
    #[error("Invalid {option} option: {message}")]
    InvalidOption {
        /// The option name
        option: String,
        /// Why it's invalid
        message: String,
    },

    /// Required option is missing
    #[error("Missing required option: {option}")]
    MissingRequired {
        /// The missing option name
        option: String,
    },
}

/// Type alias for Results using `GeoFlatError`.
pub type Result<T> = std::result::Result<T, GeoFlatError>;

impl GeoFlatError {
    /// Get a user-friendly error message.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Schema(e) => e.to_string(),
            Self::Flatten(e) => e.user_message(),
            Self::Partition(e) => e.to_string(),
            Self::Export(e) => e.to_string(),
            Self::Config(e) => format!("Configuration error: {e}"),
            Self::Engine(e) => format!("Query engine error: {e}"),
            Self::Cancelled => "Export cancelled before completion.".to_string(),
            Self::Io { path, source } => {
                format!("Failed to access {}: {source}", path.display())
            },
        }
    }

    /// Get recovery suggestions if available.
    #[must_use]
    pub fn recovery_suggestion(&self) -> Option<String> {
        match self {
            Self::Schema(SchemaError::Unavailable { .. }) => Some(
                "Load the dataset into the working table before exporting.".to_string(),
            ),
            Self::Flatten(FlattenError::UnsupportedColumnShape { .. }) => Some(
                "Use the 'drop' or 'serialize' policy for unrecognized struct columns.".to_string(),
            ),
            Self::Partition(PartitionError::NoGeometryData { .. }) => {
                Some("Check the geometry column name and that the table has rows.".to_string())
            },
            Self::Engine(EngineError::Connect { .. }) => Some(
                "Check the database path and that the spatial extension is installed.".to_string(),
            ),
            _ => None,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

impl FlattenError {
    fn user_message(&self) -> String {
        match self {
            Self::UnsupportedColumnShape {
                column,
                declared_type,
            } => format!(
                "Column '{column}' ({declared_type}) cannot be written to a flat attribute table."
            ),
        }
    }
}

impl ExportError {
    /// Geometry-type label of the failed partition.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::PartitionExportFailure { label, .. }
            | Self::ArtifactValidationFailure { label, .. } => label,
        }
    }
}
