//! Run configuration: export options and the caller-owned export session.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;

/// Default spatial reference of both the source data and the output.
pub const DEFAULT_SRS: &str = "EPSG:4326";

/// Default geometry column name.
pub const DEFAULT_GEOMETRY_COLUMN: &str = "geometry";

/// Default number of rows inspected by the advisory shape detection.
pub const DEFAULT_SAMPLE_SIZE: usize = 1000;

/// What to do with a struct column that has no dedicated flatten rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownStructPolicy {
    /// Leave the column out and log a warning
    #[default]
    Drop,
    /// Write the column as one JSON text attribute
    Serialize,
    /// Abort flattening with `UnsupportedColumnShape`
    Error,
}

impl UnknownStructPolicy {
    /// Returns the string representation of this policy.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            UnknownStructPolicy::Drop => "drop",
            UnknownStructPolicy::Serialize => "serialize",
            UnknownStructPolicy::Error => "error",
        }
    }
}

impl FromStr for UnknownStructPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop" => Ok(UnknownStructPolicy::Drop),
            "serialize" => Ok(UnknownStructPolicy::Serialize),
            "error" => Ok(UnknownStructPolicy::Error),
            other => Err(ConfigError::InvalidOption {
                option: "unknown-structs".to_string(),
                message: format!("expected drop, serialize or error, got '{other}'"),
            }),
        }
    }
}

/// Options controlling flattening, partitioning and export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    /// Geometry column of the working table (default: `geometry`)
    pub geometry_column: String,
    /// Spatial reference of the stored geometries (default: `EPSG:4326`)
    pub source_srs: String,
    /// Spatial reference written to every artifact (default: `EPSG:4326`)
    pub target_srs: String,
    /// Handling of struct columns without a rule (default: drop)
    pub unknown_struct_policy: UnknownStructPolicy,
    /// Rows inspected by the advisory shape detection (default: 1000)
    pub sample_size: usize,
    /// Delete artifacts of geometry types no longer present (default: false)
    pub prune_stale: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            geometry_column: DEFAULT_GEOMETRY_COLUMN.to_string(),
            source_srs: DEFAULT_SRS.to_string(),
            target_srs: DEFAULT_SRS.to_string(),
            unknown_struct_policy: UnknownStructPolicy::default(),
            sample_size: DEFAULT_SAMPLE_SIZE,
            prune_stale: false,
        }
    }
}

impl ExportOptions {
    /// Create new options with defaults
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the geometry column
    #[must_use]
    pub fn with_geometry_column(mut self, column: impl Into<String>) -> Self {
        self.geometry_column = column.into();
        self
    }

    /// Set the source spatial reference
    #[must_use]
    pub fn with_source_srs(mut self, srs: impl Into<String>) -> Self {
        self.source_srs = srs.into();
        self
    }

    /// Set the output spatial reference
    #[must_use]
    pub fn with_target_srs(mut self, srs: impl Into<String>) -> Self {
        self.target_srs = srs.into();
        self
    }

    /// Set the unknown struct policy
    #[must_use]
    pub fn with_unknown_struct_policy(mut self, policy: UnknownStructPolicy) -> Self {
        self.unknown_struct_policy = policy;
        self
    }

    /// Set the advisory sample size
    #[must_use]
    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    /// Enable or disable pruning of stale artifacts
    #[must_use]
    pub fn with_prune_stale(mut self, prune_stale: bool) -> Self {
        self.prune_stale = prune_stale;
        self
    }

    /// Check option values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] for an empty geometry column or
    /// spatial reference, or a zero sample size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_empty = [
            ("geometry-column", &self.geometry_column),
            ("source-srs", &self.source_srs),
            ("target-srs", &self.target_srs),
        ];
        for (option, value) in non_empty {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidOption {
                    option: option.to_string(),
                    message: "must not be empty".to_string(),
                });
            }
        }

        if self.sample_size == 0 {
            return Err(ConfigError::InvalidOption {
                option: "sample-size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Caller-owned context for one export run.
///
/// Holds the resolved output folder and naming inputs. Nothing in the
/// pipeline keeps its own copy of the output folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSession {
    output_dir: PathBuf,
    table: String,
    layer_name: String,
    release: String,
    options: ExportOptions,
}

impl ExportSession {
    /// Creates a session.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingRequired`] for an empty table, layer name
    /// or release, and any error from [`ExportOptions::validate`].
    pub fn new(
        output_dir: impl Into<PathBuf>,
        table: impl Into<String>,
        layer_name: impl Into<String>,
        release: impl Into<String>,
        options: ExportOptions,
    ) -> Result<Self, ConfigError> {
        let session = Self {
            output_dir: output_dir.into(),
            table: table.into(),
            layer_name: layer_name.into(),
            release: release.into(),
            options,
        };

        let required = [
            ("table", &session.table),
            ("layer-name", &session.layer_name),
            ("release", &session.release),
        ];
        for (option, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingRequired {
                    option: option.to_string(),
                });
            }
        }
        session.options.validate()?;

        Ok(session)
    }

    /// Output folder for this run's artifacts.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Working table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Base layer name, e.g. `Places`.
    #[must_use]
    pub fn layer_name(&self) -> &str {
        &self.layer_name
    }

    /// Dataset release, e.g. `2024-07-22.0`.
    #[must_use]
    pub fn release(&self) -> &str {
        &self.release
    }

    /// Export options.
    #[must_use]
    pub fn options(&self) -> &ExportOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ExportOptions::default();
        assert_eq!(options.geometry_column, "geometry");
        assert_eq!(options.target_srs, "EPSG:4326");
        assert_eq!(options.unknown_struct_policy, UnknownStructPolicy::Drop);
        assert!(!options.prune_stale);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let options = ExportOptions::new()
            .with_geometry_column("geom")
            .with_target_srs("EPSG:3857")
            .with_unknown_struct_policy(UnknownStructPolicy::Serialize)
            .with_sample_size(50)
            .with_prune_stale(true);
        assert_eq!(options.geometry_column, "geom");
        assert_eq!(options.target_srs, "EPSG:3857");
        assert_eq!(options.unknown_struct_policy, UnknownStructPolicy::Serialize);
        assert_eq!(options.sample_size, 50);
        assert!(options.prune_stale);
    }

    #[test]
    fn test_validate_rejects_zero_sample() {
        let err = ExportOptions::new().with_sample_size(0).validate().unwrap_err();
        assert!(err.to_string().contains("sample-size"));
    }

    #[test]
    fn test_validate_rejects_empty_srs() {
        let err = ExportOptions::new().with_target_srs(" ").validate().unwrap_err();
        assert!(err.to_string().contains("target-srs"));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "Serialize".parse::<UnknownStructPolicy>().unwrap(),
            UnknownStructPolicy::Serialize
        );
        assert!("keep".parse::<UnknownStructPolicy>().is_err());
    }

    #[test]
    fn test_session_requires_release() {
        let err = ExportSession::new("/tmp/out", "places", "Places", "", ExportOptions::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "Missing required option: release");
    }

    #[test]
    fn test_session_accessors() {
        let session = ExportSession::new(
            "/tmp/out",
            "places",
            "Places",
            "2024-07-22.0",
            ExportOptions::default(),
        )
        .unwrap();
        assert_eq!(session.output_dir(), Path::new("/tmp/out"));
        assert_eq!(session.table(), "places");
        assert_eq!(session.layer_name(), "Places");
        assert_eq!(session.release(), "2024-07-22.0");
    }
}
