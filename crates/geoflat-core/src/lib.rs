//! `geoflat-core` turns a columnar geospatial table into flat, single-geometry
//! shapefile layers.
//!
//! The pipeline has four stages:
//! - **Schema**: read the working table's columns and declared types.
//! - **Flatten**: expand nested columns into scalar or JSON attributes whose
//!   names fit the ten-character field limit.
//! - **Partition**: split rows by exact geometry-type label, since a
//!   shapefile holds one geometry kind.
//! - **Export**: write one artifact per partition, validate it and hand it to
//!   a [`LayerRegistrar`].
//!
//! All SQL runs on a [`QueryEngine`] supplied by the caller.

pub mod error;
pub mod exporter;
pub mod flatten;
pub mod options;
pub mod orchestrator;
pub mod partition;
pub mod query;
pub mod schema;
pub mod types;
pub mod utils;

pub use error::{GeoFlatError, Result};
pub use flatten::{FlattenPlan, RuleTable, flatten};
pub use geoflat_core_common::{LayerRegistrar, QueryEngine, RegisteredLayer};
pub use options::{ExportOptions, ExportSession, UnknownStructPolicy};
pub use orchestrator::{ExportPlan, ExportReport, RunStatus, plan_export, run_export};
pub use url;
