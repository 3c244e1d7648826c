//! Collaborator contracts shared across `GeoFlat` crates.
//!
//! This crate holds the narrow interfaces the export pipeline talks to: the
//! query engine that owns the working table and executes generated statements,
//! and the registrar that receives finished artifacts. Keeping them here lets
//! engine implementations depend on the contract without depending on
//! `geoflat-core`.

pub mod engine;
pub mod registrar;

// Re-export commonly used types
pub use engine::{EngineError, EngineResult, QueryEngine, Row, RowExt};
pub use registrar::{LayerRegistrar, RegisteredLayer};
