//! `QueryEngine` backed by an in-process `DuckDB` database.
//!
//! One connection is opened per engine and kept for the whole export run, so
//! the working table and any session state loaded before the export stay
//! visible to every statement. The spatial extension is loaded once when the
//! connection opens so `ST_*` functions and `COPY ... (FORMAT GDAL)` are
//! available.

mod engine;

pub use engine::{DuckDbEngine, DuckDbOptions};
