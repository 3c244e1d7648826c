//! Command-line interface for `GeoFlat`.
//!
//! Exports a DuckDB table of nested geospatial records (for example a map data
//! release loaded with the spatial extension) as one shapefile per geometry
//! type.
//!
//! # Available Commands
//!
//! - `inspect` - Show how a table would be flattened and partitioned
//! - `export` - Write the shapefiles and register each finished layer

mod display;
mod registrar;

use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info, warn};
use tracing_log::LogTracer;
use tracing_subscriber::FmtSubscriber;

use duckdb_engine::{DuckDbEngine, DuckDbOptions};
use geoflat_core::options::{DEFAULT_GEOMETRY_COLUMN, DEFAULT_SAMPLE_SIZE, DEFAULT_SRS};
use geoflat_core::partition::detect_shape_class;
use geoflat_core::{
    ExportOptions, ExportSession, GeoFlatError, RuleTable, RunStatus, UnknownStructPolicy,
    plan_export, run_export,
};

use crate::display::{display_plan, display_report, display_statements};
use crate::registrar::ConsoleRegistrar;

#[derive(Parser)]
#[command(
    name = "geoflat",
    version,
    about = "Flatten nested geospatial tables into per-geometry-type shapefiles",
    long_about = "GeoFlat reads a DuckDB table with nested columns and writes one ESRI Shapefile\n\
                  per geometry type, with struct columns expanded into flat attributes."
)]
/// Command-line arguments and options for the `GeoFlat` CLI.
struct Cli {
    /// Enable verbose (INFO level) logging output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug (DEBUG level) logging output with detailed diagnostics.
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Shows the columns, projection and geometry partitions of a table.
    Inspect {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Exports a table to shapefiles, one per geometry type.
    Export(ExportArgs),
}

/// Where the working table lives and how to read it.
#[derive(Args, Clone)]
struct SourceArgs {
    /// DuckDB database file holding the working table.
    #[arg(long, value_name = "FILE")]
    database: PathBuf,

    /// Name of the working table.
    #[arg(short, long, value_name = "TABLE")]
    table: String,

    /// Install the spatial extension before loading it (needs network access once).
    #[arg(long)]
    install_extensions: bool,

    /// Geometry column of the table.
    #[arg(long, default_value = DEFAULT_GEOMETRY_COLUMN, value_name = "COLUMN")]
    geometry_column: String,

    /// Spatial reference of the stored geometries.
    #[arg(long, default_value = DEFAULT_SRS, value_name = "SRS")]
    source_srs: String,

    /// What to do with struct columns without a flatten rule: drop, serialize or error.
    #[arg(long, default_value = "drop", value_name = "POLICY")]
    unknown_structs: String,

    /// Rows sampled for the advisory shape detection.
    #[arg(long, default_value_t = DEFAULT_SAMPLE_SIZE, value_name = "ROWS")]
    sample_size: usize,
}

#[derive(Args)]
struct ExportArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Folder receiving the shapefiles.
    #[arg(short, long, value_name = "DIR")]
    output_dir: PathBuf,

    /// Base layer name, e.g. "Places".
    #[arg(short, long, value_name = "NAME")]
    layer_name: String,

    /// Dataset release, e.g. "2024-07-22.0".
    #[arg(short, long, value_name = "RELEASE")]
    release: String,

    /// Spatial reference written to every shapefile.
    #[arg(long, default_value = DEFAULT_SRS, value_name = "SRS")]
    target_srs: String,

    /// Delete shapefiles of geometry types no longer present in the table.
    #[arg(long)]
    prune: bool,

    /// Print the export statements without running them.
    #[arg(long)]
    dry_run: bool,
}

impl SourceArgs {
    fn engine(&self, read_only: bool) -> Result<DuckDbEngine> {
        let options = DuckDbOptions::new()
            .with_install_extensions(self.install_extensions)
            .with_read_only(read_only);
        DuckDbEngine::open(&self.database, &options).map_err(|e| cli_error(e.into()))
    }

    fn options(&self) -> Result<ExportOptions> {
        let policy: UnknownStructPolicy = self.unknown_structs.parse()?;
        Ok(ExportOptions::new()
            .with_geometry_column(&self.geometry_column)
            .with_source_srs(&self.source_srs)
            .with_unknown_struct_policy(policy)
            .with_sample_size(self.sample_size))
    }
}

impl ExportArgs {
    fn session(&self, output_dir: PathBuf) -> Result<ExportSession> {
        let options = self
            .source
            .options()?
            .with_target_srs(&self.target_srs)
            .with_prune_stale(self.prune);
        Ok(ExportSession::new(
            output_dir,
            &self.source.table,
            &self.layer_name,
            &self.release,
            options,
        )?)
    }
}

/// Entry point for the `GeoFlat` command-line interface.
///
/// # Errors
///
/// Returns an error if the command fails or if the logging system cannot be
/// initialized.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    // Bridge logs from the `log` crate to the `tracing` ecosystem.
    LogTracer::init()?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Inspect { source } => handle_inspect(&source).await,
        Commands::Export(args) => handle_export(&args).await,
    }
}

/// Turn a pipeline error into a CLI error with a recovery hint.
fn cli_error(error: GeoFlatError) -> anyhow::Error {
    match error.recovery_suggestion() {
        Some(hint) => anyhow!("{}\nHint: {hint}", error.user_message()),
        None => anyhow!(error.user_message()),
    }
}

/// Cancels the returned token on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling export");
            trigger.cancel();
        }
    });
    token
}

async fn handle_inspect(source: &SourceArgs) -> Result<()> {
    info!("Inspecting table '{}' in {}", source.table, source.database.display());

    // Inspection writes nothing, so the naming inputs are placeholders.
    let session = ExportSession::new(
        ".",
        &source.table,
        &source.table,
        "inspect",
        source.options()?,
    )?;
    let engine = source.engine(true)?;

    let plan = plan_export(&engine, &session, &RuleTable::standard())
        .await
        .map_err(cli_error)?;
    let sampled = detect_shape_class(
        &engine,
        &source.table,
        &source.geometry_column,
        source.sample_size,
    )
    .await
    .map_err(cli_error)?;

    display_plan(&plan, sampled);
    Ok(())
}

async fn handle_export(args: &ExportArgs) -> Result<()> {
    let rules = RuleTable::standard();

    if args.dry_run {
        let session = args.session(args.output_dir.clone())?;
        let engine = args.source.engine(true)?;
        let plan = plan_export(&engine, &session, &rules)
            .await
            .map_err(cli_error)?;
        display_plan(&plan, None);
        display_statements(&plan);
        return Ok(());
    }

    let output_dir = std::path::absolute(&args.output_dir)?;
    let session = args.session(output_dir)?;
    let engine = args.source.engine(false)?;
    info!(
        "Exporting '{}' as {} {} to {}",
        session.table(),
        session.layer_name(),
        session.release(),
        session.output_dir().display()
    );

    let registrar = ConsoleRegistrar::default();
    let cancel = cancel_on_ctrl_c();
    let report = run_export(&engine, &session, &rules, &registrar, &cancel)
        .await
        .map_err(cli_error)?;

    display_report(&report);
    for layer in registrar.layers() {
        println!("Layer: {} ({})", layer.display_name, layer.uri);
    }

    match report.status() {
        RunStatus::Succeeded => Ok(()),
        status => {
            let failed: Vec<&str> = report.failed().map(|(label, _)| label).collect();
            Err(anyhow!(
                "Export {status}: {} of {} geometry type(s) failed ({})",
                failed.len(),
                report.outcomes.len(),
                failed.join(", ")
            ))
        },
    }
}
