//! End-to-end export of the working table.
//!
//! A run introspects the table, flattens its columns, discovers geometry
//! partitions and then exports each partition in label order. Failures before
//! the first partition abort the run. Partition failures are collected in the
//! [`ExportReport`] and the remaining partitions still run.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use geoflat_core_common::{LayerRegistrar, QueryEngine, RegisteredLayer};
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{ExportError, GeoFlatError, Result};
use crate::exporter::{ArtifactStatus, export_partition, export_target, prune_stale_artifacts};
use crate::flatten::{FlattenPlan, Rename, RuleTable, flatten};
use crate::options::ExportSession;
use crate::partition::discover_partitions;
use crate::query::{build_export, build_select, geometry_projection};
use crate::schema::introspect;
use crate::types::{ExportTarget, GeometryPartition, TableSchema};

/// One partition's statements, ready to run.
#[derive(Debug, Clone)]
pub struct PlannedExport {
    /// Geometry-type partition being exported
    pub partition: GeometryPartition,
    /// Artifact path, layer name and output class
    pub target: ExportTarget,
    /// Filtered `SELECT` feeding the export
    pub select: String,
    /// Full export directive
    pub statement: String,
}

/// Everything a run would do, computed without writing any file.
#[derive(Debug, Clone)]
pub struct ExportPlan {
    /// Live schema of the working table
    pub schema: TableSchema,
    /// Flattened attribute projection shared by every partition
    pub flatten: FlattenPlan,
    /// One planned export per partition, sorted by label
    pub exports: Vec<PlannedExport>,
}

/// Build the export plan for `session`.
///
/// # Errors
///
/// Returns the schema, flatten or partition error that prevents any export.
pub async fn plan_export(
    engine: &dyn QueryEngine,
    session: &ExportSession,
    rules: &RuleTable,
) -> Result<ExportPlan> {
    let options = session.options();

    let schema = introspect(engine, session.table()).await?;
    info!(
        "Table '{}' has {} column(s)",
        schema.table,
        schema.columns.len()
    );

    let plan = flatten(&schema, rules, options)?;
    info!(
        "Projection: {} attribute(s), {} dropped, {} renamed",
        plan.projections.len(),
        plan.dropped.len(),
        plan.renamed.len()
    );

    let partitions = discover_partitions(engine, &schema, &options.geometry_column).await?;
    info!(
        "Found {} geometry type(s): {}",
        partitions.len(),
        partitions
            .iter()
            .map(|p| p.geometry_type_label.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let geometry = geometry_projection(
        &options.geometry_column,
        &options.source_srs,
        &options.target_srs,
    );

    let exports = partitions
        .into_iter()
        .map(|partition| {
            let target = export_target(session, &partition);
            let select = build_select(
                &schema.table,
                &plan.projections,
                &geometry,
                Some(&partition.row_filter_predicate),
            );
            let statement = build_export(
                &select,
                &target.output_path,
                target.shape_class,
                &partition.geometry_type_label,
                &target.spatial_reference,
            );
            PlannedExport {
                partition,
                target,
                select,
                statement,
            }
        })
        .collect();

    Ok(ExportPlan {
        schema,
        flatten: plan,
        exports,
    })
}

/// What happened to one partition.
#[derive(Debug)]
pub enum PartitionStatus {
    /// Artifact written
    Exported {
        /// Size of the primary file
        bytes: u64,
        /// Whether the registrar accepted the layer
        registered: bool,
    },
    /// Partition had no rows; nothing written or registered
    Skipped,
    /// Export or validation failed
    Failed(ExportError),
}

/// Outcome of one partition export.
#[derive(Debug)]
pub struct PartitionOutcome {
    /// Partition that was exported
    pub partition: GeometryPartition,
    /// Where its artifact was written
    pub target: ExportTarget,
    /// What happened
    pub status: PartitionStatus,
}

impl PartitionOutcome {
    /// Geometry-type label of the partition.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.partition.geometry_type_label
    }

    /// Returns `true` if the partition failed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.status, PartitionStatus::Failed(_))
    }
}

/// Overall result of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every partition exported or skipped
    Succeeded,
    /// At least one partition failed and at least one did not
    PartiallySucceeded,
    /// Every partition failed
    Failed,
}

impl RunStatus {
    /// Returns the string representation of this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::PartiallySucceeded => "partially succeeded",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Report of a completed run.
#[derive(Debug)]
pub struct ExportReport {
    /// Per-partition outcomes, in partition order
    pub outcomes: Vec<PartitionOutcome>,
    /// Struct columns left out of the attribute table
    pub dropped_columns: Vec<String>,
    /// Output names changed to avoid collisions
    pub renamed: Vec<Rename>,
    /// Stale artifacts deleted before exporting
    pub pruned: Vec<PathBuf>,
}

impl ExportReport {
    /// Succeeded when no partition failed, failed when every partition did.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        let failed = self.outcomes.iter().filter(|o| o.is_failed()).count();
        if failed == 0 {
            RunStatus::Succeeded
        } else if failed == self.outcomes.len() {
            RunStatus::Failed
        } else {
            RunStatus::PartiallySucceeded
        }
    }

    /// Labels of the partitions that were written.
    #[must_use]
    pub fn succeeded(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, PartitionStatus::Exported { .. }))
            .map(PartitionOutcome::label)
            .collect()
    }

    /// Failed partitions with their errors.
    pub fn failed(&self) -> impl Iterator<Item = (&str, &ExportError)> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            PartitionStatus::Failed(e) => Some((o.label(), e)),
            _ => None,
        })
    }

    /// Written artifact paths, in label order.
    #[must_use]
    pub fn artifacts(&self) -> Vec<&PathBuf> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, PartitionStatus::Exported { .. }))
            .map(|o| &o.target.output_path)
            .collect()
    }
}

/// Run a full export of `session` and register every written artifact.
///
/// # Errors
///
/// Returns an error when the plan cannot be built, the output folder cannot
/// be created or listed, or `cancel` fires. Partition failures are reported
/// in the returned [`ExportReport`].
pub async fn run_export(
    engine: &dyn QueryEngine,
    session: &ExportSession,
    rules: &RuleTable,
    registrar: &dyn LayerRegistrar,
    cancel: &CancellationToken,
) -> Result<ExportReport> {
    let plan = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(GeoFlatError::Cancelled),
        plan = plan_export(engine, session, rules) => plan?,
    };

    let output_dir = session.output_dir();
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| GeoFlatError::io(output_dir, e))?;

    let pruned = if session.options().prune_stale {
        let current: HashSet<String> = plan
            .exports
            .iter()
            .map(|p| p.partition.geometry_type_label.clone())
            .collect();
        prune_stale_artifacts(output_dir, session.layer_name(), session.release(), &current)
            .await?
    } else {
        Vec::new()
    };

    let mut outcomes = Vec::with_capacity(plan.exports.len());
    for planned in plan.exports {
        if cancel.is_cancelled() {
            return Err(GeoFlatError::Cancelled);
        }

        let PlannedExport {
            partition,
            target,
            select,
            ..
        } = planned;
        info!(
            "Exporting {} ({} row(s)) to {}",
            partition.geometry_type_label,
            partition.row_count,
            target.output_path.display()
        );

        let status = match export_partition(engine, &select, &target, &partition, cancel).await {
            Ok(ArtifactStatus::Written { bytes }) => PartitionStatus::Exported {
                bytes,
                registered: register(registrar, &target),
            },
            Ok(ArtifactStatus::Empty) => PartitionStatus::Skipped,
            Err(GeoFlatError::Export(e)) => {
                error!("{e}");
                PartitionStatus::Failed(e)
            },
            Err(e) => return Err(e),
        };

        outcomes.push(PartitionOutcome {
            partition,
            target,
            status,
        });
    }

    let report = ExportReport {
        outcomes,
        dropped_columns: plan.flatten.dropped,
        renamed: plan.flatten.renamed,
        pruned,
    };
    info!(
        "Export of '{}' {}: {} written, {} failed",
        session.layer_name(),
        report.status(),
        report.succeeded().len(),
        report.failed().count()
    );

    Ok(report)
}

fn register(registrar: &dyn LayerRegistrar, target: &ExportTarget) -> bool {
    let absolute = match std::path::absolute(&target.output_path) {
        Ok(path) => path,
        Err(e) => {
            warn!(
                "Cannot resolve {} for registration: {e}",
                target.output_path.display()
            );
            return false;
        },
    };
    let Ok(uri) = Url::from_file_path(&absolute) else {
        warn!("Cannot build a file URI for {}", absolute.display());
        return false;
    };

    let layer = RegisteredLayer {
        uri,
        display_name: target.layer_display_name.clone(),
    };
    match registrar.register(&layer) {
        Ok(()) => true,
        Err(e) => {
            warn!("Registering '{}' failed: {e:#}", layer.display_name);
            false
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ExportOptions;
    use crate::partition::partition_for_label;
    use crate::types::ShapeClass;

    fn outcome(label: &str, status: PartitionStatus) -> PartitionOutcome {
        let partition = partition_for_label("geometry", label, 1);
        let session =
            ExportSession::new("/out", "t", "Places", "r1", ExportOptions::default()).unwrap();
        PartitionOutcome {
            target: export_target(&session, &partition),
            partition,
            status,
        }
    }

    fn failure(label: &str) -> PartitionStatus {
        PartitionStatus::Failed(ExportError::ArtifactValidationFailure {
            path: PathBuf::from("/out/x.shp"),
            label: label.to_string(),
            problem: "missing",
            expected_rows: 1,
        })
    }

    fn report(outcomes: Vec<PartitionOutcome>) -> ExportReport {
        ExportReport {
            outcomes,
            dropped_columns: Vec::new(),
            renamed: Vec::new(),
            pruned: Vec::new(),
        }
    }

    #[test]
    fn test_run_status() {
        let written = || PartitionStatus::Exported {
            bytes: 10,
            registered: true,
        };

        assert_eq!(
            report(vec![outcome("POINT", written()), outcome("POLYGON", PartitionStatus::Skipped)])
                .status(),
            RunStatus::Succeeded
        );
        assert_eq!(
            report(vec![outcome("POINT", written()), outcome("POLYGON", failure("POLYGON"))])
                .status(),
            RunStatus::PartiallySucceeded
        );
        assert_eq!(
            report(vec![outcome("POLYGON", failure("POLYGON"))]).status(),
            RunStatus::Failed
        );
    }

    #[test]
    fn test_report_names_succeeded_and_failed() {
        let r = report(vec![
            outcome(
                "LINESTRING",
                PartitionStatus::Exported {
                    bytes: 10,
                    registered: false,
                },
            ),
            outcome("POINT", failure("POINT")),
        ]);
        assert_eq!(r.succeeded(), ["LINESTRING"]);
        let failed: Vec<&str> = r.failed().map(|(label, _)| label).collect();
        assert_eq!(failed, ["POINT"]);
        assert_eq!(r.artifacts().len(), 1);
        assert_eq!(r.outcomes[0].target.shape_class, ShapeClass::Line);
    }
}
