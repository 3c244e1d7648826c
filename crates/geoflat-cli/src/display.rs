//! Display utilities for formatting CLI output.
//!
//! This module provides table row structures and formatting functions for
//! export plans and run reports.

use tabled::{Table, Tabled};

use geoflat_core::orchestrator::{ExportPlan, ExportReport, PartitionStatus};
use geoflat_core::types::ShapeClass;

/// Table row for one source column and what it becomes.
#[derive(Tabled)]
pub struct ColumnRow {
    /// Source column name.
    #[tabled(rename = "Column")]
    pub name: String,
    /// Declared engine type.
    #[tabled(rename = "Type")]
    pub declared_type: String,
    /// How the flattener treats the column.
    #[tabled(rename = "Kind")]
    pub kind: String,
    /// Attribute names written for the column, comma separated.
    #[tabled(rename = "Attributes")]
    pub outputs: String,
}

/// Table row for one geometry partition.
#[derive(Tabled)]
pub struct PartitionRow {
    /// Geometry-type label.
    #[tabled(rename = "Geometry Type")]
    pub label: String,
    /// Output shape class.
    #[tabled(rename = "Shape")]
    pub shape: String,
    /// Rows in the partition.
    #[tabled(rename = "Rows")]
    pub rows: u64,
    /// Primary file name.
    #[tabled(rename = "File")]
    pub file: String,
}

/// Table row for one partition of a finished run.
#[derive(Tabled)]
pub struct OutcomeRow {
    /// Geometry-type label.
    #[tabled(rename = "Geometry Type")]
    pub label: String,
    /// Exported, skipped or failed.
    #[tabled(rename = "Status")]
    pub status: String,
    /// Rows in the partition.
    #[tabled(rename = "Rows")]
    pub rows: u64,
    /// Primary file name.
    #[tabled(rename = "File")]
    pub file: String,
    /// Failure or registration note.
    #[tabled(rename = "Message")]
    pub message: String,
}

fn file_name(path: &std::path::Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

/// One row per source column of `plan`.
#[must_use]
pub fn column_rows(plan: &ExportPlan) -> Vec<ColumnRow> {
    plan.flatten
        .columns
        .iter()
        .map(|c| ColumnRow {
            name: c.column.clone(),
            declared_type: plan
                .schema
                .column(&c.column)
                .map(|d| d.declared_type.clone())
                .unwrap_or_default(),
            kind: c.kind.as_str().to_string(),
            outputs: if c.outputs.is_empty() {
                "-".to_string()
            } else {
                c.outputs.join(", ")
            },
        })
        .collect()
}

/// One row per planned partition.
#[must_use]
pub fn partition_rows(plan: &ExportPlan) -> Vec<PartitionRow> {
    plan.exports
        .iter()
        .map(|p| PartitionRow {
            label: p.partition.geometry_type_label.clone(),
            shape: p.partition.shape_class.to_string(),
            rows: p.partition.row_count,
            file: file_name(&p.target.output_path),
        })
        .collect()
}

/// One row per partition outcome.
#[must_use]
pub fn outcome_rows(report: &ExportReport) -> Vec<OutcomeRow> {
    report
        .outcomes
        .iter()
        .map(|o| {
            let (status, message) = match &o.status {
                PartitionStatus::Exported { registered, .. } => (
                    "exported",
                    if *registered {
                        String::new()
                    } else {
                        "not registered".to_string()
                    },
                ),
                PartitionStatus::Skipped => ("skipped", "no rows".to_string()),
                PartitionStatus::Failed(e) => ("failed", e.to_string()),
            };
            OutcomeRow {
                label: o.label().to_string(),
                status: status.to_string(),
                rows: o.partition.row_count,
                file: file_name(&o.target.output_path),
                message,
            }
        })
        .collect()
}

/// Print the schema, projection and partition set of `plan`.
pub fn display_plan(plan: &ExportPlan, sampled: Option<ShapeClass>) {
    println!("\nTable: {}", plan.schema.table);

    println!("\n=== Columns ===");
    println!("{}", Table::new(column_rows(plan)));

    if !plan.flatten.dropped.is_empty() {
        println!("\nDropped: {}", plan.flatten.dropped.join(", "));
    }
    for rename in &plan.flatten.renamed {
        println!(
            "Renamed: {} -> {} (column {})",
            rename.requested, rename.assigned, rename.column
        );
    }

    println!("\n=== Partitions ===");
    println!("{}", Table::new(partition_rows(plan)));

    if let Some(shape) = sampled {
        println!("\nSampled shape class: {shape}");
    }
}

/// Print every export statement of `plan`.
pub fn display_statements(plan: &ExportPlan) {
    for planned in &plan.exports {
        println!(
            "\n-- {} ({} rows)\n{};",
            planned.target.layer_display_name, planned.partition.row_count, planned.statement
        );
    }
}

/// Print the run summary.
pub fn display_report(report: &ExportReport) {
    println!("\n{}", Table::new(outcome_rows(report)));
    for path in &report.pruned {
        println!("Pruned: {}", path.display());
    }
    println!("\nExport {}", report.status());
}
