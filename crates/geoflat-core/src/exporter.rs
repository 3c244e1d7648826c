//! Artifact lifecycle of one partition export.
//!
//! A shapefile is a set of files sharing one stem. Every export deletes the
//! whole companion set before writing, so a previous run can never leave an
//! orphaned `.dbf` or `.prj` next to a fresh `.shp`. Failed or cancelled
//! exports delete whatever they left behind.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use geoflat_core_common::QueryEngine;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::error::{ExportError, GeoFlatError, Result};
use crate::options::ExportSession;
use crate::query::build_export;
use crate::types::{ExportTarget, GeometryPartition};
use crate::utils::sanitize_file_stem;

/// Extension of the primary artifact.
pub const PRIMARY_EXTENSION: &str = "shp";

/// Every extension that may belong to one artifact's companion set.
pub const COMPANION_EXTENSIONS: &[&str] = &[
    "shp", "shx", "dbf", "prj", "cpg", "sbn", "sbx", "qix", "shp.xml",
];

/// Separator between name parts in display names.
const DISPLAY_SEPARATOR: &str = " - ";

/// Display name of a partition's layer, `<layer> - <release> - <label>`.
#[must_use]
pub fn layer_display_name(layer_name: &str, release: &str, label: &str) -> String {
    [layer_name.trim(), release.trim(), label.trim()].join(DISPLAY_SEPARATOR)
}

/// File-stem prefix shared by every artifact of one layer and release.
fn stem_prefix(layer_name: &str, release: &str) -> String {
    format!(
        "{}_-_{}_-_",
        sanitize_file_stem(layer_name),
        sanitize_file_stem(release)
    )
}

/// Export target for `partition` within `session`.
#[must_use]
pub fn export_target(session: &ExportSession, partition: &GeometryPartition) -> ExportTarget {
    let display = layer_display_name(
        session.layer_name(),
        session.release(),
        &partition.geometry_type_label,
    );
    let file_name = format!("{}.{PRIMARY_EXTENSION}", sanitize_file_stem(&display));

    ExportTarget {
        output_path: session.output_dir().join(file_name),
        layer_display_name: display,
        shape_class: partition.shape_class,
        spatial_reference: session.options().target_srs.clone(),
    }
}

/// Every path of the companion set of `primary`.
#[must_use]
pub fn companion_paths(primary: &Path) -> Vec<PathBuf> {
    let name = primary
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name
        .strip_suffix(&format!(".{PRIMARY_EXTENSION}"))
        .unwrap_or(&name);
    let dir = primary.parent().unwrap_or_else(|| Path::new(""));

    COMPANION_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{stem}.{ext}")))
        .collect()
}

/// Delete the companion set of `primary`.
///
/// Missing files are ignored and other failures only logged. Returns the
/// number of files removed.
pub async fn remove_companions(primary: &Path) -> usize {
    let mut removed = 0;
    for path in companion_paths(primary) {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed {}", path.display());
                removed += 1;
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {},
            Err(e) => warn!("Could not remove {}: {e}", path.display()),
        }
    }
    removed
}

/// Delete artifacts of `layer_name`/`release` whose geometry-type label is
/// not in `keep_labels`.
///
/// Only files matching the artifact naming scheme and a companion extension
/// are touched. Returns the removed paths.
///
/// # Errors
///
/// Returns [`GeoFlatError::Io`] if the output folder cannot be listed.
pub async fn prune_stale_artifacts(
    output_dir: &Path,
    layer_name: &str,
    release: &str,
    keep_labels: &HashSet<String>,
) -> Result<Vec<PathBuf>> {
    let prefix = stem_prefix(layer_name, release);
    let keep: HashSet<String> = keep_labels.iter().map(|l| sanitize_file_stem(l)).collect();

    let mut entries = match tokio::fs::read_dir(output_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(GeoFlatError::io(output_dir, e)),
    };

    let mut removed = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| GeoFlatError::io(output_dir, e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(rest) = name.strip_prefix(&prefix) else {
            continue;
        };
        let Some((label, extension)) = rest.split_once('.') else {
            continue;
        };
        if keep.contains(label) || !COMPANION_EXTENSIONS.contains(&extension) {
            continue;
        }

        let path = entry.path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("Removed stale artifact {}", path.display());
                removed.push(path);
            },
            Err(e) => warn!("Could not remove stale artifact {}: {e}", path.display()),
        }
    }

    Ok(removed)
}

/// Outcome of one successful partition export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactStatus {
    /// The primary file exists and is non-empty
    Written {
        /// Size of the primary file in bytes
        bytes: u64,
    },
    /// The partition had no rows; nothing to register
    Empty,
}

/// Export one partition.
///
/// Deletes the target's companion set, runs the export directive for
/// `select`, and validates the primary artifact. If `cancel` fires first the
/// directive is abandoned and any partial artifact deleted.
///
/// # Errors
///
/// Returns [`ExportError::PartitionExportFailure`] when the directive fails,
/// [`ExportError::ArtifactValidationFailure`] when rows were expected but the
/// primary file is missing, empty or cannot be read, and [`GeoFlatError::Cancelled`] on
/// cancellation.
pub async fn export_partition(
    engine: &dyn QueryEngine,
    select: &str,
    target: &ExportTarget,
    partition: &GeometryPartition,
    cancel: &CancellationToken,
) -> Result<ArtifactStatus> {
    let primary = &target.output_path;
    let label = &partition.geometry_type_label;

    // Delete first, then write.
    let stale = remove_companions(primary).await;
    if stale > 0 {
        debug!("Removed {stale} file(s) of a previous {label} artifact");
    }

    let statement = build_export(
        select,
        primary,
        target.shape_class,
        label,
        &target.spatial_reference,
    );

    let executed = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        result = engine.execute(&statement) => Some(result),
    };

    match executed {
        None => {
            remove_companions(primary).await;
            return Err(GeoFlatError::Cancelled);
        },
        Some(Err(source)) => {
            remove_companions(primary).await;
            return Err(ExportError::PartitionExportFailure {
                layer: target.layer_display_name.clone(),
                label: label.clone(),
                source,
            }
            .into());
        },
        Some(Ok(())) => {},
    }

    let size = match tokio::fs::metadata(primary).await {
        Ok(metadata) => Ok(metadata.len()),
        Err(e) if e.kind() == ErrorKind::NotFound => Err("missing"),
        Err(e) => {
            warn!("Could not read {}: {e}", primary.display());
            Err("unreadable")
        },
    };

    match size {
        Ok(bytes) if bytes > 0 && partition.row_count > 0 => {
            info!("Wrote {} ({bytes} bytes)", primary.display());
            Ok(ArtifactStatus::Written { bytes })
        },
        _ if partition.row_count == 0 => {
            warn!("Partition {label} has no rows, skipping {}", primary.display());
            remove_companions(primary).await;
            Ok(ArtifactStatus::Empty)
        },
        other => {
            remove_companions(primary).await;
            Err(ExportError::ArtifactValidationFailure {
                path: primary.clone(),
                label: label.clone(),
                problem: other.err().unwrap_or("empty"),
                expected_rows: partition.row_count,
            }
            .into())
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ExportOptions;
    use crate::partition::partition_for_label;
    use crate::types::ShapeClass;
    use async_trait::async_trait;
    use geoflat_core_common::{EngineError, EngineResult, Row};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Writes `bytes` into the `.shp` (plus a `.dbf`) on `COPY`, or fails.
    struct FakeDriver {
        bytes: Option<usize>,
        fail: Option<String>,
        statements: Mutex<Vec<String>>,
    }

    impl FakeDriver {
        fn writing(bytes: usize) -> Self {
            Self {
                bytes: Some(bytes),
                fail: None,
                statements: Mutex::new(Vec::new()),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                bytes: None,
                fail: Some(message.to_string()),
                statements: Mutex::new(Vec::new()),
            }
        }
    }

    fn target_path(sql: &str) -> PathBuf {
        let start = sql.find(") TO '").unwrap() + 6;
        let end = start + sql[start..].find("' WITH").unwrap();
        PathBuf::from(sql[start..end].replace("''", "'"))
    }

    #[async_trait]
    impl QueryEngine for FakeDriver {
        async fn describe(&self, _table: &str) -> EngineResult<Vec<(String, String)>> {
            Ok(Vec::new())
        }

        async fn query(&self, _sql: &str) -> EngineResult<Vec<Row>> {
            Ok(Vec::new())
        }

        async fn execute(&self, sql: &str) -> EngineResult<()> {
            self.statements.lock().unwrap().push(sql.to_string());
            let shp = target_path(sql);
            if let Some(bytes) = self.bytes {
                std::fs::write(&shp, vec![0u8; bytes]).unwrap();
                std::fs::write(shp.with_extension("dbf"), b"dbf").unwrap();
            }
            match &self.fail {
                Some(message) => {
                    std::fs::write(&shp, b"partial").unwrap();
                    Err(EngineError::Statement {
                        message: message.clone(),
                    })
                },
                None => Ok(()),
            }
        }
    }

    /// Never finishes.
    struct Hanging;

    #[async_trait]
    impl QueryEngine for Hanging {
        async fn describe(&self, _table: &str) -> EngineResult<Vec<(String, String)>> {
            Ok(Vec::new())
        }

        async fn query(&self, _sql: &str) -> EngineResult<Vec<Row>> {
            Ok(Vec::new())
        }

        async fn execute(&self, sql: &str) -> EngineResult<()> {
            std::fs::write(target_path(sql), b"half").unwrap();
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn session(dir: &Path) -> ExportSession {
        ExportSession::new(dir, "places", "Places", "2024-07-22.0", ExportOptions::default())
            .unwrap()
    }

    #[test]
    fn test_export_target_naming() {
        let session = ExportSession::new(
            "/out",
            "places",
            "Land Use",
            "2024-07-22.0",
            ExportOptions::default(),
        )
        .unwrap();
        let partition = partition_for_label("geometry", "MULTIPOLYGON", 1);
        let target = export_target(&session, &partition);
        assert_eq!(
            target.output_path,
            PathBuf::from("/out/Land_Use_-_2024-07-22.0_-_MULTIPOLYGON.shp")
        );
        assert_eq!(target.layer_display_name, "Land Use - 2024-07-22.0 - MULTIPOLYGON");
        assert_eq!(target.shape_class, ShapeClass::Polygon);
        assert_eq!(target.spatial_reference, "EPSG:4326");
    }

    #[test]
    fn test_companion_paths_keep_dotted_stem() {
        let paths = companion_paths(Path::new("/out/Places_-_2024-07-22.0_-_POINT.shp"));
        assert_eq!(paths.len(), COMPANION_EXTENSIONS.len());
        assert!(paths.contains(&PathBuf::from("/out/Places_-_2024-07-22.0_-_POINT.dbf")));
        assert!(paths.contains(&PathBuf::from("/out/Places_-_2024-07-22.0_-_POINT.shp.xml")));
    }

    #[tokio::test]
    async fn test_export_replaces_previous_companions() {
        let dir = TempDir::new().unwrap();
        let session = session(dir.path());
        let partition = partition_for_label("geometry", "POINT", 3);
        let target = export_target(&session, &partition);

        // Leftovers of an earlier run, including one the driver won't rewrite.
        for path in companion_paths(&target.output_path) {
            std::fs::write(path, b"old").unwrap();
        }

        let engine = FakeDriver::writing(128);
        let status = export_partition(
            &engine,
            "SELECT 1",
            &target,
            &partition,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(status, ArtifactStatus::Written { bytes: 128 });
        let mut left: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(
            left,
            [
                "Places_-_2024-07-22.0_-_POINT.dbf",
                "Places_-_2024-07-22.0_-_POINT.shp"
            ]
        );
    }

    #[tokio::test]
    async fn test_driver_failure_is_wrapped_and_cleaned() {
        let dir = TempDir::new().unwrap();
        let session = session(dir.path());
        let partition = partition_for_label("geometry", "LINESTRING", 3);
        let target = export_target(&session, &partition);

        let engine = FakeDriver::failing("GDAL Error (1): disk full");
        let err = export_partition(
            &engine,
            "SELECT 1",
            &target,
            &partition,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        match err {
            GeoFlatError::Export(ExportError::PartitionExportFailure { layer, label, source }) => {
                assert_eq!(layer, "Places - 2024-07-22.0 - LINESTRING");
                assert_eq!(label, "LINESTRING");
                assert!(source.to_string().contains("disk full"));
            },
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!target.output_path.exists());
    }

    #[tokio::test]
    async fn test_missing_artifact_with_rows_fails_validation() {
        let dir = TempDir::new().unwrap();
        let session = session(dir.path());
        let partition = partition_for_label("geometry", "POINT", 5);
        let target = export_target(&session, &partition);

        let engine = FakeDriver {
            bytes: None,
            fail: None,
            statements: Mutex::new(Vec::new()),
        };
        let err = export_partition(
            &engine,
            "SELECT 1",
            &target,
            &partition,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            GeoFlatError::Export(ExportError::ArtifactValidationFailure {
                problem: "missing",
                expected_rows: 5,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_zero_byte_artifact_with_rows_fails_validation() {
        let dir = TempDir::new().unwrap();
        let session = session(dir.path());
        let partition = partition_for_label("geometry", "POINT", 5);
        let target = export_target(&session, &partition);

        let err = export_partition(
            &FakeDriver::writing(0),
            "SELECT 1",
            &target,
            &partition,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            GeoFlatError::Export(ExportError::ArtifactValidationFailure { problem: "empty", .. })
        ));
        assert!(!target.output_path.exists());
    }

    #[tokio::test]
    async fn test_unreadable_artifact_fails_validation() {
        let dir = TempDir::new().unwrap();
        let session = session(dir.path());
        let partition = partition_for_label("geometry", "POINT", 5);
        // A regular file where the output folder should be makes the
        // artifact lookup fail with something other than "not found".
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"not a folder").unwrap();
        let target = ExportTarget {
            output_path: blocker.join("Places_-_r1_-_POINT.shp"),
            ..export_target(&session, &partition)
        };

        let engine = FakeDriver {
            bytes: None,
            fail: None,
            statements: Mutex::new(Vec::new()),
        };
        let err = export_partition(
            &engine,
            "SELECT 1",
            &target,
            &partition,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            GeoFlatError::Export(ExportError::ArtifactValidationFailure {
                problem: "unreadable",
                expected_rows: 5,
                ..
            })
        ));
        assert!(blocker.is_file());
    }

    #[tokio::test]
    async fn test_empty_partition_is_skipped() {
        let dir = TempDir::new().unwrap();
        let session = session(dir.path());
        let partition = partition_for_label("geometry", "POINT", 0);
        let target = export_target(&session, &partition);

        let status = export_partition(
            &FakeDriver::writing(0),
            "SELECT 1",
            &target,
            &partition,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(status, ArtifactStatus::Empty);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_removes_partial_artifact() {
        let dir = TempDir::new().unwrap();
        let session = session(dir.path());
        let partition = partition_for_label("geometry", "POLYGON", 5);
        let target = export_target(&session, &partition);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = export_partition(&Hanging, "SELECT 1", &target, &partition, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, GeoFlatError::Cancelled));
        assert!(!target.output_path.exists());
    }

    #[tokio::test]
    async fn test_prune_removes_only_stale_labels_of_same_release() {
        let dir = TempDir::new().unwrap();
        let files = [
            "Places_-_2024-07-22.0_-_POINT.shp",
            "Places_-_2024-07-22.0_-_POINT.dbf",
            "Places_-_2024-07-22.0_-_POLYGON.shp",
            "Places_-_2024-07-22.0_-_POLYGON.prj",
            "Places_-_2024-06-13.0_-_POLYGON.shp",
            "Places_-_2024-07-22.0_-_POLYGON.txt",
            "notes.md",
        ];
        for f in files {
            std::fs::write(dir.path().join(f), b"x").unwrap();
        }

        let keep: HashSet<String> = ["POINT".to_string()].into_iter().collect();
        let mut removed =
            prune_stale_artifacts(dir.path(), "Places", "2024-07-22.0", &keep)
                .await
                .unwrap();
        removed.sort();

        assert_eq!(
            removed,
            vec![
                dir.path().join("Places_-_2024-07-22.0_-_POLYGON.prj"),
                dir.path().join("Places_-_2024-07-22.0_-_POLYGON.shp"),
            ]
        );
        assert!(dir.path().join("Places_-_2024-06-13.0_-_POLYGON.shp").exists());
        assert!(dir.path().join("Places_-_2024-07-22.0_-_POLYGON.txt").exists());
    }

    #[tokio::test]
    async fn test_prune_missing_folder_is_noop() {
        let dir = TempDir::new().unwrap();
        let removed = prune_stale_artifacts(
            &dir.path().join("missing"),
            "Places",
            "2024-07-22.0",
            &HashSet::new(),
        )
        .await
        .unwrap();
        assert!(removed.is_empty());
    }
}
