//! Startup reconciliation between the record store and the filesystem.
//!
//! Records whose image file no longer exists are deleted. The scan is a
//! single linear pass and is not transactional: an interrupted run leaves
//! some orphans behind for the next run, and deleting twice is a no-op.
//! A record is only removed when the filesystem positively reports its file
//! as absent; a path that cannot be checked keeps its record.

use std::path::Path;

use tracing::{debug, info, warn};

use nichoir_core::error::NichoirError;

use crate::repository::RecordStore;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records examined.
    pub scanned: usize,
    /// Orphan records removed.
    pub deleted: usize,
    /// Records kept because their file could not be checked.
    pub unchecked: usize,
    /// Orphans whose deletion failed and were skipped.
    pub failed: usize,
}

/// Removes records whose referenced file is missing.
pub struct IntegrityReconciler<'a, S: RecordStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: RecordStore + ?Sized> IntegrityReconciler<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Run one pass.
    ///
    /// Only a failure to list the records is returned as an error; a failed
    /// delete is logged, counted, and the scan moves on.
    pub fn run(&self) -> Result<ReconcileReport, NichoirError> {
        info!("Checking stored image records against the filesystem");

        let records = self.store.list_all()?;
        let mut report = ReconcileReport {
            scanned: records.len(),
            ..ReconcileReport::default()
        };

        for record in records {
            match Path::new(&record.file_path).try_exists() {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!(id = record.id, path = %record.file_path, error = %e, "Cannot check image file, keeping record");
                    report.unchecked += 1;
                    continue;
                }
            }

            warn!(id = record.id, path = %record.file_path, "Image file missing, removing record");
            match self.store.delete_by_id(record.id) {
                Ok(true) => report.deleted += 1,
                Ok(false) => debug!(id = record.id, "Record already gone"),
                Err(e) => {
                    warn!(id = record.id, error = %e, "Failed to delete orphan record, skipping");
                    report.failed += 1;
                }
            }
        }

        if report.deleted == 0 && report.failed == 0 && report.unchecked == 0 {
            info!(scanned = report.scanned, "Record store matches the image directory");
        } else {
            info!(
                scanned = report.scanned,
                deleted = report.deleted,
                failed = report.failed,
                unchecked = report.unchecked,
                "Reconciliation completed"
            );
        }

        Ok(report)
    }
}
