//! Best-effort cleanup after a failed provisioning run.
//!
//! Detach first (the file cannot be deleted while attached), then delete
//! the image file. Neither failure is raised: a detach failure is expected
//! when the run never got as far as attaching, and a delete failure becomes
//! a [`CleanupWarning`] so the operator knows to remove the file by hand.
//!
//! When allocation itself failed this run never called attach, so any
//! attachment at the path belongs to someone else and detach is skipped.

use super::provision::{ProvisionFailure, ProvisionStage};
use crate::platform::DiskPlatform;
use crate::report::{Progress, ReportingSink};
use std::fmt;
use std::path::PathBuf;

/// Cleanup could not remove the partial image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWarning {
    /// File left behind.
    pub path: PathBuf,
    /// Why deletion failed.
    pub reason: String,
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "partial image could not be removed: {}: {}",
            self.path.display(),
            self.reason
        )
    }
}

/// What cleanup managed to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Detach succeeded.
    pub detached: bool,
    /// The image file is gone.
    pub deleted: bool,
    /// Set when the file could not be deleted.
    pub warning: Option<CleanupWarning>,
}

impl CleanupReport {
    /// Whether nothing is left for the operator to remove.
    pub fn is_clean(&self) -> bool {
        self.deleted && self.warning.is_none()
    }
}

/// Undo a partially provisioned image. Never fails.
pub fn compensate<P: DiskPlatform + ?Sized>(
    platform: &P,
    failure: &ProvisionFailure,
    sink: &mut dyn ReportingSink,
) -> CleanupReport {
    let path = &failure.path;
    sink.progress(Progress::CleanupStarted);
    tracing::info!(
        path = %path.display(),
        last_completed = %failure.last_completed,
        "cleaning up partial image"
    );

    let detached = if failure.last_completed == ProvisionStage::Unallocated {
        tracing::debug!(path = %path.display(), "never attached, skipping detach");
        false
    } else {
        match platform.detach_image(path) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "detach during cleanup failed");
                false
            }
        }
    };

    let (deleted, warning) = match platform.delete_image_file(path) {
        Ok(()) => (true, None),
        Err(e) => {
            let warning = CleanupWarning {
                path: path.clone(),
                reason: e.to_string(),
            };
            tracing::warn!(path = %path.display(), error = %e, "could not delete partial image");
            (false, Some(warning))
        }
    };

    CleanupReport {
        detached,
        deleted,
        warning,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::platform::{MemoryPlatform, Operation};
    use crate::report::RecordingSink;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn failure(stage: ProvisionStage) -> ProvisionFailure {
        ProvisionFailure {
            error: Error::format(1, 2, "boom"),
            last_completed: stage,
            path: PathBuf::from("/disks/new.vhdx"),
            owns_image: true,
        }
    }

    #[test]
    fn test_detaches_then_deletes() {
        let platform = MemoryPlatform::new();
        let f = failure(ProvisionStage::Partitioned);
        platform.allocate_dynamic_image(&f.path, GIB).unwrap();
        platform.attach_image(&f.path).unwrap();

        let report = compensate(&platform, &f, &mut RecordingSink::default());
        assert!(report.detached);
        assert!(report.deleted);
        assert!(report.is_clean());
        assert!(!platform.image_exists(&f.path));

        let ops = platform.operations();
        assert_eq!(&ops[ops.len() - 2..], &[Operation::Detach, Operation::Delete]);
    }

    #[test]
    fn test_detach_failure_is_ignored() {
        // Allocated but never attached: detach fails, delete still runs.
        let platform = MemoryPlatform::new();
        let f = failure(ProvisionStage::Allocated);
        platform.allocate_dynamic_image(&f.path, GIB).unwrap();

        let report = compensate(&platform, &f, &mut RecordingSink::default());
        assert!(!report.detached);
        assert!(report.deleted);
        assert!(!platform.image_exists(&f.path));
    }

    #[test]
    fn test_delete_failure_becomes_warning() {
        let platform = MemoryPlatform::new();
        let f = failure(ProvisionStage::Allocated);
        platform.allocate_dynamic_image(&f.path, GIB).unwrap();
        platform.fail_at(Operation::Delete);

        let report = compensate(&platform, &f, &mut RecordingSink::default());
        assert!(!report.deleted);
        let warning = report.warning.expect("warning expected");
        assert_eq!(warning.path, f.path);
        assert!(warning.to_string().contains("/disks/new.vhdx"));
        assert!(platform.image_exists(&f.path));
    }

    #[test]
    fn test_stuck_attachment_leaves_warning() {
        // Detach fails on an attached disk, so the file is still in use.
        let platform = MemoryPlatform::new();
        let f = failure(ProvisionStage::Formatted);
        platform.allocate_dynamic_image(&f.path, GIB).unwrap();
        platform.attach_image(&f.path).unwrap();
        platform.fail_at(Operation::Detach);

        let report = compensate(&platform, &f, &mut RecordingSink::default());
        assert!(!report.detached);
        assert!(!report.is_clean());
        assert!(report.warning.is_some());
    }

    #[test]
    fn test_failed_allocation_never_detaches() {
        // Another process won the race and has its image attached here.
        let platform = MemoryPlatform::new();
        let f = failure(ProvisionStage::Unallocated);
        platform.seed_attached_image(&f.path, GIB);

        let report = compensate(&platform, &f, &mut RecordingSink::default());
        assert!(!report.detached);
        assert!(!platform.operations().contains(&Operation::Detach));
        assert!(platform.is_attached(&f.path), "foreign attachment untouched");
        assert!(platform.image_exists(&f.path));
        assert!(report.warning.is_some());
    }

    #[test]
    fn test_nothing_allocated_is_still_clean() {
        let platform = MemoryPlatform::new();
        let f = failure(ProvisionStage::Unallocated);

        let report = compensate(&platform, &f, &mut RecordingSink::default());
        assert!(report.is_clean());
    }
}
