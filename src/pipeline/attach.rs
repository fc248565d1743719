//! Mount-only pipeline for an existing, detached image.
//!
//! The image is attached as-is; the partition table and filesystem are
//! assumed to exist from an earlier provisioning run. Once attached, the
//! partitions and volumes are enumerated for the report. Enumeration is
//! best-effort: a failure there drops that entry from the report but does
//! not undo or fail the attach.

use crate::disk::{AttachmentRequest, VolumeResult};
use crate::error::Result;
use crate::platform::{DiskHandle, DiskPlatform, PartitionHandle};
use crate::report::{Progress, ReportingSink};

/// Attach the image and list its lettered volumes.
pub fn attach_existing<P: DiskPlatform + ?Sized>(
    platform: &P,
    request: &AttachmentRequest,
    sink: &mut dyn ReportingSink,
) -> Result<Vec<VolumeResult>> {
    let path = &request.descriptor.resolved_path;
    if let Some(letter) = request.desired_drive_letter {
        // Existing volumes keep whatever letter the host gives them.
        tracing::debug!(%letter, "drive letter override ignored for existing image");
    }

    let disk = platform.attach_image(path)?;
    tracing::info!(path = %path.display(), disk_number = disk.disk_number, "image attached");
    sink.progress(Progress::Attached {
        disk_number: disk.disk_number,
    });

    Ok(lettered_volumes(platform, &disk))
}

fn lettered_volumes<P: DiskPlatform + ?Sized>(platform: &P, disk: &DiskHandle) -> Vec<VolumeResult> {
    let partitions = match platform.enumerate_partitions(disk.disk_number) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(disk_number = disk.disk_number, error = %e, "could not list partitions");
            return Vec::new();
        }
    };

    partitions
        .iter()
        .flat_map(|partition| volumes_on(platform, partition))
        .filter(|v| v.drive_letter.is_some())
        .collect()
}

fn volumes_on<P: DiskPlatform + ?Sized>(platform: &P, partition: &PartitionHandle) -> Vec<VolumeResult> {
    match platform.enumerate_volumes(partition) {
        Ok(volumes) => volumes
            .into_iter()
            .map(|v| VolumeResult {
                drive_letter: v.drive_letter,
                filesystem_name: v.filesystem,
                size_bytes: v.size_bytes,
            })
            .collect(),
        Err(e) => {
            tracing::warn!(
                disk_number = partition.disk_number,
                partition_number = partition.partition_number,
                error = %e,
                "could not list volumes"
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{ByteSize, DiskImageDescriptor};
    use crate::error::ErrorKind;
    use crate::platform::{MemoryPlatform, Operation};
    use crate::report::RecordingSink;
    use std::path::{Path, PathBuf};

    const GIB: u64 = 1024 * 1024 * 1024;

    fn request(path: &Path) -> AttachmentRequest {
        AttachmentRequest {
            descriptor: DiskImageDescriptor {
                resolved_path: path.to_path_buf(),
                size_limit: ByteSize::gib(50),
                exists: true,
                attached: false,
            },
            desired_drive_letter: None,
        }
    }

    #[test]
    fn test_reports_only_lettered_volumes() {
        let platform = MemoryPlatform::new();
        let path = PathBuf::from("/disks/dev.vhdx");
        platform.seed_provisioned_image(&path, 8 * GIB, Some('W'));

        let volumes = attach_existing(&platform, &request(&path), &mut RecordingSink::default())
            .unwrap();
        assert_eq!(volumes.len(), 1, "reserved partition has no letter");
        assert_eq!(volumes[0].drive_letter, Some('W'));
        assert_eq!(volumes[0].filesystem_name, "ReFS");
        assert!(platform.is_attached(&path));
    }

    #[test]
    fn test_no_provisioning_steps_run() {
        let platform = MemoryPlatform::new();
        let path = PathBuf::from("/disks/dev.vhdx");
        platform.seed_provisioned_image(&path, 8 * GIB, None);

        attach_existing(&platform, &request(&path), &mut RecordingSink::default()).unwrap();
        let ops = platform.operations();
        assert!(!ops.contains(&Operation::Initialize));
        assert!(!ops.contains(&Operation::CreatePartition));
        assert!(!ops.contains(&Operation::Format));
    }

    #[test]
    fn test_attach_failure_is_error() {
        let platform = MemoryPlatform::new();
        let path = PathBuf::from("/disks/dev.vhdx");
        platform.seed_provisioned_image(&path, 8 * GIB, None);
        platform.fail_at(Operation::Attach);

        let err = attach_existing(&platform, &request(&path), &mut RecordingSink::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Attach);
    }

    #[test]
    fn test_partition_listing_failure_is_swallowed() {
        let platform = MemoryPlatform::new();
        let path = PathBuf::from("/disks/dev.vhdx");
        platform.seed_provisioned_image(&path, 8 * GIB, None);
        platform.fail_at(Operation::EnumeratePartitions);

        let volumes = attach_existing(&platform, &request(&path), &mut RecordingSink::default())
            .unwrap();
        assert!(volumes.is_empty());
        assert!(platform.is_attached(&path), "attach is not rolled back");
    }

    #[test]
    fn test_volume_listing_failure_is_swallowed() {
        let platform = MemoryPlatform::new();
        let path = PathBuf::from("/disks/dev.vhdx");
        platform.seed_provisioned_image(&path, 8 * GIB, None);
        platform.fail_at(Operation::EnumerateVolumes);

        let volumes = attach_existing(&platform, &request(&path), &mut RecordingSink::default())
            .unwrap();
        assert!(volumes.is_empty());
    }
}
