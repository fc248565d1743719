//! Create-from-scratch pipeline.
//!
//! ```text
//! Unallocated -> Allocated -> Attached -> Initialized -> Partitioned -> Formatted -> Complete
//! ```
//!
//! Each state carries the handle produced by the step that reached it, and
//! each transition consumes that handle. States are never skipped and no
//! step is retried: host operations are not assumed idempotent mid-step.
//! A failed step yields a [`ProvisionFailure`] naming the last state that
//! was reached, which is what [`super::compensate`] works from.

use crate::disk::{AttachmentRequest, FormatSpec, VolumeResult};
use crate::error::{Error, Result};
use crate::platform::{
    DiskHandle, DiskPlatform, ImageHandle, PartitionHandle, PartitionRequest, PartitionStyle,
    VolumeInfo,
};
use crate::report::{Progress, ReportingSink};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Position in the provisioning sequence, without handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStage {
    /// Nothing created yet.
    Unallocated,
    /// Image file exists.
    Allocated,
    /// Image attached as a disk.
    Attached,
    /// Partition table written.
    Initialized,
    /// Data partition created.
    Partitioned,
    /// Volume formatted.
    Formatted,
    /// Result built.
    Complete,
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProvisionStage::Unallocated => "unallocated",
            ProvisionStage::Allocated => "allocated",
            ProvisionStage::Attached => "attached",
            ProvisionStage::Initialized => "initialized",
            ProvisionStage::Partitioned => "partitioned",
            ProvisionStage::Formatted => "formatted",
            ProvisionStage::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// Provisioning state with the handle each step produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionState {
    /// Start state.
    Unallocated,
    /// After allocation.
    Allocated(ImageHandle),
    /// After attach.
    Attached(DiskHandle),
    /// After writing the partition table.
    Initialized(DiskHandle),
    /// After creating the data partition.
    Partitioned(PartitionHandle),
    /// After formatting.
    Formatted(VolumeInfo),
    /// Terminal.
    Complete(VolumeResult),
}

impl ProvisionState {
    /// The stage this state represents.
    pub fn stage(&self) -> ProvisionStage {
        match self {
            ProvisionState::Unallocated => ProvisionStage::Unallocated,
            ProvisionState::Allocated(_) => ProvisionStage::Allocated,
            ProvisionState::Attached(_) => ProvisionStage::Attached,
            ProvisionState::Initialized(_) => ProvisionStage::Initialized,
            ProvisionState::Partitioned(_) => ProvisionStage::Partitioned,
            ProvisionState::Formatted(_) => ProvisionStage::Formatted,
            ProvisionState::Complete(_) => ProvisionStage::Complete,
        }
    }
}

/// A provisioning step failed.
#[derive(Debug)]
pub struct ProvisionFailure {
    /// The step's error, unchanged.
    pub error: Error,
    /// Last stage that completed before the failing step.
    pub last_completed: ProvisionStage,
    /// Image path being provisioned.
    pub path: PathBuf,
    /// False when the file at `path` was not created by this run, in which
    /// case it must not be cleaned up.
    pub owns_image: bool,
}

/// Runs the create-from-scratch sequence for one request.
pub struct ProvisioningPipeline<'a, P: DiskPlatform + ?Sized> {
    platform: &'a P,
    request: &'a AttachmentRequest,
    format: &'a FormatSpec,
}

impl<'a, P: DiskPlatform + ?Sized> ProvisioningPipeline<'a, P> {
    /// Create a pipeline for `request`.
    pub fn new(platform: &'a P, request: &'a AttachmentRequest, format: &'a FormatSpec) -> Self {
        Self {
            platform,
            request,
            format,
        }
    }

    fn path(&self) -> &Path {
        &self.request.descriptor.resolved_path
    }

    /// Run every step until `Complete` or the first failure.
    pub fn run(
        &self,
        sink: &mut dyn ReportingSink,
    ) -> std::result::Result<VolumeResult, ProvisionFailure> {
        if self.platform.image_exists(self.path()) {
            tracing::warn!(path = %self.path().display(), "image appeared after probing");
            return Err(ProvisionFailure {
                error: Error::allocation(self.path(), "an image appeared at this path after probing"),
                last_completed: ProvisionStage::Unallocated,
                path: self.path().to_path_buf(),
                owns_image: false,
            });
        }

        let mut state = ProvisionState::Unallocated;
        loop {
            if let ProvisionState::Complete(result) = state {
                return Ok(result);
            }

            let last_completed = state.stage();
            state = self.step(state).map_err(|error| {
                tracing::warn!(
                    path = %self.path().display(),
                    stage = %last_completed,
                    error = %error,
                    "provisioning step failed"
                );
                ProvisionFailure {
                    error,
                    last_completed,
                    path: self.path().to_path_buf(),
                    owns_image: true,
                }
            })?;

            tracing::info!(path = %self.path().display(), stage = %state.stage(), "provisioning advanced");
            sink.progress(Progress::Stage(state.stage()));
        }
    }

    /// Perform the single transition out of `state`.
    ///
    /// `Complete` is terminal and is returned unchanged.
    pub fn step(&self, state: ProvisionState) -> Result<ProvisionState> {
        match state {
            ProvisionState::Unallocated => self.allocate().map(ProvisionState::Allocated),
            ProvisionState::Allocated(_) => self.attach().map(ProvisionState::Attached),
            ProvisionState::Attached(disk) => self
                .initialize(&disk)
                .map(|()| ProvisionState::Initialized(disk)),
            ProvisionState::Initialized(disk) => {
                self.partition(&disk).map(ProvisionState::Partitioned)
            }
            ProvisionState::Partitioned(partition) => {
                self.format(&partition).map(ProvisionState::Formatted)
            }
            ProvisionState::Formatted(volume) => Ok(ProvisionState::Complete(self.complete(volume))),
            done @ ProvisionState::Complete(_) => Ok(done),
        }
    }

    fn allocate(&self) -> Result<ImageHandle> {
        let limit = self.request.descriptor.size_limit;
        tracing::info!(path = %self.path().display(), size = %limit, "allocating dynamic image");
        self.platform
            .allocate_dynamic_image(self.path(), limit.as_u64())
    }

    fn attach(&self) -> Result<DiskHandle> {
        let disk = self.platform.attach_image(self.path())?;
        tracing::info!(path = %self.path().display(), disk_number = disk.disk_number, "image attached");
        Ok(disk)
    }

    fn initialize(&self, disk: &DiskHandle) -> Result<()> {
        self.platform
            .initialize_partition_table(disk, PartitionStyle::Gpt)
    }

    fn partition(&self, disk: &DiskHandle) -> Result<PartitionHandle> {
        let request = PartitionRequest {
            use_maximum_size: true,
            drive_letter: self.request.desired_drive_letter,
        };
        match request.drive_letter {
            Some(letter) => tracing::info!(disk_number = disk.disk_number, %letter, "creating partition"),
            None => tracing::info!(disk_number = disk.disk_number, "creating partition with auto-assigned letter"),
        }
        self.platform.create_partition(disk, &request)
    }

    fn format(&self, partition: &PartitionHandle) -> Result<VolumeInfo> {
        tracing::info!(
            disk_number = partition.disk_number,
            partition_number = partition.partition_number,
            filesystem = %self.format.filesystem,
            label = %self.format.label,
            dev_workload = self.format.dev_workload_optimized,
            "formatting volume"
        );
        self.platform.format_volume(partition, self.format)
    }

    fn complete(&self, volume: VolumeInfo) -> VolumeResult {
        let limit = self.request.descriptor.size_limit.as_u64();
        if volume.size_bytes > limit {
            tracing::warn!(
                size_bytes = volume.size_bytes,
                limit_bytes = limit,
                "platform reported a volume larger than the image limit"
            );
        }
        VolumeResult {
            drive_letter: volume.drive_letter,
            filesystem_name: volume.filesystem,
            size_bytes: volume.size_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{ByteSize, DiskImageDescriptor, DriveLetter};
    use crate::error::ErrorKind;
    use crate::platform::{MemoryPlatform, Operation};
    use crate::report::RecordingSink;

    fn request(letter: Option<char>) -> AttachmentRequest {
        AttachmentRequest {
            descriptor: DiskImageDescriptor {
                resolved_path: PathBuf::from("/disks/new.vhdx"),
                size_limit: ByteSize::gib(10),
                exists: false,
                attached: false,
            },
            desired_drive_letter: letter.map(|c| DriveLetter::new(c).unwrap()),
        }
    }

    #[test]
    fn test_stages_are_ordered() {
        assert!(ProvisionStage::Unallocated < ProvisionStage::Allocated);
        assert!(ProvisionStage::Partitioned < ProvisionStage::Formatted);
        assert!(ProvisionStage::Formatted < ProvisionStage::Complete);
    }

    #[test]
    fn test_run_visits_every_stage_in_order() {
        let platform = MemoryPlatform::new();
        let req = request(None);
        let format = FormatSpec::default();
        let mut sink = RecordingSink::default();

        let result = ProvisioningPipeline::new(&platform, &req, &format)
            .run(&mut sink)
            .unwrap();

        assert_eq!(
            sink.stages(),
            vec![
                ProvisionStage::Allocated,
                ProvisionStage::Attached,
                ProvisionStage::Initialized,
                ProvisionStage::Partitioned,
                ProvisionStage::Formatted,
                ProvisionStage::Complete,
            ]
        );
        assert_eq!(
            platform.operations(),
            vec![
                Operation::Allocate,
                Operation::Attach,
                Operation::Initialize,
                Operation::CreatePartition,
                Operation::Format,
            ]
        );
        assert_eq!(result.filesystem_name, "ReFS");
        assert!(result.drive_letter.is_some());
        assert!(result.size_bytes <= ByteSize::gib(10).as_u64());
    }

    #[test]
    fn test_format_requests_dev_drive() {
        let platform = MemoryPlatform::new();
        let req = request(None);
        let format = FormatSpec::default();

        ProvisioningPipeline::new(&platform, &req, &format)
            .run(&mut RecordingSink::default())
            .unwrap();

        let specs = platform.format_specs(&req.descriptor.resolved_path);
        assert_eq!(specs.len(), 1, "one data volume formatted");
        assert!(specs[0].dev_workload_optimized, "dev-workload flag requested");
        assert_eq!(specs[0].label, "DevDrive");
        assert_eq!(specs[0].filesystem, "ReFS");
    }

    #[test]
    fn test_step_is_single_transition() {
        let platform = MemoryPlatform::new();
        let req = request(None);
        let format = FormatSpec::default();
        let pipeline = ProvisioningPipeline::new(&platform, &req, &format);

        let next = pipeline.step(ProvisionState::Unallocated).unwrap();
        assert_eq!(next.stage(), ProvisionStage::Allocated);
        assert_eq!(platform.operations(), vec![Operation::Allocate]);

        let next = pipeline.step(next).unwrap();
        assert_eq!(next.stage(), ProvisionStage::Attached);
    }

    #[test]
    fn test_complete_is_terminal() {
        let platform = MemoryPlatform::new();
        let req = request(None);
        let format = FormatSpec::default();
        let pipeline = ProvisioningPipeline::new(&platform, &req, &format);

        let done = ProvisionState::Complete(VolumeResult {
            drive_letter: Some('D'),
            filesystem_name: "ReFS".into(),
            size_bytes: 1,
        });
        assert_eq!(pipeline.step(done.clone()).unwrap(), done);
        assert!(platform.calls().is_empty());
    }

    #[test]
    fn test_explicit_letter_is_honored() {
        let platform = MemoryPlatform::new();
        let req = request(Some('T'));
        let format = FormatSpec::default();

        let result = ProvisioningPipeline::new(&platform, &req, &format)
            .run(&mut RecordingSink::default())
            .unwrap();
        assert_eq!(result.drive_letter, Some('T'));
    }

    #[test]
    fn test_failure_reports_last_completed_stage() {
        let cases = [
            (Operation::Allocate, ProvisionStage::Unallocated, ErrorKind::Allocation),
            (Operation::Attach, ProvisionStage::Allocated, ErrorKind::Attach),
            (Operation::Initialize, ProvisionStage::Attached, ErrorKind::Init),
            (Operation::CreatePartition, ProvisionStage::Initialized, ErrorKind::Partition),
            (Operation::Format, ProvisionStage::Partitioned, ErrorKind::Format),
        ];

        for (op, stage, kind) in cases {
            let platform = MemoryPlatform::new();
            platform.fail_at(op);
            let req = request(None);
            let format = FormatSpec::default();

            let failure = ProvisioningPipeline::new(&platform, &req, &format)
                .run(&mut RecordingSink::default())
                .unwrap_err();
            assert_eq!(failure.last_completed, stage, "failing at {:?}", op);
            assert_eq!(failure.error.kind(), kind, "failing at {:?}", op);
            assert_eq!(failure.path, PathBuf::from("/disks/new.vhdx"));
            assert_eq!(
                platform.operations().last(),
                Some(&op),
                "no step runs after {:?} fails",
                op
            );
        }
    }

    #[test]
    fn test_image_created_after_probe_is_not_owned() {
        let platform = MemoryPlatform::new();
        let req = request(None);
        platform.seed_provisioned_image(&req.descriptor.resolved_path, 4 << 30, None);
        let format = FormatSpec::default();

        let failure = ProvisioningPipeline::new(&platform, &req, &format)
            .run(&mut RecordingSink::default())
            .unwrap_err();
        assert!(!failure.owns_image);
        assert_eq!(failure.error.kind(), ErrorKind::Allocation);
        assert!(platform.calls().is_empty(), "nothing allocated");
    }

    #[test]
    fn test_taken_letter_fails_without_fallback() {
        let platform = MemoryPlatform::new();
        platform.reserve_letter('E');
        let req = request(Some('E'));
        let format = FormatSpec::default();

        let failure = ProvisioningPipeline::new(&platform, &req, &format)
            .run(&mut RecordingSink::default())
            .unwrap_err();
        assert_eq!(failure.error.kind(), ErrorKind::DriveLetterConflict);
        assert_eq!(failure.last_completed, ProvisionStage::Initialized);
        let partition_calls = platform
            .operations()
            .iter()
            .filter(|op| **op == Operation::CreatePartition)
            .count();
        assert_eq!(partition_calls, 1, "no retry with another letter");
    }
}
