//! Disk lifecycle dispatch.
//!
//! ```text
//! resolve path -> probe -> Absent          -> provision (compensate on failure)
//!                       -> PresentDetached -> attach existing
//!                       -> PresentAttached -> reject
//! ```
//!
//! [`run`] always returns a [`PipelineOutcome`]; reporting and the exit code
//! are pure functions of it (see [`crate::report`]).
//!
//! There is no lock between probing and the first mutating call. Two
//! invocations racing on the same path are separated by the platform
//! refusing to attach an image twice, and by provisioning re-checking for
//! the file before allocating. A file this run did not create is never
//! cleaned up.

pub mod attach;
pub mod compensate;
pub mod provision;

pub use compensate::{CleanupReport, CleanupWarning};
pub use provision::{ProvisionStage, ProvisionState, ProvisioningPipeline};

use crate::config::Settings;
use crate::disk::{AttachmentRequest, ByteSize, DiskImageDescriptor, DriveLetter, VolumeResult};
use crate::error::Error;
use crate::path;
use crate::platform::DiskPlatform;
use crate::probe::{self, ImageState};
use crate::report::{Progress, ReportingSink};
use std::fmt;
use std::path::PathBuf;

/// Parameters of one `up` invocation, already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Image path as typed by the operator.
    pub path: String,
    /// Size limit for a new image.
    pub size_limit: ByteSize,
    /// Drive letter override for a new image.
    pub drive_letter: Option<DriveLetter>,
    /// Report the intended action without mutating anything.
    pub what_if: bool,
}

/// What a what-if run would have done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAction {
    /// Create, partition and format a new image.
    Create {
        /// Resolved image path.
        path: PathBuf,
        /// Size limit.
        size_limit: ByteSize,
        /// Requested letter, if any.
        drive_letter: Option<DriveLetter>,
        /// Whether the parent directory would be created first.
        creates_parent: bool,
    },
    /// Attach an existing image.
    Attach {
        /// Resolved image path.
        path: PathBuf,
    },
}

/// Refusal to act on an image that is already attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Resolved image path.
    pub path: PathBuf,
    /// Disk the image is attached as.
    pub disk_number: u32,
    /// Host-native command that detaches it.
    pub platform_detach_command: String,
}

impl Rejection {
    /// Short reason text.
    pub fn reason(&self) -> String {
        format!("already attached at disk {}", self.disk_number)
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason())
    }
}

/// A run that ended in an error.
#[derive(Debug)]
pub struct Failure {
    /// Resolved image path, when resolution got that far.
    pub path: Option<PathBuf>,
    /// The original error.
    pub error: Error,
    /// Last provisioning stage reached, for create runs.
    pub last_completed: Option<ProvisionStage>,
    /// Cleanup result, for create runs.
    pub cleanup: Option<CleanupReport>,
}

impl Failure {
    fn without_cleanup(path: Option<PathBuf>, error: Error) -> Self {
        Self {
            path,
            error,
            last_completed: None,
            cleanup: None,
        }
    }

    /// Whether cleanup ran and removed the partial image.
    pub fn cleanup_performed(&self) -> bool {
        self.cleanup.as_ref().map(|c| c.is_clean()).unwrap_or(false)
    }
}

/// The single result of an invocation.
#[derive(Debug)]
pub enum PipelineOutcome {
    /// A new image was provisioned.
    Created(VolumeResult),
    /// An existing image was attached.
    Mounted(Vec<VolumeResult>),
    /// The image is already attached; nothing was changed.
    Rejected(Rejection),
    /// A step failed.
    Failed(Failure),
    /// What-if run; nothing was changed.
    WhatIf(PlannedAction),
}

impl PipelineOutcome {
    /// Whether the run achieved its goal (or would have, for what-if).
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            PipelineOutcome::Created(_) | PipelineOutcome::Mounted(_) | PipelineOutcome::WhatIf(_)
        )
    }
}

/// Resolve, probe and dispatch one invocation.
pub fn run<P: DiskPlatform + ?Sized>(
    platform: &P,
    settings: &Settings,
    invocation: &Invocation,
    sink: &mut dyn ReportingSink,
) -> PipelineOutcome {
    let path = match path::resolve(&invocation.path, settings, !invocation.what_if) {
        Ok(p) => p,
        Err(error) => return PipelineOutcome::Failed(Failure::without_cleanup(None, error)),
    };
    sink.progress(Progress::Resolved(&path));

    let state = match probe::probe(platform, &path) {
        Ok(s) => s,
        Err(error) => return PipelineOutcome::Failed(Failure::without_cleanup(Some(path), error)),
    };
    sink.progress(Progress::Probed(state));

    let request = AttachmentRequest {
        descriptor: DiskImageDescriptor {
            resolved_path: path,
            size_limit: invocation.size_limit,
            exists: state.exists(),
            attached: state.is_attached(),
        },
        desired_drive_letter: invocation.drive_letter,
    };

    dispatch(platform, settings, &request, state, invocation.what_if, sink)
}

/// Route a probed request to exactly one of provision, attach or reject.
pub fn dispatch<P: DiskPlatform + ?Sized>(
    platform: &P,
    settings: &Settings,
    request: &AttachmentRequest,
    state: ImageState,
    what_if: bool,
    sink: &mut dyn ReportingSink,
) -> PipelineOutcome {
    let path = &request.descriptor.resolved_path;

    match state {
        ImageState::PresentAttached { disk_number } => {
            tracing::info!(path = %path.display(), disk_number, "image already attached, refusing");
            PipelineOutcome::Rejected(Rejection {
                path: path.clone(),
                disk_number,
                platform_detach_command: platform.manual_detach_command(path),
            })
        }
        ImageState::Absent if what_if => PipelineOutcome::WhatIf(PlannedAction::Create {
            path: path.clone(),
            size_limit: request.descriptor.size_limit,
            drive_letter: request.desired_drive_letter,
            creates_parent: path.parent().map(|p| !p.is_dir()).unwrap_or(false),
        }),
        ImageState::PresentDetached if what_if => {
            PipelineOutcome::WhatIf(PlannedAction::Attach { path: path.clone() })
        }
        ImageState::Absent => {
            let pipeline = ProvisioningPipeline::new(platform, request, &settings.format);
            match pipeline.run(sink) {
                Ok(volume) => PipelineOutcome::Created(volume),
                Err(failure) => {
                    let cleanup = if failure.owns_image {
                        Some(compensate::compensate(platform, &failure, sink))
                    } else {
                        None
                    };
                    PipelineOutcome::Failed(Failure {
                        path: Some(failure.path),
                        error: failure.error,
                        last_completed: Some(failure.last_completed),
                        cleanup,
                    })
                }
            }
        }
        ImageState::PresentDetached => match attach::attach_existing(platform, request, sink) {
            Ok(volumes) => PipelineOutcome::Mounted(volumes),
            Err(error) => PipelineOutcome::Failed(Failure::without_cleanup(Some(path.clone()), error)),
        },
    }
}
