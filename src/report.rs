//! Progress and summary reporting.
//!
//! The pipelines emit [`Progress`] events through a [`ReportingSink`] as
//! they go. The final summary and the exit code are pure functions of the
//! [`PipelineOutcome`], so they can be tested without capturing stdout.

use crate::pipeline::{Failure, PipelineOutcome, PlannedAction, ProvisionStage, Rejection};
use crate::disk::VolumeResult;
use crate::probe::ImageState;
use std::path::Path;

// ============================================================================
// Exit Codes
// ============================================================================

/// Created, mounted, or a what-if preview.
pub const EXIT_SUCCESS: i32 = 0;

/// A step failed.
pub const EXIT_FAILURE: i32 = 1;

/// The image is already attached.
pub const EXIT_REJECTED: i32 = 2;

// ============================================================================
// Progress
// ============================================================================

/// An intermediate pipeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress<'a> {
    /// The image path was resolved.
    Resolved(&'a Path),
    /// The image was probed.
    Probed(ImageState),
    /// A provisioning step completed.
    Stage(ProvisionStage),
    /// An existing image was attached.
    Attached {
        /// Disk the image appeared as.
        disk_number: u32,
    },
    /// Cleanup of a partial image started.
    CleanupStarted,
}

/// Receives progress events. Has no influence on control flow.
pub trait ReportingSink {
    /// Handle one event.
    fn progress(&mut self, event: Progress<'_>);
}

/// Prints progress lines to stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ReportingSink for ConsoleSink {
    fn progress(&mut self, event: Progress<'_>) {
        println!("{}", describe(&event));
    }
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NullSink;

impl ReportingSink for NullSink {
    fn progress(&mut self, _event: Progress<'_>) {}
}

/// Keeps every event as text, plus the provisioning stages in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    /// Rendered events, in order.
    pub events: Vec<String>,
    stages: Vec<ProvisionStage>,
}

impl RecordingSink {
    /// Provisioning stages reported so far.
    pub fn stages(&self) -> Vec<ProvisionStage> {
        self.stages.clone()
    }
}

impl ReportingSink for RecordingSink {
    fn progress(&mut self, event: Progress<'_>) {
        if let Progress::Stage(stage) = event {
            self.stages.push(stage);
        }
        self.events.push(describe(&event));
    }
}

/// One-line text for a progress event.
pub fn describe(event: &Progress<'_>) -> String {
    match event {
        Progress::Resolved(path) => format!("Image path: {}", path.display()),
        Progress::Probed(state) => format!("Image state: {}", state),
        Progress::Stage(stage) => match stage {
            ProvisionStage::Unallocated => "Starting".to_string(),
            ProvisionStage::Allocated => "Created dynamic image".to_string(),
            ProvisionStage::Attached => "Attached image".to_string(),
            ProvisionStage::Initialized => "Initialized GPT partition table".to_string(),
            ProvisionStage::Partitioned => "Created partition".to_string(),
            ProvisionStage::Formatted => "Formatted volume".to_string(),
            ProvisionStage::Complete => "Provisioning complete".to_string(),
        },
        Progress::Attached { disk_number } => format!("Attached image as disk {}", disk_number),
        Progress::CleanupStarted => "Cleaning up partial image".to_string(),
    }
}

// ============================================================================
// Summary
// ============================================================================

/// Summary lines for a finished run.
pub fn render(outcome: &PipelineOutcome) -> Vec<String> {
    match outcome {
        PipelineOutcome::Created(volume) => {
            vec![format!("Dev drive ready: {}", volume_line(volume))]
        }
        PipelineOutcome::Mounted(volumes) if volumes.is_empty() => {
            vec!["Image attached; no volume with a drive letter was found.".to_string()]
        }
        PipelineOutcome::Mounted(volumes) => volumes
            .iter()
            .map(|v| format!("Mounted: {}", volume_line(v)))
            .collect(),
        PipelineOutcome::Rejected(rejection) => render_rejection(rejection),
        PipelineOutcome::Failed(failure) => render_failure(failure),
        PipelineOutcome::WhatIf(action) => render_plan(action),
    }
}

/// Process exit code for a finished run.
pub fn exit_code(outcome: &PipelineOutcome) -> i32 {
    match outcome {
        PipelineOutcome::Created(_) | PipelineOutcome::Mounted(_) | PipelineOutcome::WhatIf(_) => {
            EXIT_SUCCESS
        }
        PipelineOutcome::Rejected(_) => EXIT_REJECTED,
        PipelineOutcome::Failed(_) => EXIT_FAILURE,
    }
}

fn volume_line(volume: &VolumeResult) -> String {
    let letter = volume
        .drive_letter
        .map(|c| format!("{}:", c))
        .unwrap_or_else(|| "(no letter)".to_string());
    format!(
        "{} {} {}",
        letter,
        volume.filesystem_name,
        human_size(volume.size_bytes)
    )
}

fn render_rejection(rejection: &Rejection) -> Vec<String> {
    let path = rejection.path.display();
    let own_command = format!("devdrive detach --path '{}'", path);

    let mut lines = vec![
        format!(
            "Image {} is {}; nothing was changed.",
            path,
            rejection.reason()
        ),
        "Detach it first, then run this command again:".to_string(),
        format!("  {}", own_command),
    ];
    if rejection.platform_detach_command != own_command {
        lines.push(format!("  or: {}", rejection.platform_detach_command));
    }
    lines
}

fn render_failure(failure: &Failure) -> Vec<String> {
    let mut lines = Vec::new();
    match &failure.path {
        Some(path) => lines.push(format!("Failed for {}: {}", path.display(), failure.error)),
        None => lines.push(format!("Failed: {}", failure.error)),
    }
    if let Some(stage) = failure.last_completed {
        lines.push(format!("Last completed step: {}", stage));
    }
    match &failure.cleanup {
        None => lines.push("No cleanup needed.".to_string()),
        Some(report) if report.is_clean() => {
            lines.push("Partial image was removed.".to_string())
        }
        Some(report) => {
            if !report.detached {
                if let Some(path) = &failure.path {
                    lines.push(format!(
                        "If the image is still attached, run: devdrive detach --path '{}'",
                        path.display()
                    ));
                }
            }
            match &report.warning {
                Some(warning) => lines.push(format!("Manual cleanup needed: {}", warning)),
                None => lines.push("Manual cleanup needed.".to_string()),
            }
        }
    }
    lines
}

fn render_plan(action: &PlannedAction) -> Vec<String> {
    match action {
        PlannedAction::Create {
            path,
            size_limit,
            drive_letter,
            creates_parent,
        } => {
            let mut lines = Vec::new();
            if *creates_parent {
                if let Some(parent) = path.parent() {
                    lines.push(format!("What if: would create directory {}", parent.display()));
                }
            }
            let letter = drive_letter
                .map(|l| l.to_string())
                .unwrap_or_else(|| "auto-assigned letter".to_string());
            lines.push(format!(
                "What if: would create {} (up to {}, {}) and format it",
                path.display(),
                size_limit,
                letter
            ));
            lines
        }
        PlannedAction::Attach { path } => {
            vec![format!("What if: would attach {}", path.display())]
        }
    }
}

/// Format a byte count with two decimals in the largest fitting binary unit.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{ByteSize, DriveLetter};
    use crate::error::Error;
    use crate::pipeline::{CleanupReport, CleanupWarning};
    use std::path::PathBuf;

    fn volume() -> VolumeResult {
        VolumeResult {
            drive_letter: Some('E'),
            filesystem_name: "ReFS".to_string(),
            size_bytes: 10 * 1024 * 1024 * 1024,
        }
    }

    fn failed(cleanup: Option<CleanupReport>) -> PipelineOutcome {
        PipelineOutcome::Failed(Failure {
            path: Some(PathBuf::from("/disks/dev.vhdx")),
            error: Error::format(4, 2, "device not ready"),
            last_completed: Some(ProvisionStage::Partitioned),
            cleanup,
        })
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&PipelineOutcome::Created(volume())), 0);
        assert_eq!(exit_code(&PipelineOutcome::Mounted(vec![])), 0);
        assert_eq!(
            exit_code(&PipelineOutcome::WhatIf(PlannedAction::Attach {
                path: PathBuf::from("/d.vhdx")
            })),
            0
        );
        assert_eq!(
            exit_code(&PipelineOutcome::Rejected(Rejection {
                path: PathBuf::from("/d.vhdx"),
                disk_number: 3,
                platform_detach_command: String::new(),
            })),
            2
        );
        assert_eq!(exit_code(&failed(None)), 1);
    }

    #[test]
    fn test_created_summary() {
        let lines = render(&PipelineOutcome::Created(volume()));
        assert_eq!(lines, vec!["Dev drive ready: E: ReFS 10.00 GiB"]);
    }

    #[test]
    fn test_mounted_summary_lists_each_volume() {
        let mut second = volume();
        second.drive_letter = Some('F');
        let lines = render(&PipelineOutcome::Mounted(vec![volume(), second]));
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("F:"));
    }

    #[test]
    fn test_rejection_names_disk_and_commands() {
        let lines = render(&PipelineOutcome::Rejected(Rejection {
            path: PathBuf::from("/disks/dev.vhdx"),
            disk_number: 3,
            platform_detach_command: "Dismount-VHD -Path '/disks/dev.vhdx'".to_string(),
        }));
        let text = lines.join("\n");
        assert!(text.contains("disk 3"), "{}", text);
        assert!(text.contains("devdrive detach --path '/disks/dev.vhdx'"), "{}", text);
        assert!(text.contains("Dismount-VHD -Path '/disks/dev.vhdx'"), "{}", text);
    }

    #[test]
    fn test_rejection_does_not_repeat_same_command() {
        let lines = render(&PipelineOutcome::Rejected(Rejection {
            path: PathBuf::from("/d.vhdx"),
            disk_number: 1,
            platform_detach_command: "devdrive detach --path '/d.vhdx'".to_string(),
        }));
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_failure_reports_path_error_and_cleanup() {
        let clean = CleanupReport {
            detached: true,
            deleted: true,
            warning: None,
        };
        let text = render(&failed(Some(clean))).join("\n");
        assert!(text.contains("/disks/dev.vhdx"));
        assert!(text.contains("device not ready"));
        assert!(text.contains("partitioned"));
        assert!(text.contains("Partial image was removed"));
    }

    #[test]
    fn test_failure_with_leftover_asks_for_manual_cleanup() {
        let dirty = CleanupReport {
            detached: false,
            deleted: false,
            warning: Some(CleanupWarning {
                path: PathBuf::from("/disks/dev.vhdx"),
                reason: "in use".to_string(),
            }),
        };
        let text = render(&failed(Some(dirty))).join("\n");
        assert!(text.contains("Manual cleanup needed"), "{}", text);
        assert!(text.contains("devdrive detach --path"), "{}", text);
    }

    #[test]
    fn test_failure_without_cleanup() {
        let text = render(&failed(None)).join("\n");
        assert!(text.contains("No cleanup needed"));
    }

    #[test]
    fn test_what_if_create_plan() {
        let lines = render(&PipelineOutcome::WhatIf(PlannedAction::Create {
            path: PathBuf::from("/disks/dev.vhdx"),
            size_limit: ByteSize::gib(20),
            drive_letter: Some(DriveLetter::new('Q').unwrap()),
            creates_parent: true,
        }));
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("/disks"));
        assert!(lines[1].contains("20GB"), "{}", lines[1]);
        assert!(lines[1].contains("Q:"));
    }

    #[test]
    fn test_recording_sink_tracks_stages() {
        let mut sink = RecordingSink::default();
        sink.progress(Progress::Resolved(Path::new("/d.vhdx")));
        sink.progress(Progress::Stage(ProvisionStage::Allocated));
        sink.progress(Progress::CleanupStarted);
        assert_eq!(sink.stages(), vec![ProvisionStage::Allocated]);
        assert_eq!(sink.events.len(), 3);
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(1536), "1.50 KiB");
        assert_eq!(human_size(50 * 1024 * 1024 * 1024), "50.00 GiB");
    }
}
