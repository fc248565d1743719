//! `devdrive status`: show the image state without changing anything.

use clap::Args;
use devdrive::probe::{self, ImageState};
use devdrive::{path, DiskPlatform, Error, Settings};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Show whether the dev drive image exists and where it is attached.
///
/// Examples:
///   devdrive status
///   devdrive status --json
#[derive(Args, Debug)]
pub struct StatusCmd {
    /// Image path (default: <image_dir>/<username>.vhdx)
    #[arg(long, value_name = "PATH")]
    pub path: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    path: PathBuf,
    #[serde(flatten)]
    state: ImageState,
}

impl StatusCmd {
    /// Run the command and return the process exit code.
    pub fn run(self, settings: &Settings) -> devdrive::Result<i32> {
        let raw = super::image_path_arg(self.path, settings);
        let image = path::resolve(&raw, settings, false)?;
        let platform = devdrive::default_platform(settings);

        let report = status(&platform, &image)?;
        let line = if self.json {
            serde_json::to_string_pretty(&report)
                .map_err(|e| Error::config("serialize json", e.to_string()))?
        } else {
            format!("{}: {}", report.path.display(), report.state)
        };
        super::print_lines(&[line], false);
        Ok(0)
    }
}

fn status<P: DiskPlatform + ?Sized>(platform: &P, image: &Path) -> devdrive::Result<StatusReport> {
    Ok(StatusReport {
        path: image.to_path_buf(),
        state: probe::probe(platform, image)?,
    })
}
