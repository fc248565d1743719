//! `devdrive detach`: detach an attached image.

use clap::Args;
use devdrive::probe::{self, ImageState};
use devdrive::{path, DiskPlatform, Error, Settings};
use std::path::Path;

/// Detach the dev drive image.
///
/// This is the command an `up` run suggests when the image is already
/// attached. Detaching an image that is not attached is not an error.
///
/// Examples:
///   devdrive detach
///   devdrive detach --path D:\images\work.vhdx
#[derive(Args, Debug)]
pub struct DetachCmd {
    /// Image path (default: <image_dir>/<username>.vhdx)
    #[arg(long, value_name = "PATH")]
    pub path: Option<String>,

    /// Report what would be done without changing anything
    #[arg(long = "what-if")]
    pub what_if: bool,
}

impl DetachCmd {
    /// Run the command and return the process exit code.
    pub fn run(self, settings: &Settings) -> devdrive::Result<i32> {
        let raw = super::image_path_arg(self.path, settings);
        let image = path::resolve(&raw, settings, false)?;
        let platform = devdrive::default_platform(settings);

        let message = detach(&platform, &image, self.what_if)?;
        super::print_lines(&[message], false);
        Ok(0)
    }
}

/// Probe and, if attached, detach. Returns the line to print.
fn detach<P: DiskPlatform + ?Sized>(platform: &P, image: &Path, what_if: bool) -> devdrive::Result<String> {
    match probe::probe(platform, image)? {
        ImageState::Absent => Err(Error::path(image, "no image at this path")),
        ImageState::PresentDetached => Ok(format!("Image {} is not attached.", image.display())),
        ImageState::PresentAttached { disk_number } if what_if => Ok(format!(
            "What if: would detach {} (disk {})",
            image.display(),
            disk_number
        )),
        ImageState::PresentAttached { disk_number } => {
            platform.detach_image(image)?;
            tracing::info!(path = %image.display(), disk_number, "image detached");
            Ok(format!("Detached {} (was disk {})", image.display(), disk_number))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devdrive::platform::{MemoryPlatform, Operation};
    use devdrive::ErrorKind;

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn test_detach_attached_image() {
        let platform = MemoryPlatform::new();
        let image = Path::new("/disks/dev.vhdx");
        platform.seed_attached_image_at(image, 4 * GIB, 5);

        let line = detach(&platform, image, false).unwrap();
        assert!(line.contains("disk 5"), "{}", line);
        assert!(!platform.is_attached(image));
    }

    #[test]
    fn test_detach_what_if_leaves_attachment() {
        let platform = MemoryPlatform::new();
        let image = Path::new("/disks/dev.vhdx");
        platform.seed_attached_image(image, 4 * GIB);

        detach(&platform, image, true).unwrap();
        assert!(platform.is_attached(image));
        assert_eq!(platform.mutation_count(), 0);
    }

    #[test]
    fn test_detach_already_detached_is_ok() {
        let platform = MemoryPlatform::new();
        let image = Path::new("/disks/dev.vhdx");
        platform.seed_provisioned_image(image, 4 * GIB, None);

        let line = detach(&platform, image, false).unwrap();
        assert!(line.contains("not attached"));
        assert_eq!(platform.mutation_count(), 0);
    }

    #[test]
    fn test_detach_absent_is_error() {
        let platform = MemoryPlatform::new();
        let err = detach(&platform, Path::new("/disks/none.vhdx"), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Path);
    }

    #[test]
    fn test_detach_failure_is_detach_error() {
        let platform = MemoryPlatform::new();
        let image = Path::new("/disks/dev.vhdx");
        platform.seed_attached_image(image, 4 * GIB);
        platform.fail_at(Operation::Detach);

        let err = detach(&platform, image, false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Detach);
    }
}
