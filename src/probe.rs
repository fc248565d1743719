//! Image state probing.
//!
//! Classifies a resolved path into exactly one of three states. Probing is
//! read-only and is re-run on every invocation; no previous result is
//! cached anywhere.

use crate::error::Result;
use crate::platform::DiskPlatform;
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// What is at the image path right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ImageState {
    /// No file at the path.
    Absent,
    /// An image exists and is not attached.
    PresentDetached,
    /// An image exists and is attached as `disk_number`.
    PresentAttached {
        /// Host disk number of the attachment.
        disk_number: u32,
    },
}

impl ImageState {
    /// Whether an image file exists.
    pub const fn exists(&self) -> bool {
        !matches!(self, ImageState::Absent)
    }

    /// Whether the image is attached.
    pub const fn is_attached(&self) -> bool {
        matches!(self, ImageState::PresentAttached { .. })
    }
}

impl fmt::Display for ImageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageState::Absent => write!(f, "absent"),
            ImageState::PresentDetached => write!(f, "detached"),
            ImageState::PresentAttached { disk_number } => {
                write!(f, "attached at disk {}", disk_number)
            }
        }
    }
}

/// Determine the state of the image at `path`.
///
/// File existence is checked first; platform metadata is only queried for
/// a file that exists. A metadata failure on an existing file is a
/// `Error::Probe`.
pub fn probe<P: DiskPlatform + ?Sized>(platform: &P, path: &Path) -> Result<ImageState> {
    if !platform.image_exists(path) {
        tracing::debug!(path = %path.display(), "image absent");
        return Ok(ImageState::Absent);
    }

    let meta = platform.query_image_metadata(path)?;
    let state = match (meta.attached, meta.disk_number) {
        (true, Some(disk_number)) => ImageState::PresentAttached { disk_number },
        (true, None) => {
            return Err(crate::error::Error::probe(
                path,
                "image reports attached without a disk number",
            ))
        }
        (false, _) => ImageState::PresentDetached,
    };

    tracing::debug!(path = %path.display(), %state, "probed image");
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::platform::MemoryPlatform;
    use std::path::PathBuf;

    const GIB: u64 = 1024 * 1024 * 1024;

    fn path() -> PathBuf {
        PathBuf::from("/disks/dev.vhdx")
    }

    #[test]
    fn test_absent() {
        let platform = MemoryPlatform::new();
        assert_eq!(probe(&platform, &path()).unwrap(), ImageState::Absent);
        assert!(platform.calls().is_empty(), "absent path needs no metadata query");
    }

    #[test]
    fn test_present_detached() {
        let platform = MemoryPlatform::new();
        platform.seed_provisioned_image(&path(), 4 * GIB, None);
        assert_eq!(
            probe(&platform, &path()).unwrap(),
            ImageState::PresentDetached
        );
    }

    #[test]
    fn test_present_attached_reports_disk() {
        let platform = MemoryPlatform::new();
        platform.seed_attached_image_at(&path(), 4 * GIB, 3);
        assert_eq!(
            probe(&platform, &path()).unwrap(),
            ImageState::PresentAttached { disk_number: 3 }
        );
    }

    #[test]
    fn test_probe_is_idempotent() {
        let platform = MemoryPlatform::new();
        platform.seed_attached_image(&path(), 4 * GIB);
        let first = probe(&platform, &path()).unwrap();
        let second = probe(&platform, &path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(platform.mutation_count(), 0);
    }

    #[test]
    fn test_corrupt_image_is_probe_error() {
        let platform = MemoryPlatform::new();
        platform.seed_corrupt_image(&path());
        let err = probe(&platform, &path()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Probe);
    }

    #[test]
    fn test_exactly_one_state_holds() {
        for state in [
            ImageState::Absent,
            ImageState::PresentDetached,
            ImageState::PresentAttached { disk_number: 1 },
        ] {
            let flags = [
                state == ImageState::Absent,
                state == ImageState::PresentDetached,
                state.is_attached(),
            ];
            assert_eq!(flags.iter().filter(|f| **f).count(), 1, "{:?}", state);
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(
            ImageState::PresentAttached { disk_number: 7 }.to_string(),
            "attached at disk 7"
        );
    }
}
