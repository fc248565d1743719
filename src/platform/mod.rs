//! Platform abstraction for devdrive.
//!
//! The pipelines never talk to the host directly. They go through the
//! [`DiskPlatform`] trait, which has two implementations:
//!
//! - [`PowerShellPlatform`]: drives the host's Hyper-V and Storage cmdlets.
//! - [`MemoryPlatform`]: an in-memory model of images, disks and drive
//!   letters with failure injection, for tests.
//!
//! # Example
//!
//! ```
//! use devdrive::platform::{DiskPlatform, MemoryPlatform};
//! use std::path::Path;
//!
//! let platform = MemoryPlatform::new();
//! assert!(!platform.image_exists(Path::new("/disks/dev.vhdx")));
//! ```

mod memory;
mod powershell;
mod traits;

pub use memory::{Call, ImageRecord, MemoryPlatform, Operation};
pub use powershell::PowerShellPlatform;
pub use traits::{
    DiskHandle, DiskPlatform, ImageHandle, ImageMetadata, PartitionHandle, PartitionRequest,
    PartitionStyle, VolumeInfo,
};

use crate::config::Settings;

/// The platform used by the binary.
pub fn default_platform(settings: &Settings) -> PowerShellPlatform {
    match &settings.powershell {
        Some(exe) => PowerShellPlatform::with_executable(exe.clone()),
        None => PowerShellPlatform::new(),
    }
}
