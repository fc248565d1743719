//! Platform capability trait.
//!
//! Every host operation the pipelines need is a method on [`DiskPlatform`].
//! There is one production implementation driving the host's disk tooling
//! and one in-memory implementation used by tests and what-if previews.

use crate::disk::{DriveLetter, FormatSpec};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Partition table style written by the initialize step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionStyle {
    /// GUID partition table.
    Gpt,
}

impl PartitionStyle {
    /// Name understood by the host tooling.
    pub const fn as_str(&self) -> &'static str {
        match self {
            PartitionStyle::Gpt => "GPT",
        }
    }
}

/// A freshly allocated image file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle {
    /// Declared size limit in bytes.
    pub size_limit_bytes: u64,
}

/// An image attached as a disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskHandle {
    /// Host disk number.
    pub disk_number: u32,
}

/// A partition on an attached disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionHandle {
    /// Host disk number.
    pub disk_number: u32,
    /// Partition number on that disk.
    pub partition_number: u32,
    /// Drive letter assigned to the partition, if any.
    pub drive_letter: Option<char>,
    /// Partition size in bytes.
    pub size_bytes: u64,
}

/// A volume as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInfo {
    /// Assigned drive letter, if any.
    pub drive_letter: Option<char>,
    /// Filesystem name, e.g. `ReFS`.
    pub filesystem: String,
    /// Volume label.
    pub label: String,
    /// Volume size in bytes.
    pub size_bytes: u64,
}

/// Attachment metadata for an existing image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Whether the image is attached.
    pub attached: bool,
    /// Disk number while attached.
    pub disk_number: Option<u32>,
}

/// Options for the create-partition step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionRequest {
    /// Consume all free space on the disk.
    pub use_maximum_size: bool,
    /// Exact letter to assign; `None` requests auto-assignment.
    pub drive_letter: Option<DriveLetter>,
}

/// Host operations used by the provisioning and attachment pipelines.
///
/// Every call blocks until the host operation finishes. Implementations
/// return the error variant matching the operation (`Error::Attach` from
/// [`attach_image`](Self::attach_image), and so on).
pub trait DiskPlatform {
    /// Whether an image file exists at `path`. Local and cheap.
    fn image_exists(&self, path: &Path) -> bool;

    /// Read attachment state for an existing image.
    fn query_image_metadata(&self, path: &Path) -> Result<ImageMetadata>;

    /// Create a dynamically growing image with the given size limit.
    fn allocate_dynamic_image(&self, path: &Path, size_limit_bytes: u64) -> Result<ImageHandle>;

    /// Attach an image, returning the disk it appears as.
    fn attach_image(&self, path: &Path) -> Result<DiskHandle>;

    /// Detach an image.
    fn detach_image(&self, path: &Path) -> Result<()>;

    /// Delete the image file.
    fn delete_image_file(&self, path: &Path) -> Result<()>;

    /// Write an empty partition table.
    fn initialize_partition_table(&self, disk: &DiskHandle, style: PartitionStyle) -> Result<()>;

    /// Create one partition. Fails with `Error::DriveLetterConflict` when
    /// an explicit letter is already taken.
    fn create_partition(
        &self,
        disk: &DiskHandle,
        request: &PartitionRequest,
    ) -> Result<PartitionHandle>;

    /// Format a partition and return the resulting volume.
    fn format_volume(&self, partition: &PartitionHandle, spec: &FormatSpec) -> Result<VolumeInfo>;

    /// List partitions on an attached disk.
    fn enumerate_partitions(&self, disk_number: u32) -> Result<Vec<PartitionHandle>>;

    /// List volumes on a partition. May be empty.
    fn enumerate_volumes(&self, partition: &PartitionHandle) -> Result<Vec<VolumeInfo>>;

    /// Command an operator can run to detach the image by hand.
    fn manual_detach_command(&self, path: &Path) -> String {
        format!("devdrive detach --path '{}'", path.display())
    }
}
