//! Error types for devdrive.
//!
//! # Error Message Style Guide
//!
//! All error messages follow a consistent format for clarity and actionability:
//!
//! - **Format**: `"<operation> failed: <reason>"` or `"<entity> not found: <identifier>"`
//! - **Case**: All lowercase (Rust convention for error messages)
//! - **Context**: Include the image path, disk number or drive letter when available
//! - **Actionability**: Messages should tell the operator what to clean up or retry
//!
//! ## Preferred Patterns
//!
//! ```text
//! "attach failed: C:\dev\ws.vhdx: the file is in use"
//! "partition table initialization failed on disk 3: media is write protected"
//! "drive letter conflict: D: is already assigned"
//! ```
//!
//! A refusal to touch an already-attached image is *not* an error; it is
//! reported as [`crate::pipeline::PipelineOutcome::Rejected`].

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using devdrive's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of an [`Error`], so callers can branch without matching
/// on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Path normalization or parent directory creation.
    Path,
    /// Image metadata query.
    Probe,
    /// Dynamic image allocation.
    Allocation,
    /// Attaching an image as a disk.
    Attach,
    /// Detaching an image.
    Detach,
    /// Partition table initialization.
    Init,
    /// Partition creation.
    Partition,
    /// Requested drive letter is held by another volume.
    DriveLetterConflict,
    /// Volume formatting.
    Format,
    /// Listing partitions or volumes for a report.
    Enumeration,
    /// Settings, config file or argument validation.
    Config,
    /// An external command could not be run.
    Command,
    /// Raw IO.
    Io,
}

/// Errors that can occur in devdrive operations.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Resolution and Probing
    // ========================================================================
    /// The image path could not be resolved or its parent could not be created.
    #[error("path resolution failed: {}: {reason}", path.display())]
    Path {
        /// The path as far as it was resolved.
        path: PathBuf,
        /// The reason for the failure.
        reason: String,
    },

    /// The image exists but its metadata could not be read.
    #[error("image probe failed: {}: {reason}", path.display())]
    Probe {
        /// Image path.
        path: PathBuf,
        /// The reason for the failure.
        reason: String,
    },

    // ========================================================================
    // Provisioning Steps
    // ========================================================================
    /// The dynamic image file could not be created.
    #[error("image allocation failed: {}: {reason}", path.display())]
    Allocation {
        /// Image path.
        path: PathBuf,
        /// The reason for the failure.
        reason: String,
    },

    /// The image could not be attached as a disk.
    #[error("attach failed: {}: {reason}", path.display())]
    Attach {
        /// Image path.
        path: PathBuf,
        /// The reason for the failure.
        reason: String,
    },

    /// The image could not be detached.
    #[error("detach failed: {}: {reason}", path.display())]
    Detach {
        /// Image path.
        path: PathBuf,
        /// The reason for the failure.
        reason: String,
    },

    /// The GPT partition table could not be written.
    #[error("partition table initialization failed on disk {disk_number}: {reason}")]
    Init {
        /// Disk the image is attached as.
        disk_number: u32,
        /// The reason for the failure.
        reason: String,
    },

    /// The data partition could not be created.
    #[error("partition creation failed on disk {disk_number}: {reason}")]
    Partition {
        /// Disk the image is attached as.
        disk_number: u32,
        /// The reason for the failure.
        reason: String,
    },

    /// The requested drive letter is already in use.
    #[error("drive letter conflict: {letter}: is already assigned")]
    DriveLetterConflict {
        /// The letter that was requested.
        letter: char,
    },

    /// The partition could not be formatted.
    #[error("format failed on disk {disk_number} partition {partition_number}: {reason}")]
    Format {
        /// Disk the image is attached as.
        disk_number: u32,
        /// Partition that was being formatted.
        partition_number: u32,
        /// The reason for the failure.
        reason: String,
    },

    /// Partitions or volumes could not be listed. Only ever reported, never
    /// fatal to an attach.
    #[error("enumeration failed on disk {disk_number}{}: {reason}", partition_suffix(partition_number))]
    Enumeration {
        /// Disk being listed.
        disk_number: u32,
        /// Partition whose volumes were being listed, if any.
        partition_number: Option<u32>,
        /// The reason for the failure.
        reason: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration operation failed.
    #[error("config operation failed: {operation}: {reason}")]
    Config {
        /// The operation that failed (e.g., "load", "parse size").
        operation: String,
        /// The reason for the failure.
        reason: String,
    },

    // ========================================================================
    // Command Execution Errors
    // ========================================================================
    /// External command failed to run at all.
    #[error("command '{command}' failed: {reason}")]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// Error message or reason for failure.
        reason: String,
    },

    // ========================================================================
    // IO Errors
    // ========================================================================
    /// IO error wrapper.
    #[error("io operation failed: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Path { .. } => ErrorKind::Path,
            Error::Probe { .. } => ErrorKind::Probe,
            Error::Allocation { .. } => ErrorKind::Allocation,
            Error::Attach { .. } => ErrorKind::Attach,
            Error::Detach { .. } => ErrorKind::Detach,
            Error::Init { .. } => ErrorKind::Init,
            Error::Partition { .. } => ErrorKind::Partition,
            Error::DriveLetterConflict { .. } => ErrorKind::DriveLetterConflict,
            Error::Format { .. } => ErrorKind::Format,
            Error::Enumeration { .. } => ErrorKind::Enumeration,
            Error::Config { .. } => ErrorKind::Config,
            Error::CommandFailed { .. } => ErrorKind::Command,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    // ========================================================================
    // Resolution and Probing Constructors
    // ========================================================================

    /// Create a path resolution error.
    pub fn path(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an image probe error.
    pub fn probe(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Probe {
            path: path.into(),
            reason: reason.into(),
        }
    }

    // ========================================================================
    // Provisioning Step Constructors
    // ========================================================================

    /// Create an image allocation error.
    pub fn allocation(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Allocation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an attach error.
    pub fn attach(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Attach {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a detach error.
    pub fn detach(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Detach {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a partition table initialization error.
    pub fn init(disk_number: u32, reason: impl Into<String>) -> Self {
        Self::Init {
            disk_number,
            reason: reason.into(),
        }
    }

    /// Create a partition creation error.
    pub fn partition(disk_number: u32, reason: impl Into<String>) -> Self {
        Self::Partition {
            disk_number,
            reason: reason.into(),
        }
    }

    /// Create a drive letter conflict error.
    pub fn drive_letter_conflict(letter: char) -> Self {
        Self::DriveLetterConflict { letter }
    }

    /// Create a format error.
    pub fn format(disk_number: u32, partition_number: u32, reason: impl Into<String>) -> Self {
        Self::Format {
            disk_number,
            partition_number,
            reason: reason.into(),
        }
    }

    /// Create a partition or volume enumeration error.
    pub fn enumeration(
        disk_number: u32,
        partition_number: impl Into<Option<u32>>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Enumeration {
            disk_number,
            partition_number: partition_number.into(),
            reason: reason.into(),
        }
    }

    // ========================================================================
    // Config and Command Constructors
    // ========================================================================

    /// Create a config operation error.
    pub fn config(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a command failed error.
    pub fn command_failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

fn partition_suffix(partition_number: &Option<u32>) -> String {
    partition_number
        .map(|p| format!(" partition {}", p))
        .unwrap_or_default()
}
