//! devdrive - dev drive provisioning for virtual disk images
//!
//! devdrive is a library and CLI that makes sure a developer volume backed
//! by a dynamically growing virtual disk image is attached and usable. If
//! the image does not exist it is created, partitioned and formatted; if it
//! exists and is detached it is attached; if it is already attached the run
//! is refused.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │  devdrive CLI (up / detach / status)            │
//! ├─────────────────────────────────────────────────┤
//! │  pipeline: resolve → probe → dispatch           │
//! │    provision (+ compensate) | attach | reject   │
//! ├─────────────────────────────────────────────────┤
//! │  DiskPlatform (PowerShellPlatform, Memory...)   │
//! ├─────────────────────────────────────────────────┤
//! │  host disk tooling (Hyper-V / Storage cmdlets)  │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use devdrive::pipeline::{self, Invocation, PipelineOutcome};
//! use devdrive::platform::MemoryPlatform;
//! use devdrive::report::NullSink;
//! use devdrive::{ByteSize, Settings};
//!
//! let dir = std::env::temp_dir().join("devdrive-doc");
//! let settings = Settings::new(&dir, "ana", &dir);
//! let invocation = Invocation {
//!     path: "dev.vhdx".to_string(),
//!     size_limit: ByteSize::gib(10),
//!     drive_letter: None,
//!     what_if: true,
//! };
//!
//! let platform = MemoryPlatform::new();
//! let outcome = pipeline::run(&platform, &settings, &invocation, &mut NullSink);
//! assert!(matches!(outcome, PipelineOutcome::WhatIf(_)));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod disk;
pub mod error;
pub mod path;
pub mod pipeline;
pub mod platform;
pub mod probe;
pub mod report;

// Re-export main types for convenience
pub use config::Settings;
pub use disk::{ByteSize, DriveLetter, FormatSpec, VolumeResult};
pub use error::{Error, ErrorKind, Result};
pub use pipeline::{Invocation, PipelineOutcome};
pub use platform::{default_platform, DiskPlatform, MemoryPlatform, PowerShellPlatform};
pub use probe::ImageState;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
