//! Disk image value types.
//!
//! Everything here is a plain value built fresh per invocation. The only
//! durable state is the image file itself and the host's attachment table,
//! both owned by the platform.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Size units accepted by [`ByteSize::from_str`], largest first so that
/// suffix matching picks `KB` before `B`.
const SIZE_UNITS: &[(&str, u64)] = &[
    ("TB", 1024 * 1024 * 1024 * 1024),
    ("GB", 1024 * 1024 * 1024),
    ("MB", 1024 * 1024),
    ("KB", 1024),
    ("B", 1),
];

/// Default volume label written by the format step.
pub const DEFAULT_LABEL: &str = "DevDrive";

/// Default filesystem for new volumes.
pub const DEFAULT_FILESYSTEM: &str = "ReFS";

/// A byte count parsed from `<integer><unit>` notation.
///
/// Units are binary (`1KB` = 1024 bytes), matching how the host's disk
/// tooling interprets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ByteSize(u64);

impl ByteSize {
    /// Wrap a raw byte count.
    pub const fn bytes(n: u64) -> Self {
        Self(n)
    }

    /// `n` gibibytes.
    pub const fn gib(n: u64) -> Self {
        Self(n * 1024 * 1024 * 1024)
    }

    /// Raw byte count.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl FromStr for ByteSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |why: &str| {
            Error::config(
                "parse size",
                format!("invalid size '{}': {} (expected e.g. 50GB)", s, why),
            )
        };

        let upper = s.to_ascii_uppercase();
        let (digits, multiplier) = SIZE_UNITS
            .iter()
            .find_map(|(unit, mult)| upper.strip_suffix(unit).map(|d| (d, *mult)))
            .ok_or_else(|| invalid("unit must be one of B, KB, MB, GB, TB"))?;

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("size must start with an integer"));
        }

        let value: u64 = digits.parse().map_err(|_| invalid("number too large"))?;
        if value == 0 {
            return Err(invalid("size must be greater than zero"));
        }

        value
            .checked_mul(multiplier)
            .map(ByteSize)
            .ok_or_else(|| invalid("number too large"))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Largest unit that divides evenly, so "10GB" round-trips.
        for (unit, mult) in SIZE_UNITS {
            if self.0 >= *mult && self.0 % mult == 0 {
                return write!(f, "{}{}", self.0 / mult, unit);
            }
        }
        write!(f, "{}B", self.0)
    }
}

/// A single uppercase drive letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "char", into = "char")]
pub struct DriveLetter(char);

impl DriveLetter {
    /// Validate a single letter. Only `A`-`Z` are accepted.
    pub fn new(c: char) -> Result<Self> {
        if c.is_ascii_uppercase() {
            Ok(Self(c))
        } else {
            Err(Error::config(
                "parse drive letter",
                format!("invalid drive letter '{}': must be one uppercase letter A-Z", c),
            ))
        }
    }

    /// Parse an override: the empty string means "let the platform assign".
    ///
    /// Whether the letter is free is not checked here; a taken letter
    /// surfaces later as [`Error::DriveLetterConflict`].
    pub fn parse_optional(s: &str) -> Result<Option<Self>> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (None, _) => Ok(None),
            (Some(c), None) => Self::new(c).map(Some),
            _ => Err(Error::config(
                "parse drive letter",
                format!("invalid drive letter '{}': must be empty or one uppercase letter", s),
            )),
        }
    }

    /// The letter itself.
    pub const fn as_char(&self) -> char {
        self.0
    }
}

impl TryFrom<char> for DriveLetter {
    type Error = Error;

    fn try_from(c: char) -> Result<Self> {
        Self::new(c)
    }
}

impl From<DriveLetter> for char {
    fn from(letter: DriveLetter) -> char {
        letter.0
    }
}

impl fmt::Display for DriveLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.0)
    }
}

/// What is known about the image at the start of an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskImageDescriptor {
    /// Absolute image path.
    pub resolved_path: PathBuf,
    /// Size limit for a new image (unused when the image already exists).
    pub size_limit: ByteSize,
    /// Whether the image file exists.
    pub exists: bool,
    /// Whether the image is currently attached.
    pub attached: bool,
}

/// A request to bring the image online.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentRequest {
    /// The image being provisioned or attached.
    pub descriptor: DiskImageDescriptor,
    /// Explicit drive letter; `None` lets the platform pick one.
    pub desired_drive_letter: Option<DriveLetter>,
}

/// Filesystem settings applied by the format step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSpec {
    /// Filesystem name, e.g. `ReFS`.
    pub filesystem: String,
    /// Volume label.
    pub label: String,
    /// Enable the filesystem's developer-workload optimization.
    pub dev_workload_optimized: bool,
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self {
            filesystem: DEFAULT_FILESYSTEM.to_string(),
            label: DEFAULT_LABEL.to_string(),
            dev_workload_optimized: true,
        }
    }
}

/// A mounted volume as reported to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeResult {
    /// Assigned drive letter, if any.
    pub drive_letter: Option<char>,
    /// Filesystem name reported by the platform.
    pub filesystem_name: String,
    /// Volume size in bytes.
    pub size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_units() {
        assert_eq!("512B".parse::<ByteSize>().unwrap().as_u64(), 512);
        assert_eq!("4KB".parse::<ByteSize>().unwrap().as_u64(), 4096);
        assert_eq!("10MB".parse::<ByteSize>().unwrap().as_u64(), 10 << 20);
        assert_eq!("10GB".parse::<ByteSize>().unwrap(), ByteSize::gib(10));
        assert_eq!("2TB".parse::<ByteSize>().unwrap().as_u64(), 2 << 40);
    }

    #[test]
    fn test_parse_size_unit_is_case_insensitive() {
        assert_eq!("10gb".parse::<ByteSize>().unwrap(), ByteSize::gib(10));
        assert_eq!("1Kb".parse::<ByteSize>().unwrap().as_u64(), 1024);
    }

    #[test]
    fn test_parse_size_rejects_bad_input() {
        for bad in ["", "GB", "10", "10 GB", "-5GB", "1.5GB", "10PB", "0GB", "ten GB"] {
            let err = bad.parse::<ByteSize>();
            assert!(err.is_err(), "'{}' should be rejected", bad);
        }
    }

    #[test]
    fn test_parse_size_rejects_overflow() {
        let err = "99999999999TB".parse::<ByteSize>().unwrap_err();
        assert!(err.to_string().contains("too large"), "{}", err);
    }

    #[test]
    fn test_size_display_uses_largest_even_unit() {
        assert_eq!(ByteSize::gib(10).to_string(), "10GB");
        assert_eq!(ByteSize::bytes(1536).to_string(), "1536B");
        assert_eq!(ByteSize::bytes(3 << 20).to_string(), "3MB");
    }

    #[test]
    fn test_drive_letter_empty_means_auto() {
        assert_eq!(DriveLetter::parse_optional("").unwrap(), None);
    }

    #[test]
    fn test_drive_letter_single_uppercase() {
        let letter = DriveLetter::parse_optional("Z").unwrap().unwrap();
        assert_eq!(letter.as_char(), 'Z');
        assert_eq!(letter.to_string(), "Z:");
    }

    #[test]
    fn test_drive_letter_rejects_invalid() {
        for bad in ["d", "DE", "1", ":", "D:", "É"] {
            assert!(
                DriveLetter::parse_optional(bad).is_err(),
                "'{}' should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_format_spec_defaults() {
        let spec = FormatSpec::default();
        assert_eq!(spec.filesystem, "ReFS");
        assert_eq!(spec.label, "DevDrive");
        assert!(spec.dev_workload_optimized);
    }
}
