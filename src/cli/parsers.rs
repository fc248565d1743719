//! Shared CLI argument parsers.
//!
//! Thin wrappers over the library's own parsing so clap reports bad values
//! before any command runs.

use devdrive::{ByteSize, DriveLetter};

/// A `--drive-letter` value. The empty string requests auto-assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveLetterArg(pub Option<DriveLetter>);

/// Parse a size limit (e.g., "50GB", "512MB").
pub fn parse_size(s: &str) -> Result<ByteSize, String> {
    s.parse().map_err(|e: devdrive::Error| e.to_string())
}

/// Parse a drive letter override ("" or a single uppercase letter).
pub fn parse_drive_letter(s: &str) -> Result<DriveLetterArg, String> {
    DriveLetter::parse_optional(s)
        .map(DriveLetterArg)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("50GB").unwrap(), ByteSize::gib(50));
        assert_eq!(parse_size("1gb").unwrap(), ByteSize::gib(1));
        assert!(parse_size("50").is_err());
        assert!(parse_size("0GB").is_err());
        assert!(parse_size("5 GB").is_err());
    }

    #[test]
    fn test_parse_drive_letter() {
        assert_eq!(parse_drive_letter("").unwrap(), DriveLetterArg(None));
        assert_eq!(
            parse_drive_letter("Q").unwrap().0.map(|l| l.as_char()),
            Some('Q')
        );
        assert!(parse_drive_letter("q").is_err());
        assert!(parse_drive_letter("QR").is_err());
        assert!(parse_drive_letter("Q:").is_err());
    }
}
