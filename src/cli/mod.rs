//! CLI command implementations.

pub mod detach;
pub mod parsers;
pub mod status;
pub mod up;

use devdrive::Settings;
use std::io::Write;

/// Path argument as typed, or the configured default image path.
pub fn image_path_arg(path: Option<String>, settings: &Settings) -> String {
    path.unwrap_or_else(|| settings.default_image_path().to_string_lossy().into_owned())
}

/// Print summary lines to stdout, or stderr when `is_error`.
pub fn print_lines(lines: &[String], is_error: bool) {
    for line in lines {
        if is_error {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
    }
    flush_output();
}

/// Flush stdout and stderr, ignoring errors.
pub fn flush_output() {
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_path_arg_defaults_to_settings() {
        let settings = Settings::new("/home/ana", "ana", "/work");
        assert_eq!(image_path_arg(None, &settings), "/home/ana/.devdrive/ana.vhdx");
        assert_eq!(
            image_path_arg(Some("x.vhdx".to_string()), &settings),
            "x.vhdx"
        );
    }
}
