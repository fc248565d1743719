//! `devdrive up`: make sure the dev drive exists and is attached.

use super::parsers::{parse_drive_letter, parse_size, DriveLetterArg};
use clap::Args;
use devdrive::pipeline::{self, Invocation, PipelineOutcome};
use devdrive::report::{self, ConsoleSink, NullSink, ReportingSink};
use devdrive::{ByteSize, Settings};

/// Create, attach, or report the dev drive image.
///
/// - No image at the path: a dynamic image is created, partitioned (GPT)
///   and formatted. On failure the partial image is removed.
/// - Image present and detached: it is attached as-is.
/// - Image already attached: nothing is changed and the command exits 2.
///
/// Examples:
///   devdrive up
///   devdrive up --path D:\images\work.vhdx --size 100GB --drive-letter W
///   devdrive up --what-if
#[derive(Args, Debug)]
pub struct UpCmd {
    /// Image path (default: <image_dir>/<username>.vhdx)
    #[arg(long, value_name = "PATH")]
    pub path: Option<String>,

    /// Size limit for a new image, e.g. 50GB (default from config)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub size: Option<ByteSize>,

    /// Drive letter for a new volume; empty to auto-assign
    #[arg(long = "drive-letter", value_name = "LETTER", value_parser = parse_drive_letter)]
    pub drive_letter: Option<DriveLetterArg>,

    /// Report what would be done without changing anything
    #[arg(long = "what-if")]
    pub what_if: bool,

    /// Only print the final summary
    #[arg(short, long)]
    pub quiet: bool,
}

impl UpCmd {
    /// Run the command and return the process exit code.
    pub fn run(self, settings: &Settings) -> devdrive::Result<i32> {
        let invocation = Invocation {
            path: super::image_path_arg(self.path, settings),
            size_limit: self.size.unwrap_or(settings.default_size),
            drive_letter: self.drive_letter.and_then(|arg| arg.0),
            what_if: self.what_if,
        };
        tracing::debug!(?invocation, "running up");

        let platform = devdrive::default_platform(settings);
        let mut console = ConsoleSink;
        let mut quiet = NullSink;
        let sink: &mut dyn ReportingSink = if self.quiet { &mut quiet } else { &mut console };

        let outcome = pipeline::run(&platform, settings, &invocation, sink);

        if let PipelineOutcome::Failed(failure) = &outcome {
            tracing::error!(
                error = %failure.error,
                cleanup_performed = failure.cleanup_performed(),
                "up failed"
            );
        }
        super::print_lines(&report::render(&outcome), !outcome.is_success());
        Ok(report::exit_code(&outcome))
    }
}
