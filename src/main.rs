//! devdrive CLI entry point.

use clap::{ArgAction, Parser, Subcommand};
use devdrive::Settings;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cli;

/// devdrive - dev drive provisioning for virtual disk images
#[derive(Parser, Debug)]
#[command(name = "devdrive")]
#[command(about = "Create and attach a developer volume backed by a virtual disk image")]
#[command(
    long_about = "devdrive makes sure a developer volume backed by a dynamically \
growing virtual disk image is attached and ready.\n\n\
A missing image is created, partitioned and formatted; a detached image is \
attached; an image that is already attached is left alone.\n\n\
Quick start:\n  \
devdrive up\n  \
devdrive status\n  \
devdrive detach"
)]
#[command(version)]
struct Cli {
    /// Config file (default: <config dir>/devdrive/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create or attach the dev drive image
    Up(cli::up::UpCmd),

    /// Detach the dev drive image
    Detach(cli::detach::DetachCmd),

    /// Show the state of the dev drive image
    Status(cli::status::StatusCmd),
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on RUST_LOG or -v
    init_logging(cli.verbose);

    tracing::debug!(version = devdrive::VERSION, "starting devdrive");

    let result = Settings::from_environment(cli.config.as_deref()).and_then(|settings| {
        match cli.command {
            Commands::Up(cmd) => cmd.run(&settings),
            Commands::Detach(cmd) => cmd.run(&settings),
            Commands::Status(cmd) => cmd.run(&settings),
        }
    });

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Initialize the tracing subscriber.
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "devdrive=warn",
        1 => "devdrive=info",
        _ => "devdrive=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
