//! Application entry point.
//!
//! Parses command-line arguments and delegates execution to
//! [`backend::run`].

use clap::Parser;
use makegen::{backend, cli::Cli};
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::fmt;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let max_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    fmt()
        .with_max_level(max_level)
        .with_writer(std::io::stderr)
        .init();
    match backend::run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("generation failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}
