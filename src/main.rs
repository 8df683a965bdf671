//! submit-job CLI entry point.
//!
//! Initializes logging and delegates to the CLI module for the submission.

use std::process::ExitCode;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first to get log_level
    let cli = job_submit::cli::parse_cli();

    // Priority: RUST_LOG env var > --log-level CLI arg > default "info"
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_filter());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    match job_submit::cli::run_with_cli(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", job_submit::cli::error_message(&err));
            ExitCode::from(job_submit::cli::exit_status(&err))
        }
    }
}
