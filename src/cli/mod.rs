//! Command-line interface for job-submit.
//!
//! Parses flags, captures unknown `--key value` arguments as job fields and
//! runs a single submission.

mod commands;
mod extra_args;

pub use commands::{error_message, exit_status, parse_cli, run_with_cli, try_parse_from, Cli};
pub use extra_args::{partition_args, KnownFlags, PartitionedArgs};
