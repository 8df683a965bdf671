//! CLI definition and the submit command.
//!
//! Flags the command does not declare are captured as free-form job fields
//! (see [`super::extra_args`]), so an invocation such as
//!
//! ```text
//! submit-job --sid svc1 --tube work --priority 5 --origin=cron
//! ```
//!
//! submits a job whose payload is `{"origin":"cron","priority":"5"}`.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, CommandFactory, Parser};
use tracing::debug;

use crate::error::SubmitError;
use crate::submission::{
    BeanstalkConnector, ConnectionTarget, JobDescriptor, JobDescriptorBuilder,
    OrchestratorConfig, RedisConnector, SubmissionOrchestrator, SubmissionReport,
    DEFAULT_BEANSTALKD_TARGET, DEFAULT_REDIS_TARGET, DEFAULT_TTR_SECS, DEFAULT_VALIDITY_SECS,
};

use super::extra_args::{partition_args, KnownFlags};

const BINARY_NAME: &str = "submit-job";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_LOG_LEVEL: &str = "info";

/// Submit a job to a beanstalkd tube and record its status in Redis.
#[derive(Parser, Debug)]
#[command(name = "submit-job")]
#[command(about = "Submit a job to a beanstalkd tube and record its status in Redis")]
#[command(version, disable_version_flag = true)]
#[command(
    long_about = "submit-job allocates a job id from a Redis counter, records a queued status for it and pushes the job onto a beanstalkd tube.\n\nUnknown --key value and --key=value arguments are sent as job fields.\n\nExample usage:\n  submit-job --sid svc1 --tube work --ttr 60 --priority 5"
)]
pub struct Cli {
    /// Hostname or ip address and port of the Redis server.
    #[arg(short = 'r', long, value_name = "HOST:PORT", default_value = DEFAULT_REDIS_TARGET, env = "JOB_SUBMIT_REDIS")]
    pub redis: String,

    /// Hostname or ip address and port of the beanstalkd server.
    #[arg(short = 'b', long, value_name = "HOST:PORT", default_value = DEFAULT_BEANSTALKD_TARGET, env = "JOB_SUBMIT_BEANSTALKD")]
    pub beanstalkd: String,

    /// Service id owning the job counter and status keys.
    #[arg(short = 'i', long, value_name = "ID")]
    pub sid: String,

    /// beanstalkd tube to push the job onto.
    #[arg(short = 't', long, value_name = "NAME")]
    pub tube: String,

    /// Job time to run in seconds.
    #[arg(short = 'v', long, value_name = "SECONDS", default_value_t = DEFAULT_TTR_SECS)]
    pub ttr: u64,

    /// Job validity in seconds.
    #[arg(short = 'V', long, value_name = "SECONDS", default_value_t = DEFAULT_VALIDITY_SECS)]
    pub validity: u64,

    /// Job payload JSON as a quoted string. Replaces any extra fields.
    #[arg(short = 'p', long, value_name = "JSON")]
    pub payload: Option<String>,

    /// beanstalkd connect timeout in seconds (0 waits as long as the OS does).
    #[arg(long, value_name = "SECONDS", default_value_t = 0)]
    pub connect_timeout: u64,

    /// Developer mode: print the resolved arguments and the status key.
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Print the submission report as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    /// Print version.
    #[arg(long, action = ArgAction::Version)]
    #[allow(dead_code)]
    version: Option<bool>,

    /// Unknown `--key value` arguments.
    #[arg(skip)]
    pub extra_fields: BTreeMap<String, String>,
}

impl Cli {
    /// Log filter to use when `RUST_LOG` is not set.
    ///
    /// Debug mode lowers the default level to `debug`; an explicit
    /// `--log-level` is kept.
    pub fn log_filter(&self) -> String {
        if self.debug && self.log_level == DEFAULT_LOG_LEVEL {
            "debug".to_string()
        } else {
            self.log_level.clone()
        }
    }

    /// Builds the job descriptor, validating every input.
    pub fn job_descriptor(&self) -> Result<JobDescriptor, SubmitError> {
        let mut builder = JobDescriptorBuilder::new(&self.sid, &self.tube)
            .with_extra_fields(self.extra_fields.clone())
            .with_ttr(self.ttr)
            .with_validity(self.validity);
        if let Some(ref json) = self.payload {
            builder = builder.with_payload_json(json);
        }
        builder.build()
    }

    /// Resolves connection targets and timeouts.
    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig, SubmitError> {
        Ok(OrchestratorConfig {
            store: ConnectionTarget::parse("redis HOST:PORT", &self.redis)?,
            broker: ConnectionTarget::parse("beanstalkd HOST:PORT", &self.beanstalkd)?,
            connect_timeout: (self.connect_timeout > 0)
                .then(|| Duration::from_secs(self.connect_timeout)),
        })
    }
}

/// Parse CLI arguments from an explicit argument list (program name first).
pub fn try_parse_from<I, T>(args: I) -> Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<String>,
{
    let known = KnownFlags::from_command(&Cli::command());
    let parts = partition_args(args, &known).map_err(|e| {
        Cli::command().error(clap::error::ErrorKind::UnknownArgument, e.to_string())
    })?;

    let mut cli = Cli::try_parse_from(parts.known)?;
    cli.extra_fields = parts.extra;
    Ok(cli)
}

/// Parse process arguments, exiting on `--help`, `--version` or bad input.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    let args = std::env::args_os().map(|arg| arg.to_string_lossy().into_owned());
    try_parse_from(args).unwrap_or_else(|e| e.exit())
}

/// Run the submission described by the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = cli.orchestrator_config()?;
    let descriptor = cli.job_descriptor()?;

    let mut stdout = std::io::stdout();
    if cli.debug {
        write_debug_arguments(&mut stdout, &cli, &config)
            .context("Failed to write debug output")?;
    }

    let orchestrator = SubmissionOrchestrator::new(
        config,
        Arc::new(RedisConnector::new()),
        Arc::new(BeanstalkConnector::new()),
    );
    debug!(service_id = %cli.sid, tube = %cli.tube, "submitting job");
    let report = orchestrator.submit(&descriptor).await?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report)?;
        writeln!(stdout, "{}", json).context("Failed to write report")?;
    }
    if cli.debug {
        write_debug_finished(&mut stdout, &report).context("Failed to write debug output")?;
    }

    Ok(())
}

/// Exit status for an error returned by [`run_with_cli`].
///
/// Input errors exit with 2, like clap's own usage errors; everything else
/// with 1.
pub fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<SubmitError>() {
        Some(e) if e.is_argument() => 2,
        _ => 1,
    }
}

/// One-line diagnostic for an error returned by [`run_with_cli`], causes
/// included.
pub fn error_message(err: &anyhow::Error) -> String {
    format!("{:#}", err)
}

fn write_debug_arguments(
    out: &mut impl Write,
    cli: &Cli,
    config: &OrchestratorConfig,
) -> std::io::Result<()> {
    writeln!(out, "{} v{}", BINARY_NAME, VERSION)?;
    writeln!(out, "arguments:")?;
    writeln!(out, "\t --{:<10}: {}", "sid", cli.sid)?;
    writeln!(out, "\t --{:<10}: {}", "tube", cli.tube)?;
    writeln!(out, "\t --{:<10}: {}", "ttr", cli.ttr)?;
    writeln!(out, "\t --{:<10}: {}", "validity", cli.validity)?;
    writeln!(out, "\t --{:<10}: {}", "redis", config.store)?;
    writeln!(out, "\t --{:<10}: {}", "beanstalkd", config.broker)?;
    if let Some(ref payload) = cli.payload {
        writeln!(out, "\t --{:<10}: {}", "payload", payload)?;
    }
    if !cli.extra_fields.is_empty() {
        writeln!(out, "other:")?;
        for (key, value) in &cli.extra_fields {
            writeln!(out, "\t  {:<10}: {}", key, value)?;
        }
    }
    out.flush()
}

fn write_debug_finished(out: &mut impl Write, report: &SubmissionReport) -> std::io::Result<()> {
    writeln!(out, "finished:")?;
    writeln!(out, "\t  {}", report.status_key)?;
    out.flush()
}
