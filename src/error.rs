//! Error types for job submission.
//!
//! Every failure is classified into one of three kinds:
//! - `Argument`: malformed or missing input, detected before any network I/O
//! - `Connectivity`: transport or connection failure to the store or broker
//! - `Protocol`: a malformed or rejected reply from the store or broker
//!
//! The orchestrator wraps these in a [`SubmissionError`] that also records
//! which stage failed and whether an id had already been allocated.

use std::fmt;

use thiserror::Error;

use crate::submission::JobId;

/// External service an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// The Redis key-value store.
    Store,
    /// The beanstalkd queue broker.
    Broker,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Store => write!(f, "redis"),
            Service::Broker => write!(f, "beanstalkd"),
        }
    }
}

/// Errors that can occur while building or submitting a job.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("{service} connection failed: {message}")]
    Connectivity { service: Service, message: String },

    #[error("{service} protocol error: {message}")]
    Protocol { service: Service, message: String },
}

impl SubmitError {
    pub fn argument(message: impl Into<String>) -> Self {
        SubmitError::Argument(message.into())
    }

    pub fn connectivity(service: Service, message: impl Into<String>) -> Self {
        SubmitError::Connectivity {
            service,
            message: message.into(),
        }
    }

    pub fn protocol(service: Service, message: impl Into<String>) -> Self {
        SubmitError::Protocol {
            service,
            message: message.into(),
        }
    }

    /// Returns true for transport-level failures.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, SubmitError::Connectivity { .. })
    }

    /// Returns true for rejected or malformed replies.
    pub fn is_protocol(&self) -> bool {
        matches!(self, SubmitError::Protocol { .. })
    }

    /// Returns true for input validation failures.
    pub fn is_argument(&self) -> bool {
        matches!(self, SubmitError::Argument(_))
    }
}

impl From<redis::RedisError> for SubmitError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            SubmitError::connectivity(Service::Store, err.to_string())
        } else {
            SubmitError::protocol(Service::Store, err.to_string())
        }
    }
}

/// Stage of the submission sequence at which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Connecting to the store or incrementing the id counter.
    Allocation,
    /// Writing the status record or setting its expiry.
    Status,
    /// Connecting to the broker or pushing the message.
    Enqueue,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Allocation => write!(f, "allocation"),
            Stage::Status => write!(f, "status"),
            Stage::Enqueue => write!(f, "enqueue"),
        }
    }
}

/// A failed submission.
///
/// The message names the stage and job only; the cause is the error
/// [`source`](std::error::Error::source), printed by `{:#}` on an
/// `anyhow::Error`.
///
/// Side effects performed before the failing stage are left in place: an
/// allocated id stays consumed and a written status record lives until its
/// expiry.
#[derive(Debug, Error)]
#[error("Job submission failed at {stage} stage{}", job_suffix(.job_id))]
pub struct SubmissionError {
    pub stage: Stage,
    pub job_id: Option<JobId>,
    #[source]
    pub source: SubmitError,
}

fn job_suffix(job_id: &Option<JobId>) -> String {
    match job_id {
        Some(id) => format!(" (job {})", id),
        None => String::new(),
    }
}
