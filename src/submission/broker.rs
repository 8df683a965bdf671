//! Work-queue broker seam.
//!
//! A [`BrokerConnector`] opens a producer connection scoped to one tube and
//! returns a [`QueueProducer`] that pushes [`OutgoingJob`]s onto it. How the
//! job is laid out on the wire is up to the implementation; the only
//! requirement is that a consumer can recover the job id and payload.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::SubmitError;

use super::job::{JobId, JobPayload, JobTiming};
use super::target::ConnectionTarget;

/// Priority used for every submitted job. Lower is more urgent in beanstalkd.
pub const DEFAULT_PRIORITY: u32 = 1024;

/// A job as handed to the broker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingJob {
    /// Job id in its string form.
    pub id: String,
    pub payload: JobPayload,
    pub priority: u32,
    /// Seconds before the job becomes ready.
    pub delay: u64,
    pub ttr: u64,
    pub validity: u64,
}

impl OutgoingJob {
    /// Builds an immediately ready job with the default priority.
    pub fn new(job_id: JobId, payload: JobPayload, timing: &JobTiming) -> Self {
        Self {
            id: job_id.to_string(),
            payload,
            priority: DEFAULT_PRIORITY,
            delay: 0,
            ttr: timing.ttr,
            validity: timing.validity,
        }
    }
}

/// Opens producer connections to a broker.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Connects to `target` and selects `tube` for subsequent pushes.
    ///
    /// # Arguments
    ///
    /// * `target` - Host and port of the broker
    /// * `tube` - Tube every push on the returned producer goes to
    /// * `connect_timeout` - Connect deadline; `None` waits as long as the OS does
    ///
    /// # Errors
    ///
    /// Returns `SubmitError::Connectivity` if the connection fails or times
    /// out, and `SubmitError::Protocol` if the tube is rejected.
    async fn connect(
        &self,
        target: &ConnectionTarget,
        tube: &str,
        connect_timeout: Option<Duration>,
    ) -> Result<Box<dyn QueueProducer>, SubmitError>;
}

/// An open producer connection bound to one tube.
#[async_trait]
pub trait QueueProducer: Send {
    /// Pushes one job and returns the broker-assigned id.
    async fn push(&mut self, job: &OutgoingJob) -> Result<u64, SubmitError>;

    async fn disconnect(self: Box<Self>) -> Result<(), SubmitError>;
}
