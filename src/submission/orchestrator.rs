//! Submission orchestrator.
//!
//! Runs the submission as one linear sequence:
//!
//! ```text
//! Idle ──► IdAllocated ──► StatusRecorded ──► Enqueued ──► Done
//!   │           │                │                │
//!   └───────────┴────────────────┴────────────────┴──► Failed(stage)
//! ```
//!
//! Every external call is attempted exactly once and nothing is rolled back.
//! A failure in the status stage leaves an unused id behind; a failure in the
//! enqueue stage leaves a `queued` status record that no consumer will pick
//! up until it expires.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Stage, SubmissionError, SubmitError};

use super::allocator::IdentifierAllocator;
use super::broker::BrokerConnector;
use super::job::{JobDescriptor, JobId};
use super::queue::QueueSubmitter;
use super::status::StatusRecorder;
use super::store::{KeyValueStore, StoreConnector};
use super::target::ConnectionTarget;

/// Where the orchestrator connects.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub store: ConnectionTarget,
    pub broker: ConnectionTarget,
    /// Broker connect timeout. `None` waits as long as the OS does.
    pub connect_timeout: Option<Duration>,
}

/// Progress of one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionState {
    Idle,
    IdAllocated(JobId),
    StatusRecorded(JobId),
    Enqueued(JobId),
    Done(JobId),
    Failed(Stage),
}

impl SubmissionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionState::Done(_) | SubmissionState::Failed(_))
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionState::Idle => write!(f, "idle"),
            SubmissionState::IdAllocated(id) => write!(f, "id_allocated({})", id),
            SubmissionState::StatusRecorded(id) => write!(f, "status_recorded({})", id),
            SubmissionState::Enqueued(id) => write!(f, "enqueued({})", id),
            SubmissionState::Done(id) => write!(f, "done({})", id),
            SubmissionState::Failed(stage) => write!(f, "failed({})", stage),
        }
    }
}

/// Outcome of a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionReport {
    pub job_id: JobId,
    pub service_id: String,
    pub tube: String,
    pub status_key: String,
    pub broker_job_id: u64,
}

/// Tracks state transitions of a single submission.
struct Submission {
    state: SubmissionState,
    history: Vec<SubmissionState>,
}

impl Submission {
    fn new() -> Self {
        Self {
            state: SubmissionState::Idle,
            history: vec![SubmissionState::Idle],
        }
    }

    fn advance(&mut self, next: SubmissionState) {
        debug_assert!(!self.state.is_terminal(), "advance from terminal state");
        debug!(from = %self.state, to = %next, "submission transition");
        self.state = next.clone();
        self.history.push(next);
    }

    fn job_id(&self) -> Option<JobId> {
        match self.state {
            SubmissionState::IdAllocated(id)
            | SubmissionState::StatusRecorded(id)
            | SubmissionState::Enqueued(id)
            | SubmissionState::Done(id) => Some(id),
            SubmissionState::Idle | SubmissionState::Failed(_) => None,
        }
    }

    fn fail(&mut self, stage: Stage, source: SubmitError) -> SubmissionError {
        let job_id = self.job_id();
        self.advance(SubmissionState::Failed(stage));
        SubmissionError {
            stage,
            job_id,
            source,
        }
    }
}

/// Sequences id allocation, status recording and enqueueing.
pub struct SubmissionOrchestrator {
    config: OrchestratorConfig,
    store: Arc<dyn StoreConnector>,
    broker: Arc<dyn BrokerConnector>,
}

impl SubmissionOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<dyn StoreConnector>,
        broker: Arc<dyn BrokerConnector>,
    ) -> Self {
        Self {
            config,
            store,
            broker,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Submits one job.
    ///
    /// Allocates an id, records its `queued` status with the job validity as
    /// expiry, then pushes the job onto its tube. Nothing is retried or
    /// rolled back.
    ///
    /// # Arguments
    ///
    /// * `descriptor` - The validated job to submit
    ///
    /// # Errors
    ///
    /// Returns a `SubmissionError` naming the failed stage, the id if one was
    /// already allocated, and the underlying `SubmitError`.
    pub async fn submit(
        &self,
        descriptor: &JobDescriptor,
    ) -> Result<SubmissionReport, SubmissionError> {
        self.submit_traced(descriptor).await.0
    }

    /// Submits one job and also returns every state it passed through.
    pub async fn submit_traced(
        &self,
        descriptor: &JobDescriptor,
    ) -> (Result<SubmissionReport, SubmissionError>, Vec<SubmissionState>) {
        let mut submission = Submission::new();
        let result = self.run(descriptor, &mut submission).await;
        (result, submission.history)
    }

    async fn run(
        &self,
        descriptor: &JobDescriptor,
        submission: &mut Submission,
    ) -> Result<SubmissionReport, SubmissionError> {
        let namespace = &descriptor.namespace;

        let mut store = self
            .store
            .connect(&self.config.store)
            .await
            .map_err(|e| submission.fail(Stage::Allocation, e))?;

        let recorded = Self::record(store.as_mut(), descriptor, submission).await;

        if let Err(e) = store.disconnect().await {
            warn!(error = %e, target = %self.config.store, "failed to close store connection");
        }
        let (job_id, status_key) = recorded?;

        let submitter =
            QueueSubmitter::new(self.broker.as_ref(), &self.config.broker, self.config.connect_timeout);
        let broker_job_id = submitter
            .submit(job_id, namespace.tube(), &descriptor.payload, &descriptor.timing)
            .await
            .map_err(|e| submission.fail(Stage::Enqueue, e))?;
        submission.advance(SubmissionState::Enqueued(job_id));

        submission.advance(SubmissionState::Done(job_id));
        info!(
            %job_id,
            service_id = namespace.service_id(),
            tube = namespace.tube(),
            %status_key,
            broker_job_id,
            "job submitted"
        );

        Ok(SubmissionReport {
            job_id,
            service_id: namespace.service_id().to_string(),
            tube: namespace.tube().to_string(),
            status_key,
            broker_job_id,
        })
    }

    /// Allocation and status recording, both on `store`.
    async fn record(
        store: &mut dyn KeyValueStore,
        descriptor: &JobDescriptor,
        submission: &mut Submission,
    ) -> Result<(JobId, String), SubmissionError> {
        let namespace = &descriptor.namespace;

        let job_id = IdentifierAllocator::new(store)
            .allocate(namespace)
            .await
            .map_err(|e| submission.fail(Stage::Allocation, e))?;
        submission.advance(SubmissionState::IdAllocated(job_id));

        let status_key = StatusRecorder::new(store)
            .record(namespace, job_id, descriptor.timing.validity)
            .await
            .map_err(|e| submission.fail(Stage::Status, e))?;
        submission.advance(SubmissionState::StatusRecorded(job_id));

        Ok((job_id, status_key))
    }
}
