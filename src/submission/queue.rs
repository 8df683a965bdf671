//! Pushing a job onto its broker tube.

use std::time::Duration;

use tracing::{debug, warn};

use crate::error::SubmitError;

use super::broker::{BrokerConnector, OutgoingJob};
use super::job::{JobId, JobPayload, JobTiming};
use super::target::ConnectionTarget;

/// Submits one job per call over a fresh producer connection.
///
/// The connection is scoped to the target tube and is closed whether or not
/// the push succeeded.
pub struct QueueSubmitter<'a> {
    connector: &'a dyn BrokerConnector,
    target: &'a ConnectionTarget,
    connect_timeout: Option<Duration>,
}

impl<'a> QueueSubmitter<'a> {
    pub fn new(
        connector: &'a dyn BrokerConnector,
        target: &'a ConnectionTarget,
        connect_timeout: Option<Duration>,
    ) -> Self {
        Self {
            connector,
            target,
            connect_timeout,
        }
    }

    /// Pushes the job and returns the broker-assigned id.
    pub async fn submit(
        &self,
        job_id: JobId,
        tube: &str,
        payload: &JobPayload,
        timing: &JobTiming,
    ) -> Result<u64, SubmitError> {
        let mut producer = self
            .connector
            .connect(self.target, tube, self.connect_timeout)
            .await?;

        let job = OutgoingJob::new(job_id, payload.clone(), timing);
        let pushed = producer.push(&job).await;

        // The job is already on the tube if the push succeeded, so a failed
        // quit does not fail the submission.
        if let Err(e) = producer.disconnect().await {
            warn!(error = %e, target = %self.target, "failed to close broker connection");
        }

        let broker_job_id = pushed?;
        debug!(%job_id, tube, broker_job_id, ttr = timing.ttr, "job enqueued");
        Ok(broker_job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::memory::MemoryBroker;
    use std::collections::BTreeMap;

    fn target() -> ConnectionTarget {
        ConnectionTarget::new("127.0.0.1", 11300)
    }

    #[tokio::test]
    async fn test_submit_pushes_one_message() {
        let broker = MemoryBroker::new();
        let target = target();
        let mut fields = BTreeMap::new();
        fields.insert("priority".to_string(), "5".to_string());
        let payload = JobPayload::Fields(fields.clone());
        let timing = JobTiming::new(10, 20).expect("valid timing");

        let broker_id = QueueSubmitter::new(&broker, &target, None)
            .submit(JobId::new(4), "work", &payload, &timing)
            .await
            .expect("submit should succeed");

        let messages = broker.messages("work");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].broker_job_id, broker_id);
        assert_eq!(messages[0].job.id, "4");
        assert_eq!(messages[0].job.payload, JobPayload::Fields(fields));
        assert_eq!(messages[0].job.ttr, 10);
        assert_eq!(messages[0].job.validity, 20);
        assert_eq!(messages[0].job.delay, 0);
        assert_eq!(broker.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_rejected_push_still_disconnects() {
        let broker = MemoryBroker::new();
        broker.reject_pushes();
        let target = target();

        let err = QueueSubmitter::new(&broker, &target, None)
            .submit(JobId::new(1), "work", &JobPayload::default(), &JobTiming::default())
            .await
            .unwrap_err();

        assert!(err.is_protocol());
        assert_eq!(broker.disconnects(), 1);
        assert!(broker.messages("work").is_empty());
    }

    #[tokio::test]
    async fn test_connect_failure_is_connectivity() {
        let broker = MemoryBroker::new();
        broker.refuse_connections();
        let target = target();

        let err = QueueSubmitter::new(&broker, &target, None)
            .submit(JobId::new(1), "work", &JobPayload::default(), &JobTiming::default())
            .await
            .unwrap_err();

        assert!(err.is_connectivity());
        assert_eq!(broker.connections_opened(), 0);
    }
}
