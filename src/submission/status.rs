//! Initial status record of a submitted job.

use tracing::debug;

use crate::error::SubmitError;

use super::job::{JobId, JobNamespace, QUEUED_STATUS};
use super::store::KeyValueStore;

/// Hash field holding the job status.
pub const STATUS_FIELD: &str = "status";

/// Writes the `queued` status record and its expiry.
///
/// Both commands go over the connection the recorder was created with, one
/// after the other. A failure after allocation leaves the id consumed.
pub struct StatusRecorder<'a> {
    store: &'a mut dyn KeyValueStore,
}

impl<'a> StatusRecorder<'a> {
    pub fn new(store: &'a mut dyn KeyValueStore) -> Self {
        Self { store }
    }

    /// Records the status and returns the status key.
    pub async fn record(
        &mut self,
        namespace: &JobNamespace,
        job_id: JobId,
        validity: u64,
    ) -> Result<String, SubmitError> {
        let key = namespace.status_key(job_id);

        self.store.set_field(&key, STATUS_FIELD, QUEUED_STATUS).await?;
        self.store.expire(&key, validity).await?;

        debug!(status_key = %key, validity, "recorded job status");
        Ok(key)
    }
}
