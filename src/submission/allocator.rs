//! Job id allocation from the store counter.

use tracing::debug;

use crate::error::{Service, SubmitError};

use super::job::{JobId, JobNamespace};
use super::store::KeyValueStore;

/// Allocates job ids with a single atomic increment per call.
///
/// Uniqueness across processes comes entirely from the store's `INCR`; no
/// locking happens here and failures are not retried.
pub struct IdentifierAllocator<'a> {
    store: &'a mut dyn KeyValueStore,
}

impl<'a> IdentifierAllocator<'a> {
    pub fn new(store: &'a mut dyn KeyValueStore) -> Self {
        Self { store }
    }

    pub async fn allocate(&mut self, namespace: &JobNamespace) -> Result<JobId, SubmitError> {
        let key = namespace.counter_key();
        let value = self.store.increment(&key).await?;

        // INCR on a fresh key yields 1, so anything lower is a corrupted counter.
        if value < 1 {
            return Err(SubmitError::protocol(
                Service::Store,
                format!("counter {} returned non-positive id {}", key, value),
            ));
        }

        debug!(counter = %key, job_id = value, "allocated job id");
        Ok(JobId::new(value))
    }
}
