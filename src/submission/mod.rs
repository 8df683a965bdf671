//! Job submission across a key-value store and a work-queue broker.
//!
//! A submission touches two independent systems in a fixed order:
//!
//! ```text
//!                 ┌────────────────────────┐
//!                 │ SubmissionOrchestrator │
//!                 └───────────┬────────────┘
//!             ┌───────────────┴───────────────┐
//!             ▼                               ▼
//!      ┌─────────────┐                 ┌─────────────┐
//!      │    Redis    │                 │ beanstalkd  │
//!      │ INCR / HSET │                 │  use / put  │
//!      │   EXPIRE    │                 │             │
//!      └─────────────┘                 └─────────────┘
//! ```
//!
//! - **Identifier allocation**: `INCR {sid}:jobs:sequential_id`
//! - **Status record**: `HSET {sid}:jobs:{tube}:{id} status {"status":"queued"}`
//!   followed by `EXPIRE` with the job validity
//! - **Enqueue**: `put` on the job's tube with the job ttr
//!
//! In-memory doubles of both services live in `memory`, compiled only for
//! tests or with the `test-util` feature.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use job_submit::submission::{
//!     BeanstalkConnector, ConnectionTarget, JobDescriptorBuilder, OrchestratorConfig,
//!     RedisConnector, SubmissionOrchestrator,
//! };
//!
//! let orchestrator = SubmissionOrchestrator::new(
//!     OrchestratorConfig {
//!         store: ConnectionTarget::new("127.0.0.1", 6379),
//!         broker: ConnectionTarget::new("127.0.0.1", 11300),
//!         connect_timeout: None,
//!     },
//!     Arc::new(RedisConnector::new()),
//!     Arc::new(BeanstalkConnector::new()),
//! );
//!
//! let job = JobDescriptorBuilder::new("svc1", "work")
//!     .with_extra_field("priority", "5")
//!     .build()?;
//! let report = orchestrator.submit(&job).await?;
//! println!("submitted job {}", report.job_id);
//! ```

pub mod allocator;
pub mod beanstalk;
pub mod broker;
pub mod job;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod orchestrator;
pub mod queue;
pub mod status;
pub mod store;
pub mod target;

pub use allocator::IdentifierAllocator;
pub use beanstalk::BeanstalkConnector;
pub use broker::{BrokerConnector, OutgoingJob, QueueProducer, DEFAULT_PRIORITY};
pub use job::{
    JobDescriptor, JobDescriptorBuilder, JobId, JobNamespace, JobPayload, JobTiming,
    DEFAULT_TTR_SECS, DEFAULT_VALIDITY_SECS, MAX_VALIDITY_SECS, QUEUED_STATUS,
};
#[cfg(any(test, feature = "test-util"))]
pub use memory::{MemoryBroker, MemoryStore};
pub use orchestrator::{
    OrchestratorConfig, SubmissionOrchestrator, SubmissionReport, SubmissionState,
};
pub use queue::QueueSubmitter;
pub use status::StatusRecorder;
pub use store::{KeyValueStore, RedisConnector, StoreConnector};
pub use target::{split_pair, ConnectionTarget, DEFAULT_BEANSTALKD_TARGET, DEFAULT_REDIS_TARGET};
