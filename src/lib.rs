//! job-submit: submit jobs to a beanstalkd tube with a Redis status record.
//!
//! This library allocates job ids from a Redis counter, records an initial
//! `queued` status for each job and pushes the job onto a beanstalkd tube.

pub mod cli;
pub mod error;
pub mod submission;

// Re-export commonly used error types
pub use error::{Service, Stage, SubmissionError, SubmitError};
