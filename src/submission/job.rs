//! Job definitions for submission.
//!
//! This module defines the data assembled before any network I/O happens:
//!
//! - `JobNamespace`: service id and tube, from which all keys are derived
//! - `JobId`: identifier allocated from the store counter
//! - `JobPayload`: caller JSON or free-form extra fields
//! - `JobTiming`: time-to-run and validity
//! - `JobDescriptor`: everything above, built by `JobDescriptorBuilder`

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use tracing::warn;

use crate::error::SubmitError;

/// Default job time-to-run in seconds.
pub const DEFAULT_TTR_SECS: u64 = 3600;

/// Default job validity in seconds.
pub const DEFAULT_VALIDITY_SECS: u64 = 7200;

/// Largest accepted validity in seconds.
///
/// Redis stores an expiry as a signed 64-bit millisecond timestamp and
/// rejects an `EXPIRE` whose deadline overflows it. Half of that range
/// leaves room for the current time.
pub const MAX_VALIDITY_SECS: u64 = i64::MAX as u64 / 1000 / 2;

/// Initial value of the `status` field of a freshly submitted job.
pub const QUEUED_STATUS: &str = r#"{"status":"queued"}"#;

/// Identifier of a submitted job, unique within its namespace counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i64);

impl JobId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tenant-scoped queue a job belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobNamespace {
    service_id: String,
    tube: String,
}

impl JobNamespace {
    /// Creates a namespace. Both parts must be non-empty.
    pub fn new(service_id: impl Into<String>, tube: impl Into<String>) -> Result<Self, SubmitError> {
        let service_id = service_id.into();
        let tube = tube.into();

        if service_id.is_empty() {
            return Err(SubmitError::argument("service id must not be empty"));
        }
        if tube.is_empty() {
            return Err(SubmitError::argument("tube name must not be empty"));
        }

        Ok(Self { service_id, tube })
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn tube(&self) -> &str {
        &self.tube
    }

    /// Key of the per-service id counter.
    pub fn counter_key(&self) -> String {
        format!("{}:jobs:sequential_id", self.service_id)
    }

    /// Prefix shared by all status keys of this tube.
    pub fn status_key_prefix(&self) -> String {
        format!("{}:jobs:{}:", self.service_id, self.tube)
    }

    /// Key of the status record for `job_id`.
    pub fn status_key(&self, job_id: JobId) -> String {
        format!("{}{}", self.status_key_prefix(), job_id)
    }
}

/// Payload carried by the queued message.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JobPayload {
    /// Caller-supplied JSON document, serialized exactly as given.
    Json(Box<RawValue>),
    /// Free-form key/value pairs collected from unknown arguments.
    Fields(BTreeMap<String, String>),
}

impl JobPayload {
    /// Checks that `json` is one JSON document and keeps its text unchanged.
    ///
    /// Surrounding whitespace is trimmed; everything else, including key
    /// order and number spelling, reaches the consumer verbatim.
    pub fn from_json(json: impl Into<String>) -> Result<Self, SubmitError> {
        RawValue::from_string(json.into())
            .map(JobPayload::Json)
            .map_err(|e| SubmitError::argument(format!("payload is not valid JSON: {}", e)))
    }
}

impl PartialEq for JobPayload {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (JobPayload::Json(a), JobPayload::Json(b)) => a.get() == b.get(),
            (JobPayload::Fields(a), JobPayload::Fields(b)) => a == b,
            _ => false,
        }
    }
}

impl Default for JobPayload {
    fn default() -> Self {
        JobPayload::Fields(BTreeMap::new())
    }
}

/// Time bounds of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobTiming {
    /// Seconds a consumer may hold the job before the broker releases it.
    pub ttr: u64,
    /// Seconds the status record and the queued message stay discoverable.
    pub validity: u64,
}

impl Default for JobTiming {
    fn default() -> Self {
        Self {
            ttr: DEFAULT_TTR_SECS,
            validity: DEFAULT_VALIDITY_SECS,
        }
    }
}

impl JobTiming {
    pub fn new(ttr: u64, validity: u64) -> Result<Self, SubmitError> {
        let timing = Self { ttr, validity };
        timing.validate()?;
        Ok(timing)
    }

    fn validate(&self) -> Result<(), SubmitError> {
        if self.ttr == 0 {
            return Err(SubmitError::argument("ttr must be positive"));
        }
        // beanstalkd carries ttr as a 32-bit unsigned integer
        if self.ttr > u64::from(u32::MAX) {
            return Err(SubmitError::argument(format!(
                "ttr {} exceeds the maximum of {} seconds",
                self.ttr,
                u32::MAX
            )));
        }
        if self.validity == 0 {
            return Err(SubmitError::argument("validity must be positive"));
        }
        // An EXPIRE rejected after HSET would leave a record that never expires
        if self.validity > MAX_VALIDITY_SECS {
            return Err(SubmitError::argument(format!(
                "validity {} exceeds the maximum of {} seconds",
                self.validity, MAX_VALIDITY_SECS
            )));
        }
        Ok(())
    }
}

/// Everything needed to submit one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescriptor {
    pub namespace: JobNamespace,
    pub payload: JobPayload,
    pub timing: JobTiming,
}

/// Builds a [`JobDescriptor`] from parsed command-line inputs.
#[derive(Debug, Clone, Default)]
pub struct JobDescriptorBuilder {
    service_id: String,
    tube: String,
    payload_json: Option<String>,
    extra_fields: BTreeMap<String, String>,
    timing: JobTiming,
}

impl JobDescriptorBuilder {
    pub fn new(service_id: impl Into<String>, tube: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            tube: tube.into(),
            ..Default::default()
        }
    }

    /// Sets the JSON payload string. Takes precedence over extra fields.
    pub fn with_payload_json(mut self, json: impl Into<String>) -> Self {
        self.payload_json = Some(json.into());
        self
    }

    /// Adds one free-form field. A repeated key keeps the last value.
    pub fn with_extra_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_fields.insert(key.into(), value.into());
        self
    }

    pub fn with_extra_fields(mut self, fields: BTreeMap<String, String>) -> Self {
        self.extra_fields.extend(fields);
        self
    }

    pub fn with_ttr(mut self, seconds: u64) -> Self {
        self.timing.ttr = seconds;
        self
    }

    pub fn with_validity(mut self, seconds: u64) -> Self {
        self.timing.validity = seconds;
        self
    }

    /// Validates the inputs and assembles the descriptor.
    ///
    /// A JSON payload is checked here but kept as the caller's text, so
    /// the consumer receives it byte for byte.
    ///
    /// # Errors
    ///
    /// Returns `SubmitError::Argument` if the service id or tube is empty,
    /// if ttr or validity is zero or out of range, or if the payload is not
    /// valid JSON. No network I/O happens before these checks.
    pub fn build(self) -> Result<JobDescriptor, SubmitError> {
        let namespace = JobNamespace::new(self.service_id, self.tube)?;
        let timing = JobTiming::new(self.timing.ttr, self.timing.validity)?;

        let payload = match self.payload_json {
            Some(raw) => {
                let payload = JobPayload::from_json(raw)?;
                if !self.extra_fields.is_empty() {
                    warn!(
                        fields = self.extra_fields.len(),
                        "JSON payload given, ignoring extra fields"
                    );
                }
                payload
            }
            None => JobPayload::Fields(self.extra_fields),
        };

        Ok(JobDescriptor {
            namespace,
            payload,
            timing,
        })
    }
}
