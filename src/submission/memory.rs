//! In-memory store and broker test doubles.
//!
//! Only built for tests or with the `test-util` feature.
//!
//! Both keep their state behind an `Arc<Mutex<_>>`, so clones share data: a
//! test hands one clone to the orchestrator and inspects another afterwards.
//! Failure switches let a test break a specific command or connection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Service, SubmitError};

use super::broker::{BrokerConnector, OutgoingJob, QueueProducer};
use super::store::{KeyValueStore, StoreConnector};
use super::target::ConnectionTarget;

#[derive(Debug, Default)]
struct StoreState {
    strings: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    ttls: HashMap<String, u64>,
    refuse_connections: bool,
    failing_command: Option<&'static str>,
    connections_opened: usize,
    disconnects: usize,
}

/// Key-value store kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a connection directly, bypassing the connector.
    pub fn open(&self) -> MemoryStoreConnection {
        self.state.lock().expect("lock not poisoned").connections_opened += 1;
        MemoryStoreConnection {
            state: Arc::clone(&self.state),
            commands: Vec::new(),
        }
    }

    /// Makes subsequent `connect` calls fail with a connectivity error.
    pub fn refuse_connections(&self) {
        self.state.lock().expect("lock not poisoned").refuse_connections = true;
    }

    /// Makes every subsequent command fail with a connectivity error.
    pub fn fail_commands(&self) {
        self.fail_on("*");
    }

    /// Makes `command` (`INCR`, `HSET`, `EXPIRE`, or `*`) fail.
    pub fn fail_on(&self, command: &'static str) {
        self.state.lock().expect("lock not poisoned").failing_command = Some(command);
    }

    /// Stores a plain string value, e.g. to corrupt a counter.
    pub fn set_raw(&self, key: &str, value: &str) {
        self.state
            .lock()
            .expect("lock not poisoned")
            .strings
            .insert(key.to_string(), value.to_string());
    }

    pub fn counter(&self, key: &str) -> Option<i64> {
        let state = self.state.lock().expect("lock not poisoned");
        state.strings.get(key).and_then(|v| v.parse().ok())
    }

    pub fn field(&self, key: &str, field: &str) -> Option<String> {
        let state = self.state.lock().expect("lock not poisoned");
        state.hashes.get(key).and_then(|h| h.get(field).cloned())
    }

    pub fn ttl(&self, key: &str) -> Option<u64> {
        self.state.lock().expect("lock not poisoned").ttls.get(key).copied()
    }

    /// Keys of all stored hashes, sorted.
    pub fn hash_keys(&self) -> Vec<String> {
        let state = self.state.lock().expect("lock not poisoned");
        let mut keys: Vec<String> = state.hashes.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn connections_opened(&self) -> usize {
        self.state.lock().expect("lock not poisoned").connections_opened
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().expect("lock not poisoned").disconnects
    }
}

#[async_trait]
impl StoreConnector for MemoryStore {
    async fn connect(
        &self,
        target: &ConnectionTarget,
    ) -> Result<Box<dyn KeyValueStore>, SubmitError> {
        if self.state.lock().expect("lock not poisoned").refuse_connections {
            return Err(SubmitError::connectivity(
                Service::Store,
                format!("{}: connection refused", target),
            ));
        }
        Ok(Box::new(self.open()))
    }
}

/// One connection to a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryStoreConnection {
    state: Arc<Mutex<StoreState>>,
    commands: Vec<&'static str>,
}

impl MemoryStoreConnection {
    /// Commands issued on this connection, in order.
    pub fn commands(&self) -> Vec<&'static str> {
        self.commands.clone()
    }

    fn begin(&mut self, command: &'static str) -> Result<(), SubmitError> {
        self.commands.push(command);
        let state = self.state.lock().expect("lock not poisoned");
        match state.failing_command {
            Some(failing) if failing == "*" || failing == command => Err(
                SubmitError::connectivity(Service::Store, format!("{} failed: connection reset", command)),
            ),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStoreConnection {
    async fn increment(&mut self, key: &str) -> Result<i64, SubmitError> {
        self.begin("INCR")?;
        let mut state = self.state.lock().expect("lock not poisoned");
        let current = match state.strings.get(key) {
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                SubmitError::protocol(
                    Service::Store,
                    "value is not an integer or out of range",
                )
            })?,
            None => 0,
        };
        let next = current + 1;
        state.strings.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn set_field(&mut self, key: &str, field: &str, value: &str) -> Result<(), SubmitError> {
        self.begin("HSET")?;
        let mut state = self.state.lock().expect("lock not poisoned");
        state
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn expire(&mut self, key: &str, seconds: u64) -> Result<(), SubmitError> {
        self.begin("EXPIRE")?;
        let mut state = self.state.lock().expect("lock not poisoned");
        if !state.hashes.contains_key(key) && !state.strings.contains_key(key) {
            return Err(SubmitError::protocol(
                Service::Store,
                format!("EXPIRE on missing key {}", key),
            ));
        }
        state.ttls.insert(key.to_string(), seconds);
        Ok(())
    }

    async fn disconnect(self: Box<Self>) -> Result<(), SubmitError> {
        self.state.lock().expect("lock not poisoned").disconnects += 1;
        Ok(())
    }
}

/// A job pushed onto a [`MemoryBroker`] tube.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub broker_job_id: u64,
    pub job: OutgoingJob,
}

#[derive(Debug, Default)]
struct BrokerState {
    tubes: HashMap<String, Vec<StoredMessage>>,
    next_id: u64,
    refuse_connections: bool,
    reject_pushes: bool,
    connections_opened: usize,
    disconnects: usize,
}

/// Queue broker kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_connections(&self) {
        self.state.lock().expect("lock not poisoned").refuse_connections = true;
    }

    /// Makes every push fail with a protocol error.
    pub fn reject_pushes(&self) {
        self.state.lock().expect("lock not poisoned").reject_pushes = true;
    }

    /// Messages on `tube`, oldest first.
    pub fn messages(&self, tube: &str) -> Vec<StoredMessage> {
        let state = self.state.lock().expect("lock not poisoned");
        state.tubes.get(tube).cloned().unwrap_or_default()
    }

    pub fn connections_opened(&self) -> usize {
        self.state.lock().expect("lock not poisoned").connections_opened
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().expect("lock not poisoned").disconnects
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(
        &self,
        target: &ConnectionTarget,
        tube: &str,
        _connect_timeout: Option<Duration>,
    ) -> Result<Box<dyn QueueProducer>, SubmitError> {
        let mut state = self.state.lock().expect("lock not poisoned");
        if state.refuse_connections {
            return Err(SubmitError::connectivity(
                Service::Broker,
                format!("{}: connection refused", target),
            ));
        }
        state.connections_opened += 1;

        Ok(Box::new(MemoryProducer {
            state: Arc::clone(&self.state),
            tube: tube.to_string(),
        }))
    }
}

struct MemoryProducer {
    state: Arc<Mutex<BrokerState>>,
    tube: String,
}

#[async_trait]
impl QueueProducer for MemoryProducer {
    async fn push(&mut self, job: &OutgoingJob) -> Result<u64, SubmitError> {
        let mut state = self.state.lock().expect("lock not poisoned");
        if state.reject_pushes {
            return Err(SubmitError::protocol(Service::Broker, "put rejected: DRAINING"));
        }

        state.next_id += 1;
        let broker_job_id = state.next_id;
        state
            .tubes
            .entry(self.tube.clone())
            .or_default()
            .push(StoredMessage {
                broker_job_id,
                job: job.clone(),
            });
        Ok(broker_job_id)
    }

    async fn disconnect(self: Box<Self>) -> Result<(), SubmitError> {
        self.state.lock().expect("lock not poisoned").disconnects += 1;
        Ok(())
    }
}
