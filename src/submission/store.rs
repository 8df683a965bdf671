//! Key-value store client used for id allocation and status records.
//!
//! The store is reached through two traits so the submission sequence can be
//! exercised against in-memory stores in tests:
//!
//! - [`StoreConnector`] opens a connection to a [`ConnectionTarget`]
//! - [`KeyValueStore`] is one open connection
//!
//! [`RedisConnector`] is the production implementation. It uses a single
//! multiplexed connection without automatic reconnection, so every command of
//! one submission goes over the same socket.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::debug;

use crate::error::{Service, SubmitError};

use super::target::ConnectionTarget;

/// Opens connections to a key-value store.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Opens one connection used for every command of a submission.
    ///
    /// # Arguments
    ///
    /// * `target` - Host and port of the store
    ///
    /// # Errors
    ///
    /// Returns `SubmitError::Connectivity` if the store cannot be reached.
    async fn connect(&self, target: &ConnectionTarget)
        -> Result<Box<dyn KeyValueStore>, SubmitError>;
}

/// An open key-value store connection.
#[async_trait]
pub trait KeyValueStore: Send {
    /// Atomically increments the integer at `key` and returns the new value.
    async fn increment(&mut self, key: &str) -> Result<i64, SubmitError>;

    /// Sets `field` of the hash at `key` to `value`.
    async fn set_field(&mut self, key: &str, field: &str, value: &str) -> Result<(), SubmitError>;

    /// Expires `key` after `seconds`.
    async fn expire(&mut self, key: &str, seconds: u64) -> Result<(), SubmitError>;

    /// Closes the connection.
    async fn disconnect(self: Box<Self>) -> Result<(), SubmitError>;
}

/// Connects to Redis.
#[derive(Debug, Clone, Default)]
pub struct RedisConnector;

impl RedisConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StoreConnector for RedisConnector {
    async fn connect(
        &self,
        target: &ConnectionTarget,
    ) -> Result<Box<dyn KeyValueStore>, SubmitError> {
        let url = format!("redis://{}:{}/", target.host, target.port);
        let client = redis::Client::open(url.as_str())
            .map_err(|e| SubmitError::argument(format!("invalid redis address {}: {}", target, e)))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| SubmitError::connectivity(Service::Store, format!("{}: {}", target, e)))?;

        debug!(%target, "connected to redis");
        Ok(Box::new(RedisStore { conn }))
    }
}

/// An open Redis connection.
pub struct RedisStore {
    conn: MultiplexedConnection,
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn increment(&mut self, key: &str) -> Result<i64, SubmitError> {
        let value: i64 = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut self.conn)
            .await?;
        Ok(value)
    }

    async fn set_field(&mut self, key: &str, field: &str, value: &str) -> Result<(), SubmitError> {
        redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async::<_, ()>(&mut self.conn)
            .await?;
        Ok(())
    }

    async fn expire(&mut self, key: &str, seconds: u64) -> Result<(), SubmitError> {
        let applied: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async(&mut self.conn)
            .await?;

        if applied != 1 {
            return Err(SubmitError::protocol(
                Service::Store,
                format!("EXPIRE on missing key {}", key),
            ));
        }
        Ok(())
    }

    async fn disconnect(self: Box<Self>) -> Result<(), SubmitError> {
        // Dropping the last handle closes the socket.
        drop(self.conn);
        debug!("disconnected from redis");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused_is_connectivity() {
        // Port 1 on localhost is reserved and not listening.
        let target = ConnectionTarget::new("127.0.0.1", 1);
        let result = RedisConnector::new().connect(&target).await;
        match result {
            Err(err) => assert!(err.is_connectivity(), "unexpected error: {}", err),
            Ok(_) => panic!("Expected connection to fail"),
        }
    }
}
