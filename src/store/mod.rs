//! Key-value store access for the sensor monitor.
//!
//! The monitor needs only a handful of query shapes from the store:
//! set membership, whole-hash reads, the latest element of a sorted log,
//! and a pattern subscription to key-space notifications. They are
//! expressed as traits so the supervisor can run against Redis in
//! deployment and against [`MemoryStore`] in tests and dry runs.
//!
//! Every poller and the roster watcher own a dedicated connection; a
//! connection is never shared between threads.

pub mod memory;

#[cfg(feature = "redis")]
pub mod redis_store;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;

pub use memory::{MemoryConnection, MemoryStore, MemorySubscription, RosterFixture};

#[cfg(feature = "redis")]
pub use redis_store::{RedisConnection, RedisStore, RedisSubscription};

/// Store access errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached or the round trip failed
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store answered with something we could not interpret
    #[error("store protocol error: {0}")]
    Protocol(String),
}

/// Names of the keys the monitor reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterKeys {
    /// Set of registered sensor ids
    pub sensors: String,
    /// Hash of sensor id to raw capability record
    pub records: String,
    /// Hash of capability token to capability descriptor
    pub capabilities: String,
    /// Prefix of the per-sensor activity logs
    pub activity_prefix: String,
    /// Pattern matching key-space notifications for the roster
    pub roster_pattern: String,
}

impl Default for RosterKeys {
    fn default() -> Self {
        Self {
            sensors: "sensors".to_string(),
            records: "sensors:functions".to_string(),
            capabilities: "functions".to_string(),
            activity_prefix: "sensor".to_string(),
            roster_pattern: "__keyspace@*__:sensors".to_string(),
        }
    }
}

impl RosterKeys {
    /// Key of the time-ordered activity log of one sensor capability.
    pub fn activity_log(&self, sensor: &str, capability: &str) -> String {
        format!("{}:{sensor}:{capability}:timestamps", self.activity_prefix)
    }
}

/// The three roster reads, fetched together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterSnapshot {
    /// Registered sensor ids
    pub members: HashSet<String>,
    /// Sensor id to raw capability record
    pub records: HashMap<String, String>,
    /// Capability token to descriptor
    pub capabilities: HashMap<String, String>,
}

/// A key-space change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Pattern the subscription matched, when pattern-subscribed
    pub pattern: Option<String>,
    /// Channel the notification was published on
    pub channel: String,
    /// Payload; for key-space events this is the operation name
    pub payload: String,
}

/// A store that hands out connections and subscriptions.
pub trait Store: Send + Sync + 'static {
    type Connection: StoreConnection + 'static;
    type Subscription: Subscription + 'static;

    /// Open a new connection for exclusive use by one thread.
    fn connect(&self) -> Result<Self::Connection, StoreError>;

    /// Subscribe to channels matching `pattern`.
    fn subscribe_pattern(&self, pattern: &str) -> Result<Self::Subscription, StoreError>;
}

/// Queries available on a single store connection.
pub trait StoreConnection: Send {
    /// Members of a set.
    fn list_members(&mut self, key: &str) -> Result<HashSet<String>, StoreError>;

    /// All field/value pairs of a hash.
    fn get_all_fields(&mut self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Latest element of each sorted log, in one round trip.
    ///
    /// The result has one entry per key; a log with no elements yields an
    /// empty vector.
    fn range_latest_batch(&mut self, keys: &[String]) -> Result<Vec<Vec<String>>, StoreError>;

    /// Latest element of one sorted log.
    fn range_latest(&mut self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut out = self.range_latest_batch(&[key.to_string()])?;
        Ok(out.pop().unwrap_or_default())
    }

    /// Read the sensor set, the record hash and the capability table.
    fn fetch_roster(&mut self, keys: &RosterKeys) -> Result<RosterSnapshot, StoreError> {
        Ok(RosterSnapshot {
            members: self.list_members(&keys.sensors)?,
            records: self.get_all_fields(&keys.records)?,
            capabilities: self.get_all_fields(&keys.capabilities)?,
        })
    }
}

/// A live pattern subscription.
pub trait Subscription: Send {
    /// Wait up to `timeout` for the next notification.
    ///
    /// Returns `Ok(None)` when the timeout elapses without a message.
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Notification>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_keys() {
        let keys = RosterKeys::default();
        assert_eq!(keys.sensors, "sensors");
        assert_eq!(keys.records, "sensors:functions");
        assert_eq!(keys.capabilities, "functions");
        assert_eq!(keys.roster_pattern, "__keyspace@*__:sensors");
    }

    #[test]
    fn test_activity_log_key() {
        let keys = RosterKeys::default();
        assert_eq!(
            keys.activity_log("42", "temp"),
            "sensor:42:temp:timestamps"
        );
    }
}
