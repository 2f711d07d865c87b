//! Redis store adapter.
//!
//! Uses the synchronous `redis` client. Every [`RedisConnection`] and
//! [`RedisSubscription`] owns its own TCP connection; the subscription
//! connection stays in pub/sub mode for its whole lifetime.

use crate::store::{
    Notification, RosterKeys, RosterSnapshot, Store, StoreConnection, StoreError, Subscription,
};
use redis::Commands;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_io_error()
            || e.is_connection_refusal()
            || e.is_timeout()
            || e.is_connection_dropped()
        {
            StoreError::Unavailable(e.to_string())
        } else {
            StoreError::Protocol(e.to_string())
        }
    }
}

/// A Redis server reachable through a connection URL.
#[derive(Debug, Clone)]
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    /// Create a store for `url` (e.g. `redis://127.0.0.1:6379/0`).
    ///
    /// No connection is made until [`Store::connect`] is called.
    pub fn open(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }
}

impl Store for RedisStore {
    type Connection = RedisConnection;
    type Subscription = RedisSubscription;

    fn connect(&self) -> Result<RedisConnection, StoreError> {
        Ok(RedisConnection {
            con: self.client.get_connection()?,
        })
    }

    fn subscribe_pattern(&self, pattern: &str) -> Result<RedisSubscription, StoreError> {
        let mut con = self.client.get_connection()?;
        let packed = redis::cmd("PSUBSCRIBE").arg(pattern).get_packed_command();
        con.send_packed_command(&packed)?;
        // psubscribe confirmation
        con.recv_response()?;
        Ok(RedisSubscription { con })
    }
}

/// A dedicated Redis connection.
pub struct RedisConnection {
    con: redis::Connection,
}

impl StoreConnection for RedisConnection {
    fn list_members(&mut self, key: &str) -> Result<HashSet<String>, StoreError> {
        Ok(self.con.smembers(key)?)
    }

    fn get_all_fields(&mut self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self.con.hgetall(key)?)
    }

    fn range_latest_batch(&mut self, keys: &[String]) -> Result<Vec<Vec<String>>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for key in keys {
            pipe.zrange(key, -1, -1);
        }
        Ok(pipe.query(&mut self.con)?)
    }

    fn fetch_roster(&mut self, keys: &RosterKeys) -> Result<RosterSnapshot, StoreError> {
        let (members, records, capabilities): (
            HashSet<String>,
            HashMap<String, String>,
            HashMap<String, String>,
        ) = redis::pipe()
            .smembers(&keys.sensors)
            .hgetall(&keys.records)
            .hgetall(&keys.capabilities)
            .query(&mut self.con)?;

        Ok(RosterSnapshot {
            members,
            records,
            capabilities,
        })
    }
}

/// A connection held in pub/sub mode after `PSUBSCRIBE`.
pub struct RedisSubscription {
    // Owned so the subscription can outlive this call; `as_pubsub()` only borrows.
    con: redis::Connection,
}

impl Subscription for RedisSubscription {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Notification>, StoreError> {
        // A zero read timeout is rejected by the socket layer.
        let timeout = timeout.max(Duration::from_millis(1));
        self.con.set_read_timeout(Some(timeout))?;

        match self.con.recv_response() {
            Ok(value) => {
                let Some(msg) = redis::Msg::from_value(&value) else {
                    return Ok(None);
                };
                let pattern = if msg.from_pattern() {
                    msg.get_pattern::<String>().ok()
                } else {
                    None
                };
                Ok(Some(Notification {
                    pattern,
                    channel: msg.get_channel_name().to_string(),
                    payload: msg.get_payload::<String>()?,
                }))
            }
            Err(e) if e.is_timeout() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
