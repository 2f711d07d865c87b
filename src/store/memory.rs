//! In-memory store.
//!
//! Mirrors the subset of Redis behaviour the monitor relies on, including
//! key-space notifications on `__keyspace@0__:<key>`. Used by tests, the
//! demo, and `sensor-monitor start --snapshot` dry runs.

use crate::store::{
    Notification, RosterKeys, RosterSnapshot, Store, StoreConnection, StoreError, Subscription,
};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct State {
    sets: HashMap<String, BTreeSet<String>>,
    hashes: HashMap<String, HashMap<String, String>>,
    /// Sorted by (score, member)
    logs: HashMap<String, Vec<(f64, String)>>,
    subscribers: Vec<(Regex, String, Sender<Notification>)>,
}

impl State {
    fn publish(&mut self, key: &str, operation: &str) {
        let channel = format!("__keyspace@0__:{key}");
        self.subscribers.retain(|(regex, pattern, sender)| {
            if !regex.is_match(&channel) {
                return true;
            }
            sender
                .send(Notification {
                    pattern: Some(pattern.clone()),
                    channel: channel.clone(),
                    payload: operation.to_string(),
                })
                .is_ok()
        });
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    available: AtomicBool,
    subscriptions_enabled: AtomicBool,
    round_trips: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Account for one round trip, failing if the store is marked down.
    fn round_trip(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        self.round_trips.fetch_add(1, Ordering::SeqCst);
        Ok(self.lock())
    }
}

/// A shared, thread-safe in-memory store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let shared = Shared::default();
        shared.available.store(true, Ordering::SeqCst);
        shared.subscriptions_enabled.store(true, Ordering::SeqCst);
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Build a store populated from a roster fixture.
    pub fn from_fixture(fixture: &RosterFixture, keys: &RosterKeys) -> Self {
        let store = Self::new();
        for sensor in &fixture.sensors {
            store.sadd(&keys.sensors, sensor);
        }
        for (sensor, record) in &fixture.records {
            store.hset(&keys.records, sensor, record);
        }
        for (token, name) in &fixture.capabilities {
            store.hset(&keys.capabilities, token, name);
        }
        for (key, timestamps) in &fixture.activity {
            for ts in timestamps {
                store.zadd(key, *ts, &ts.to_string());
            }
        }
        store
    }

    /// Load a JSON roster fixture from disk.
    pub fn load_fixture(path: &Path, keys: &RosterKeys) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", path.display())))?;
        let fixture: RosterFixture =
            serde_json::from_str(&content).map_err(|e| StoreError::Protocol(e.to_string()))?;
        Ok(Self::from_fixture(&fixture, keys))
    }

    /// Add a member to a set.
    pub fn sadd(&self, key: &str, member: &str) {
        let mut state = self.shared.lock();
        state
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        state.publish(key, "sadd");
    }

    /// Remove a member from a set.
    pub fn srem(&self, key: &str, member: &str) {
        let mut state = self.shared.lock();
        let removed = state
            .sets
            .get_mut(key)
            .map(|set| set.remove(member))
            .unwrap_or(false);
        if removed {
            state.publish(key, "srem");
        }
    }

    /// Set a hash field.
    pub fn hset(&self, key: &str, field: &str, value: &str) {
        let mut state = self.shared.lock();
        state
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        state.publish(key, "hset");
    }

    /// Remove a hash field.
    pub fn hdel(&self, key: &str, field: &str) {
        let mut state = self.shared.lock();
        let removed = state
            .hashes
            .get_mut(key)
            .map(|hash| hash.remove(field).is_some())
            .unwrap_or(false);
        if removed {
            state.publish(key, "hdel");
        }
    }

    /// Add a scored member to a sorted log.
    pub fn zadd(&self, key: &str, score: f64, member: &str) {
        let mut state = self.shared.lock();
        let log = state.logs.entry(key.to_string()).or_default();
        log.retain(|(_, m)| m != member);
        log.push((score, member.to_string()));
        log.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        state.publish(key, "zadd");
    }

    /// Mark the store reachable or unreachable for subsequent round trips.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    /// Allow or refuse new subscriptions.
    pub fn set_subscriptions_enabled(&self, enabled: bool) {
        self.shared
            .subscriptions_enabled
            .store(enabled, Ordering::SeqCst);
    }

    /// Number of round trips served so far.
    pub fn round_trips(&self) -> u64 {
        self.shared.round_trips.load(Ordering::SeqCst)
    }
}

impl Store for MemoryStore {
    type Connection = MemoryConnection;
    type Subscription = MemorySubscription;

    fn connect(&self) -> Result<MemoryConnection, StoreError> {
        if !self.shared.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(MemoryConnection {
            shared: self.shared.clone(),
        })
    }

    fn subscribe_pattern(&self, pattern: &str) -> Result<MemorySubscription, StoreError> {
        if !self.shared.available.load(Ordering::SeqCst)
            || !self.shared.subscriptions_enabled.load(Ordering::SeqCst)
        {
            return Err(StoreError::Unavailable(format!(
                "cannot subscribe to {pattern}"
            )));
        }

        let regex = glob_to_regex(pattern)?;
        let (sender, receiver) = unbounded();
        self.shared
            .lock()
            .subscribers
            .push((regex, pattern.to_string(), sender));
        Ok(MemorySubscription { receiver })
    }
}

/// A connection to a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
}

impl StoreConnection for MemoryConnection {
    fn list_members(&mut self, key: &str) -> Result<HashSet<String>, StoreError> {
        let state = self.shared.round_trip()?;
        Ok(state
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn get_all_fields(&mut self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let state = self.shared.round_trip()?;
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    fn range_latest_batch(&mut self, keys: &[String]) -> Result<Vec<Vec<String>>, StoreError> {
        let state = self.shared.round_trip()?;
        Ok(keys
            .iter()
            .map(|key| {
                state
                    .logs
                    .get(key)
                    .and_then(|log| log.last())
                    .map(|(_, member)| vec![member.clone()])
                    .unwrap_or_default()
            })
            .collect())
    }

    fn fetch_roster(&mut self, keys: &RosterKeys) -> Result<RosterSnapshot, StoreError> {
        let state = self.shared.round_trip()?;
        Ok(RosterSnapshot {
            members: state
                .sets
                .get(&keys.sensors)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default(),
            records: state.hashes.get(&keys.records).cloned().unwrap_or_default(),
            capabilities: state
                .hashes
                .get(&keys.capabilities)
                .cloned()
                .unwrap_or_default(),
        })
    }
}

/// A pattern subscription on a [`MemoryStore`].
#[derive(Debug)]
pub struct MemorySubscription {
    receiver: Receiver<Notification>,
}

impl Subscription for MemorySubscription {
    fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Notification>, StoreError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(notification) => Ok(Some(notification)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(StoreError::Unavailable("subscription closed".to_string()))
            }
        }
    }
}

/// JSON description of a roster, used to seed a [`MemoryStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RosterFixture {
    /// Registered sensor ids
    pub sensors: Vec<String>,
    /// Sensor id to raw capability record
    #[serde(default)]
    pub records: HashMap<String, String>,
    /// Capability token to descriptor
    #[serde(default)]
    pub capabilities: HashMap<String, String>,
    /// Activity log key to unix timestamps
    #[serde(default)]
    pub activity: HashMap<String, Vec<f64>>,
}

/// Translate a Redis glob pattern (`*`, `?`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex, StoreError> {
    let mut expr = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr).map_err(|e| StoreError::Protocol(e.to_string()))
}
