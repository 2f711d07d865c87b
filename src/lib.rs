//! Sensor Monitor - concurrent staleness monitoring for sensor fleets.
//!
//! Sensors register themselves in a Redis set together with a capability
//! record. For every registered sensor the monitor periodically looks up
//! the newest entry across all of its capability activity logs and reports
//! how long ago the sensor was last active.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      MonitorSupervisor                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────────┐     │
//! │  │   Roster    │──▶│   Codec     │──▶│   Partition     │     │
//! │  │ (3 hashes)  │   │ (records)   │   │ (≤ max_workers) │     │
//! │  └─────────────┘   └─────────────┘   └─────────────────┘     │
//! │         ▲                                     │              │
//! │         │ restart                             ▼              │
//! │  ┌─────────────┐                     ┌─────────────────┐     │
//! │  │   Roster    │                     │ ActivityPoller  │ × N │
//! │  │  Watcher    │                     │  (one per chunk)│     │
//! │  └─────────────┘                     └─────────────────┘     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sensor_monitor::{MemoryStore, MonitorSupervisor, SupervisorConfig};
//!
//! let store = MemoryStore::new();
//! store.sadd("sensors", "s1");
//! store.hset("functions", "1", "temp");
//! store.hset("sensors:functions", "s1", "r:1;w:;p:status");
//!
//! let mut supervisor = MonitorSupervisor::new(store, SupervisorConfig::default());
//! let signal = supervisor.termination_signal();
//! std::thread::spawn(move || {
//!     std::thread::sleep(std::time::Duration::from_secs(30));
//!     signal.raise();
//! });
//! supervisor.run().expect("monitor failed");
//! ```

pub mod config;
pub mod health;
pub mod monitor;
pub mod roster;
pub mod store;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use health::{MonitorStats, SharedMonitorStats, StatsSnapshot};
pub use monitor::{
    ActivityReport, MonitorSupervisor, SupervisorConfig, SupervisorError, SupervisorEvent,
    SupervisorState, TerminationSignal,
};
pub use roster::{CapabilityMap, CapabilitySet, PartitionPlan, SensorChunk};
pub use store::{MemoryStore, RosterKeys, Store, StoreConnection, StoreError};

#[cfg(feature = "redis")]
pub use store::RedisStore;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
