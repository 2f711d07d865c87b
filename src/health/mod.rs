//! Health tracking for the sensor monitor.

pub mod stats;

// Re-export commonly used types
pub use stats::{
    create_shared_stats, create_shared_stats_with_persistence, MonitorStats, PersistedStats,
    SharedMonitorStats, StatsSnapshot,
};
