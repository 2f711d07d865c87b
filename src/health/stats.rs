//! Monitor statistics and health.
//!
//! Counters are updated lock-free from every poller thread and can be
//! persisted between runs so `sensor-monitor status` can show cumulative
//! numbers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Shared counters for one monitor process.
#[derive(Debug)]
pub struct MonitorStats {
    /// Staleness reports emitted
    reports: AtomicU64,
    /// Sensors polled without any activity data
    no_activity: AtomicU64,
    /// Failed store round trips
    store_failures: AtomicU64,
    /// Record entries for unregistered sensors
    unknown_sensors: AtomicU64,
    /// Records rejected by the codec
    malformed_records: AtomicU64,
    /// Roster notifications received
    roster_events: AtomicU64,
    /// Full stop/restart cycles
    restarts: AtomicU64,
    /// Pollers currently over the consecutive failure threshold
    degraded_pollers: AtomicU64,
    /// Identifier of this monitor run
    run_id: Uuid,
    /// Run start time
    started_at: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl MonitorStats {
    /// Create zeroed stats.
    pub fn new() -> Self {
        Self {
            reports: AtomicU64::new(0),
            no_activity: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            unknown_sensors: AtomicU64::new(0),
            malformed_records: AtomicU64::new(0),
            roster_events: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
            degraded_pollers: AtomicU64::new(0),
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create stats that continue from, and save to, `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!(error = %e, "could not load previous monitor stats");
        }

        stats
    }

    pub fn record_report(&self) {
        self.reports.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_no_activity(&self) {
        self.no_activity.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_sensors(&self, count: u64) {
        self.unknown_sensors.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_malformed_records(&self, count: u64) {
        self.malformed_records.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_roster_event(&self) {
        self.roster_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    /// A poller crossed the consecutive failure threshold.
    pub fn poller_degraded(&self) {
        self.degraded_pollers.fetch_add(1, Ordering::Relaxed);
    }

    /// A degraded poller completed a cycle again.
    pub fn poller_recovered(&self) {
        let _ = self
            .degraded_pollers
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Whether any poller is currently degraded.
    pub fn is_degraded(&self) -> bool {
        self.degraded_pollers.load(Ordering::Relaxed) > 0
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reports: self.reports.load(Ordering::Relaxed),
            no_activity: self.no_activity.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            unknown_sensors: self.unknown_sensors.load(Ordering::Relaxed),
            malformed_records: self.malformed_records.load(Ordering::Relaxed),
            roster_events: self.roster_events.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            degraded_pollers: self.degraded_pollers.load(Ordering::Relaxed),
            run_id: self.run_id,
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Monitor Statistics:\n\
             - Reports emitted: {}\n\
             - Sensors without activity: {}\n\
             - Store failures: {}\n\
             - Unknown sensor references: {}\n\
             - Malformed records: {}\n\
             - Roster change events: {}\n\
             - Restarts: {}\n\
             - Degraded pollers: {}\n\
             - Uptime: {} seconds",
            stats.reports,
            stats.no_activity,
            stats.store_failures,
            stats.unknown_sensors,
            stats.malformed_records,
            stats.roster_events,
            stats.restarts,
            stats.degraded_pollers,
            stats.uptime_secs
        )
    }

    /// Save cumulative counters to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.snapshot();
            let persisted = PersistedStats {
                reports: stats.reports,
                no_activity: stats.no_activity,
                store_failures: stats.store_failures,
                unknown_sensors: stats.unknown_sensors,
                malformed_records: stats.malformed_records,
                roster_events: stats.roster_events,
                restarts: stats.restarts,
                last_run_id: stats.run_id,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    /// Load cumulative counters from disk.
    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.reports.store(persisted.reports, Ordering::Relaxed);
                self.no_activity
                    .store(persisted.no_activity, Ordering::Relaxed);
                self.store_failures
                    .store(persisted.store_failures, Ordering::Relaxed);
                self.unknown_sensors
                    .store(persisted.unknown_sensors, Ordering::Relaxed);
                self.malformed_records
                    .store(persisted.malformed_records, Ordering::Relaxed);
                self.roster_events
                    .store(persisted.roster_events, Ordering::Relaxed);
                self.restarts.store(persisted.restarts, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for MonitorStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the monitor statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub reports: u64,
    pub no_activity: u64,
    pub store_failures: u64,
    pub unknown_sensors: u64,
    pub malformed_records: u64,
    pub roster_events: u64,
    pub restarts: u64,
    pub degraded_pollers: u64,
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedStats {
    pub reports: u64,
    pub no_activity: u64,
    pub store_failures: u64,
    pub unknown_sensors: u64,
    pub malformed_records: u64,
    pub roster_events: u64,
    pub restarts: u64,
    pub last_run_id: Uuid,
    pub last_updated: DateTime<Utc>,
}

/// Thread-safe shared monitor stats.
pub type SharedMonitorStats = Arc<MonitorStats>;

/// Create new shared stats.
pub fn create_shared_stats() -> SharedMonitorStats {
    Arc::new(MonitorStats::new())
}

/// Create new shared stats with persistence.
pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedMonitorStats {
    Arc::new(MonitorStats::with_persistence(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let stats = MonitorStats::new();

        stats.record_report();
        stats.record_report();
        stats.record_no_activity();
        stats.record_unknown_sensors(3);

        let snap = stats.snapshot();
        assert_eq!(snap.reports, 2);
        assert_eq!(snap.no_activity, 1);
        assert_eq!(snap.unknown_sensors, 3);
    }

    #[test]
    fn test_degraded_gauge() {
        let stats = MonitorStats::new();
        assert!(!stats.is_degraded());

        stats.poller_degraded();
        stats.poller_degraded();
        assert!(stats.is_degraded());

        stats.poller_recovered();
        assert!(stats.is_degraded());
        stats.poller_recovered();
        stats.poller_recovered();
        assert!(!stats.is_degraded());
        assert_eq!(stats.snapshot().degraded_pollers, 0);
    }

    #[test]
    fn test_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("stats.json");

        let stats = MonitorStats::with_persistence(path.clone());
        stats.record_report();
        stats.record_restart();
        stats.save().unwrap();

        let reloaded = MonitorStats::with_persistence(path);
        let snap = reloaded.snapshot();
        assert_eq!(snap.reports, 1);
        assert_eq!(snap.restarts, 1);
        assert_ne!(snap.run_id, stats.run_id());
    }

    #[test]
    fn test_summary_format() {
        let summary = MonitorStats::new().summary();
        assert!(summary.contains("Reports emitted"));
        assert!(summary.contains("Degraded pollers"));
    }
}
