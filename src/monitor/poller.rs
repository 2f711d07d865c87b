//! Activity poller.
//!
//! One poller owns one sensor chunk and its own store connection. Each
//! cycle it fetches, per sensor, the latest entry of every capability log
//! in a single pipelined round trip, reports the newest one, then waits
//! for the measurement period or the termination signal.

use crate::health::SharedMonitorStats;
use crate::monitor::report::{parse_timestamp, ActivityReport};
use crate::monitor::signal::TerminationSignal;
use crate::monitor::supervisor::SupervisorEvent;
use crate::roster::{CapabilitySet, SensorChunk};
use crate::store::{RosterKeys, StoreConnection, StoreError};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Sender, TrySendError};
use std::time::Duration;
use thiserror::Error;

/// Failure to produce a report for one sensor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    #[error("no activity data for sensor {sensor}")]
    NoActivityData { sensor: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Settings shared by all pollers of a supervisor.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Pause between two cycles
    pub measurement_period: Duration,
    /// Consecutive failed cycles before the poller reports itself degraded
    pub degraded_after: u32,
    /// Store key names
    pub keys: RosterKeys,
}

/// How a poll cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every sensor of the chunk was processed
    Completed { reported: usize, without_activity: usize },
    /// A store round trip failed; the rest of the chunk was skipped
    StoreFailed(StoreError),
    /// The termination signal was observed mid-cycle
    Interrupted,
}

/// Query the newest activity of one sensor.
///
/// All capability logs of the sensor are fetched in one round trip. Log
/// members that are not valid unix timestamps are ignored.
pub fn poll_sensor<C: StoreConnection + ?Sized>(
    conn: &mut C,
    keys: &RosterKeys,
    sensor: &str,
    capabilities: &CapabilitySet,
    now: DateTime<Utc>,
) -> Result<ActivityReport, PollError> {
    let logs: Vec<String> = capabilities
        .known()
        .map(|cap| keys.activity_log(sensor, &cap.name))
        .collect();
    if logs.is_empty() {
        return Err(PollError::NoActivityData {
            sensor: sensor.to_string(),
        });
    }

    let latest = conn.range_latest_batch(&logs)?;
    let last_activity = latest
        .iter()
        .flatten()
        .filter_map(|member| {
            let ts = parse_timestamp(member);
            if ts.is_none() {
                tracing::warn!(sensor, member = %member, "ignoring unparsable activity entry");
            }
            ts
        })
        .max();

    match last_activity {
        Some(ts) => Ok(ActivityReport::new(sensor, ts, now)),
        None => Err(PollError::NoActivityData {
            sensor: sensor.to_string(),
        }),
    }
}

/// A poller bound to one chunk.
pub struct ActivityPoller<C> {
    worker: usize,
    generation: u64,
    chunk: SensorChunk,
    conn: C,
    config: PollerConfig,
    signal: TerminationSignal,
    reports: Sender<ActivityReport>,
    events: Sender<SupervisorEvent>,
    stats: SharedMonitorStats,
    consecutive_failures: u32,
    degraded: bool,
}

impl<C: StoreConnection> ActivityPoller<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker: usize,
        generation: u64,
        chunk: SensorChunk,
        conn: C,
        config: PollerConfig,
        signal: TerminationSignal,
        reports: Sender<ActivityReport>,
        events: Sender<SupervisorEvent>,
        stats: SharedMonitorStats,
    ) -> Self {
        Self {
            worker,
            generation,
            chunk,
            conn,
            config,
            signal,
            reports,
            events,
            stats,
            consecutive_failures: 0,
            degraded: false,
        }
    }

    pub fn chunk(&self) -> &SensorChunk {
        &self.chunk
    }

    /// Poll until the termination signal is raised.
    pub fn run(mut self) {
        tracing::debug!(
            worker = self.worker,
            generation = self.generation,
            sensors = ?self.chunk.sensor_ids(),
            "poller started"
        );

        while !self.signal.is_terminating() {
            match self.poll_cycle() {
                CycleOutcome::Completed { .. } => self.cycle_succeeded(),
                CycleOutcome::StoreFailed(e) => self.cycle_failed(e),
                CycleOutcome::Interrupted => break,
            }

            if self.signal.wait_timeout(self.config.measurement_period) {
                break;
            }
        }

        if self.degraded {
            self.stats.poller_recovered();
        }

        tracing::info!(
            worker = self.worker,
            generation = self.generation,
            "stopped, sensors={:?}",
            self.chunk.sensor_ids()
        );
    }

    /// Process every sensor of the chunk once.
    pub fn poll_cycle(&mut self) -> CycleOutcome {
        let mut reported = 0;
        let mut without_activity = 0;

        for (sensor, capabilities) in self.chunk.sensors() {
            if self.signal.is_terminating() {
                return CycleOutcome::Interrupted;
            }

            match poll_sensor(
                &mut self.conn,
                &self.config.keys,
                sensor,
                capabilities,
                Utc::now(),
            ) {
                Ok(report) => {
                    self.emit(report);
                    reported += 1;
                }
                Err(PollError::NoActivityData { sensor }) => {
                    tracing::warn!(worker = self.worker, sensor = %sensor, "no activity data");
                    self.stats.record_no_activity();
                    without_activity += 1;
                }
                Err(PollError::Store(e)) => return CycleOutcome::StoreFailed(e),
            }
        }

        CycleOutcome::Completed {
            reported,
            without_activity,
        }
    }

    fn emit(&self, report: ActivityReport) {
        tracing::info!(
            worker = self.worker,
            sensor = %report.sensor_id,
            since = %report.since_display(),
            last_activity = %report.last_activity_display(),
            "last activity"
        );
        self.stats.record_report();

        if let Err(TrySendError::Full(report)) = self.reports.try_send(report) {
            tracing::debug!(sensor = %report.sensor_id, "report channel full, dropping report");
        }
    }

    fn cycle_succeeded(&mut self) {
        self.consecutive_failures = 0;
        if self.degraded {
            self.degraded = false;
            self.stats.poller_recovered();
            tracing::info!(worker = self.worker, "store reachable again");
            let _ = self.events.send(SupervisorEvent::Recovered {
                worker: self.worker,
                generation: self.generation,
            });
        }
    }

    fn cycle_failed(&mut self, error: StoreError) {
        self.consecutive_failures += 1;
        self.stats.record_store_failure();
        tracing::warn!(
            worker = self.worker,
            failures = self.consecutive_failures,
            error = %error,
            "poll cycle failed, retrying next period"
        );

        if !self.degraded && self.consecutive_failures >= self.config.degraded_after.max(1) {
            self.degraded = true;
            self.stats.poller_degraded();
            tracing::warn!(
                worker = self.worker,
                failures = self.consecutive_failures,
                "poller degraded"
            );
            let _ = self.events.send(SupervisorEvent::Degraded {
                worker: self.worker,
                generation: self.generation,
                consecutive_failures: self.consecutive_failures,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::create_shared_stats;
    use crate::roster::{Capability, CapabilitySlot};
    use crate::store::{MemoryStore, Store};
    use assert_matches::assert_matches;
    use crossbeam_channel::{bounded, unbounded, Receiver};
    use std::thread;
    use std::time::Instant;

    fn caps(names: &[&str]) -> CapabilitySet {
        CapabilitySet {
            reads: names
                .iter()
                .enumerate()
                .map(|(i, n)| CapabilitySlot::Known(Capability::new(i.to_string(), *n)))
                .collect(),
            writes: vec![CapabilitySlot::Absent(String::new())],
            report_key: "status".to_string(),
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_000, 0).unwrap()
    }

    struct Harness {
        store: MemoryStore,
        signal: TerminationSignal,
        reports: Receiver<ActivityReport>,
        events: Receiver<SupervisorEvent>,
        stats: SharedMonitorStats,
    }

    fn poller(
        sensors: Vec<(&str, CapabilitySet)>,
        period: Duration,
    ) -> (ActivityPoller<crate::store::MemoryConnection>, Harness) {
        let store = MemoryStore::new();
        let signal = TerminationSignal::new();
        let (report_tx, report_rx) = bounded(100);
        let (event_tx, event_rx) = unbounded();
        let stats = create_shared_stats();
        let chunk = SensorChunk::new(
            sensors
                .into_iter()
                .map(|(id, set)| (id.to_string(), set))
                .collect(),
        );
        let poller = ActivityPoller::new(
            0,
            1,
            chunk,
            store.connect().unwrap(),
            PollerConfig {
                measurement_period: period,
                degraded_after: 3,
                keys: RosterKeys::default(),
            },
            signal.clone(),
            report_tx,
            event_tx,
            stats.clone(),
        );
        (
            poller,
            Harness {
                store,
                signal,
                reports: report_rx,
                events: event_rx,
                stats,
            },
        )
    }

    #[test]
    fn test_last_activity_is_max_across_capabilities() {
        let store = MemoryStore::new();
        store.zadd("sensor:s1:temp:timestamps", 100.0, "100");
        store.zadd("sensor:s1:hum:timestamps", 250.0, "250");
        store.zadd("sensor:s1:valve:timestamps", 90.0, "90");

        let mut conn = store.connect().unwrap();
        let before = store.round_trips();
        let report = poll_sensor(
            &mut conn,
            &RosterKeys::default(),
            "s1",
            &caps(&["temp", "hum", "valve"]),
            now(),
        )
        .unwrap();

        assert_eq!(report.last_activity, DateTime::from_timestamp(250, 0).unwrap());
        assert_eq!(report.since, chrono::Duration::seconds(750));
        assert_eq!(store.round_trips() - before, 1);
    }

    #[test]
    fn test_no_capabilities_is_no_activity() {
        let store = MemoryStore::new();
        let mut conn = store.connect().unwrap();
        let result = poll_sensor(&mut conn, &RosterKeys::default(), "s1", &caps(&[]), now());
        assert_matches!(result, Err(PollError::NoActivityData { sensor }) if sensor == "s1");
        assert_eq!(store.round_trips(), 0);
    }

    #[test]
    fn test_empty_logs_is_no_activity() {
        let store = MemoryStore::new();
        store.zadd("sensor:s1:temp:timestamps", 1.0, "garbage");
        let mut conn = store.connect().unwrap();
        let result = poll_sensor(
            &mut conn,
            &RosterKeys::default(),
            "s1",
            &caps(&["temp", "hum"]),
            now(),
        );
        assert_matches!(result, Err(PollError::NoActivityData { .. }));
    }

    #[test]
    fn test_cycle_continues_past_sensor_without_data() {
        let (mut poller, h) = poller(
            vec![("a", caps(&[])), ("b", caps(&["temp"]))],
            Duration::from_secs(60),
        );
        h.store.zadd("sensor:b:temp:timestamps", 500.0, "500");

        assert_eq!(
            poller.poll_cycle(),
            CycleOutcome::Completed {
                reported: 1,
                without_activity: 1
            }
        );
        assert_eq!(h.reports.try_recv().unwrap().sensor_id, "b");
        assert_eq!(h.stats.snapshot().no_activity, 1);
    }

    #[test]
    fn test_cycle_observes_signal() {
        let (mut poller, h) = poller(vec![("a", caps(&["temp"]))], Duration::from_secs(60));
        h.signal.raise();
        assert_eq!(poller.poll_cycle(), CycleOutcome::Interrupted);
        assert!(h.reports.try_recv().is_err());
    }

    #[test]
    fn test_degraded_after_consecutive_failures() {
        let (mut poller, h) = poller(vec![("a", caps(&["temp"]))], Duration::from_secs(60));
        h.store.zadd("sensor:a:temp:timestamps", 5.0, "5");
        h.store.set_available(false);

        for _ in 0..2 {
            let outcome = poller.poll_cycle();
            assert_matches!(outcome, CycleOutcome::StoreFailed(_));
            if let CycleOutcome::StoreFailed(e) = outcome {
                poller.cycle_failed(e);
            }
        }
        assert!(h.events.try_recv().is_err());

        if let CycleOutcome::StoreFailed(e) = poller.poll_cycle() {
            poller.cycle_failed(e);
        }
        assert_matches!(
            h.events.try_recv(),
            Ok(SupervisorEvent::Degraded { consecutive_failures: 3, .. })
        );
        assert!(h.stats.is_degraded());

        h.store.set_available(true);
        assert_matches!(poller.poll_cycle(), CycleOutcome::Completed { reported: 1, .. });
        poller.cycle_succeeded();
        assert_matches!(h.events.try_recv(), Ok(SupervisorEvent::Recovered { .. }));
        assert!(!h.stats.is_degraded());
        assert_eq!(h.stats.snapshot().store_failures, 3);
    }

    #[test]
    fn test_signal_interrupts_sleep() {
        let (poller, h) = poller(vec![("a", caps(&["temp"]))], Duration::from_secs(3600));
        h.store.zadd("sensor:a:temp:timestamps", 5.0, "5");

        let handle = thread::spawn(move || poller.run());

        // First cycle has run once a report arrives; the poller is now asleep.
        h.reports.recv_timeout(Duration::from_secs(5)).unwrap();
        let start = Instant::now();
        h.signal.raise();
        handle.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
