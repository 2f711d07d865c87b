//! Monitor supervisor.
//!
//! Owns every piece of mutable monitor state: the pollers of the current
//! generation, the termination signals, the event channel and the stats.
//! A roster change is handled by stopping every poller and partitioning
//! the roster again from scratch.

use crate::health::{create_shared_stats, SharedMonitorStats};
use crate::monitor::poller::{ActivityPoller, PollerConfig};
use crate::monitor::report::ActivityReport;
use crate::monitor::signal::TerminationSignal;
use crate::monitor::watcher::{RosterWatcher, WatcherError};
use crate::roster::{decode_roster, partition, PartitionPlan, SensorId};
use crate::store::{Notification, RosterKeys, Store, StoreConnection, StoreError};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Capacity of the report channel; reports beyond it are dropped.
const REPORT_CHANNEL_CAPACITY: usize = 10_000;

/// How often [`MonitorSupervisor::run`] checks the process signal.
const EVENT_TICK: Duration = Duration::from_millis(100);

/// Lifecycle of a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Running,
    Reconfiguring,
    ShuttingDown,
    Stopped,
}

/// Messages delivered to the supervisor by the watcher and the pollers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// The roster key was touched
    RosterChanged(Notification),
    /// A poller failed `consecutive_failures` cycles in a row
    Degraded {
        worker: usize,
        generation: u64,
        consecutive_failures: u32,
    },
    /// A degraded poller completed a cycle again
    Recovered { worker: usize, generation: u64 },
}

/// Supervisor errors.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("monitor is already running")]
    AlreadyRunning,
    #[error("monitor has been terminated")]
    Terminated,
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
    #[error(transparent)]
    SubscriptionSetupFailure(WatcherError),
    #[error("failed to spawn thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl From<WatcherError> for SupervisorError {
    fn from(err: WatcherError) -> Self {
        match err {
            WatcherError::Spawn(e) => SupervisorError::Spawn(e),
            other => SupervisorError::SubscriptionSetupFailure(other),
        }
    }
}

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Upper bound on concurrent pollers
    pub max_workers: usize,
    /// Pause between two poll cycles
    pub measurement_period: Duration,
    /// Bounded wait of the roster watcher
    pub watch_timeout: Duration,
    /// Consecutive failed cycles before a poller is degraded
    pub degraded_after: u32,
    /// Store key names
    pub keys: RosterKeys,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            measurement_period: Duration::from_secs(10),
            watch_timeout: Duration::from_secs(1),
            degraded_after: 3,
            keys: RosterKeys::default(),
        }
    }
}

impl SupervisorConfig {
    fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            measurement_period: self.measurement_period,
            degraded_after: self.degraded_after,
            keys: self.keys.clone(),
        }
    }
}

#[derive(Debug)]
struct PollerHandle {
    worker: usize,
    sensors: Vec<SensorId>,
    handle: JoinHandle<()>,
}

/// Supervises one generation of pollers at a time.
pub struct MonitorSupervisor<S: Store> {
    store: S,
    config: SupervisorConfig,
    state: SupervisorState,
    /// Raised on process exit; parent of every generation signal
    process_signal: TerminationSignal,
    /// Signal of the running generation, taken on shutdown
    generation_signal: Option<TerminationSignal>,
    generation: u64,
    pollers: Vec<PollerHandle>,
    last_plan: Option<PartitionPlan>,
    /// When a failed start is retried
    retry_at: Option<Instant>,
    events_tx: Sender<SupervisorEvent>,
    events_rx: Receiver<SupervisorEvent>,
    reports_tx: Sender<ActivityReport>,
    reports_rx: Receiver<ActivityReport>,
    stats: SharedMonitorStats,
}

impl<S: Store> MonitorSupervisor<S> {
    /// Create an idle supervisor.
    pub fn new(store: S, config: SupervisorConfig) -> Self {
        Self::with_stats(store, config, create_shared_stats())
    }

    /// Create an idle supervisor that records into `stats`.
    pub fn with_stats(store: S, config: SupervisorConfig, stats: SharedMonitorStats) -> Self {
        let (events_tx, events_rx) = unbounded();
        let (reports_tx, reports_rx) = bounded(REPORT_CHANNEL_CAPACITY);
        Self {
            store,
            config,
            state: SupervisorState::Idle,
            process_signal: TerminationSignal::new(),
            generation_signal: None,
            generation: 0,
            pollers: Vec::new(),
            last_plan: None,
            retry_at: None,
            events_tx,
            events_rx,
            reports_tx,
            reports_rx,
            stats,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Number of pollers of the current generation.
    pub fn poller_count(&self) -> usize {
        self.pollers.len()
    }

    /// Number of completed `start()` calls.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Partition used by the current (or last) generation.
    pub fn last_plan(&self) -> Option<PartitionPlan> {
        self.last_plan
    }

    pub fn stats(&self) -> &SharedMonitorStats {
        &self.stats
    }

    /// Reports emitted by the pollers.
    pub fn reports(&self) -> &Receiver<ActivityReport> {
        &self.reports_rx
    }

    /// Process-level signal; raising it stops every poller and [`run`](Self::run).
    pub fn termination_signal(&self) -> TerminationSignal {
        self.process_signal.clone()
    }

    /// Read the roster, partition it, and spawn one poller per chunk.
    pub fn start(&mut self) -> Result<PartitionPlan, SupervisorError> {
        if self.state == SupervisorState::Running {
            return Err(SupervisorError::AlreadyRunning);
        }
        if self.process_signal.is_terminating() {
            self.retry_at = None;
            self.state = SupervisorState::Stopped;
            return Err(SupervisorError::Terminated);
        }

        let result = self.spawn_generation();
        match &result {
            Ok(_) => {
                self.retry_at = None;
                self.state = SupervisorState::Running;
            }
            Err(e) => {
                if matches!(e, SupervisorError::StoreUnavailable(_)) {
                    self.stats.record_store_failure();
                }
                self.retry_at = Some(Instant::now() + self.config.measurement_period);
                self.state = SupervisorState::Stopped;
            }
        }
        result
    }

    /// Retry a failed start once a measurement period has passed.
    ///
    /// Returns `true` if a retry was attempted.
    pub fn retry_failed_start(&mut self) -> bool {
        let Some(due) = self.retry_at else {
            return false;
        };
        if Instant::now() < due || self.process_signal.is_terminating() {
            return false;
        }

        match self.start() {
            Ok(plan) => tracing::info!(
                generation = self.generation,
                workers = plan.workers,
                "monitor restarted"
            ),
            Err(e) => tracing::warn!(error = %e, "start failed, retrying next period"),
        }
        true
    }

    fn spawn_generation(&mut self) -> Result<PartitionPlan, SupervisorError> {
        let roster = self.store.connect()?.fetch_roster(&self.config.keys)?;
        let decoded = decode_roster(&roster.records, &roster.members, &roster.capabilities);
        self.stats.record_unknown_sensors(decoded.unknown.len() as u64);
        self.stats
            .record_malformed_records(decoded.rejected.len() as u64);

        let chunks = partition(&decoded.sensors, self.config.max_workers);
        let plan = PartitionPlan::of(&chunks);

        // Acquire every connection before spawning so a failure leaves nothing running.
        let connections = chunks
            .iter()
            .map(|_| self.store.connect())
            .collect::<Result<Vec<_>, _>>()?;

        self.generation += 1;
        let signal = self.process_signal.child();
        tracing::info!(
            generation = self.generation,
            workers = plan.workers,
            sensors = plan.sensors,
            per_worker = plan.max_chunk,
            "starting pollers"
        );

        for (worker, (chunk, conn)) in chunks.into_iter().zip(connections).enumerate() {
            let sensors = chunk.sensor_ids();
            let poller = ActivityPoller::new(
                worker,
                self.generation,
                chunk,
                conn,
                self.config.poller_config(),
                signal.clone(),
                self.reports_tx.clone(),
                self.events_tx.clone(),
                self.stats.clone(),
            );

            let spawned = thread::Builder::new()
                .name(format!("poller-{worker}"))
                .spawn(move || poller.run());
            match spawned {
                Ok(handle) => self.pollers.push(PollerHandle {
                    worker,
                    sensors,
                    handle,
                }),
                Err(e) => {
                    signal.raise();
                    self.join_pollers();
                    return Err(SupervisorError::Spawn(e));
                }
            }
        }

        self.generation_signal = Some(signal);
        self.last_plan = Some(plan);
        Ok(plan)
    }

    /// Stop every poller and wait for them to exit.
    ///
    /// Returns `false` if there was nothing to stop.
    pub fn shutdown(&mut self) -> bool {
        self.retry_at = None;
        self.stop_pollers(SupervisorState::ShuttingDown)
    }

    fn stop_pollers(&mut self, transition: SupervisorState) -> bool {
        let Some(signal) = self.generation_signal.take() else {
            return false;
        };

        self.state = transition;
        signal.raise();
        self.join_pollers();
        self.state = SupervisorState::Stopped;
        true
    }

    /// Block until every poller of the current generation has exited.
    ///
    /// Pollers only exit once a termination signal is raised, typically the
    /// process signal from another thread.
    pub fn join(&mut self) {
        self.join_pollers();
        if self.state == SupervisorState::Running {
            self.generation_signal = None;
            self.state = SupervisorState::Stopped;
        }
    }

    fn join_pollers(&mut self) {
        for poller in self.pollers.drain(..) {
            if poller.handle.join().is_err() {
                tracing::error!(
                    worker = poller.worker,
                    sensors = ?poller.sensors,
                    "poller panicked"
                );
            }
        }
    }

    /// Stop all pollers and partition the roster again.
    pub fn on_roster_changed(&mut self) -> Result<PartitionPlan, SupervisorError> {
        tracing::info!(generation = self.generation, "roster changed, re-partitioning");
        self.stop_pollers(SupervisorState::Reconfiguring);
        self.stats.record_restart();
        self.state = SupervisorState::Reconfiguring;
        self.start()
    }

    /// Subscribe to roster changes, delivering them to this supervisor.
    pub fn spawn_watcher(&self) -> Result<RosterWatcher, SupervisorError> {
        Ok(RosterWatcher::spawn(
            &self.store,
            &self.config.keys.roster_pattern,
            self.config.watch_timeout,
            self.process_signal.child(),
            self.events_tx.clone(),
            self.stats.clone(),
        )?)
    }

    /// Wait up to `timeout` for the next event.
    pub fn next_event(&self, timeout: Duration) -> Option<SupervisorEvent> {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// React to one event.
    pub fn handle_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::RosterChanged(notification) => {
                tracing::debug!(channel = %notification.channel, "roster event");
                if let Err(e) = self.on_roster_changed() {
                    tracing::error!(error = %e, "re-partition failed, retrying next period");
                }
            }
            SupervisorEvent::Degraded {
                worker,
                generation,
                consecutive_failures,
            } if generation == self.generation => {
                tracing::warn!(
                    worker,
                    consecutive_failures,
                    "poller degraded, store unreachable"
                );
            }
            SupervisorEvent::Recovered { worker, generation } if generation == self.generation => {
                tracing::info!(worker, "poller recovered");
            }
            stale => {
                tracing::debug!(event = ?stale, "ignoring event from a previous generation");
            }
        }
    }

    /// Run until the process signal is raised.
    ///
    /// Subscribes to roster changes, starts the pollers, and re-partitions
    /// on every roster change. A failed subscription is returned before
    /// any poller starts. A failed restart is retried every measurement
    /// period.
    pub fn run(&mut self) -> Result<(), SupervisorError> {
        let mut watcher = self.spawn_watcher()?;
        self.start()?;

        while !self.process_signal.is_terminating() {
            if let Some(event) = self.next_event(EVENT_TICK) {
                self.handle_event(event);
            }
            self.retry_failed_start();
        }

        tracing::info!("shutting down monitor");
        watcher.stop();
        self.shutdown();
        Ok(())
    }
}

impl<S: Store> Drop for MonitorSupervisor<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
