//! Roster change watcher.
//!
//! Listens for key-space notifications on the roster key and forwards
//! every one of them to the supervisor as
//! [`SupervisorEvent::RosterChanged`]. Notifications are neither
//! interpreted nor debounced.

use crate::health::SharedMonitorStats;
use crate::monitor::signal::TerminationSignal;
use crate::monitor::supervisor::SupervisorEvent;
use crate::store::{Store, Subscription};
use crossbeam_channel::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Errors starting the watcher.
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("failed to subscribe to {pattern}: {source}")]
    SubscriptionSetupFailure {
        pattern: String,
        #[source]
        source: crate::store::StoreError,
    },
    #[error("failed to spawn watcher thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A running roster watcher thread.
#[derive(Debug)]
pub struct RosterWatcher {
    signal: TerminationSignal,
    handle: Option<JoinHandle<()>>,
}

impl RosterWatcher {
    /// Subscribe to `pattern` and start forwarding notifications.
    ///
    /// The subscription is established before this returns, so a failure
    /// to subscribe is reported here rather than inside the thread.
    pub fn spawn<S: Store>(
        store: &S,
        pattern: &str,
        poll_timeout: Duration,
        signal: TerminationSignal,
        events: Sender<SupervisorEvent>,
        stats: SharedMonitorStats,
    ) -> Result<Self, WatcherError> {
        let subscription = store.subscribe_pattern(pattern).map_err(|source| {
            WatcherError::SubscriptionSetupFailure {
                pattern: pattern.to_string(),
                source,
            }
        })?;
        tracing::info!(pattern, "watching roster");

        let thread_signal = signal.clone();
        let handle = thread::Builder::new()
            .name("roster-watcher".to_string())
            .spawn(move || watch(subscription, poll_timeout, thread_signal, events, stats))?;

        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Whether the watcher thread is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Raise the watcher's signal and wait for the thread to exit.
    pub fn stop(&mut self) {
        self.signal.raise();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("roster watcher panicked");
            }
        }
    }
}

impl Drop for RosterWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch<Sub: Subscription>(
    mut subscription: Sub,
    poll_timeout: Duration,
    signal: TerminationSignal,
    events: Sender<SupervisorEvent>,
    stats: SharedMonitorStats,
) {
    while !signal.is_terminating() {
        match subscription.recv_timeout(poll_timeout) {
            Ok(Some(notification)) => {
                tracing::info!(
                    channel = %notification.channel,
                    operation = %notification.payload,
                    "sensor list modified"
                );
                stats.record_roster_event();
                if events
                    .send(SupervisorEvent::RosterChanged(notification))
                    .is_err()
                {
                    tracing::debug!("supervisor gone, stopping roster watcher");
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(error = %e, "roster subscription receive failed");
                // Avoid spinning on a subscription that fails immediately.
                if signal.wait_timeout(poll_timeout) {
                    break;
                }
            }
        }
    }

    tracing::info!("exiting roster watcher");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::create_shared_stats;
    use crate::store::{MemoryStore, Notification, StoreError};
    use assert_matches::assert_matches;
    use crossbeam_channel::unbounded;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    const PATTERN: &str = "__keyspace@*__:sensors";

    #[test]
    fn test_forwards_every_notification() {
        let store = MemoryStore::new();
        let (tx, rx) = unbounded();
        let stats = create_shared_stats();
        let mut watcher = RosterWatcher::spawn(
            &store,
            PATTERN,
            Duration::from_millis(20),
            TerminationSignal::new(),
            tx,
            stats.clone(),
        )
        .unwrap();

        store.sadd("sensors", "s1");
        store.sadd("sensors", "s2");
        store.srem("sensors", "s1");
        store.hset("sensors:functions", "s2", "r:1;w:;p:x");

        for expected in ["sadd", "sadd", "srem"] {
            let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_matches!(event, SupervisorEvent::RosterChanged(n) if n.payload == expected);
        }
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        watcher.stop();
        assert!(!watcher.is_running());
        assert_eq!(stats.snapshot().roster_events, 3);
    }

    #[test]
    fn test_subscription_failure_is_surfaced() {
        let store = MemoryStore::new();
        store.set_subscriptions_enabled(false);
        let (tx, _rx) = unbounded();

        let result = RosterWatcher::spawn(
            &store,
            PATTERN,
            Duration::from_millis(20),
            TerminationSignal::new(),
            tx,
            create_shared_stats(),
        );
        assert_matches!(result, Err(WatcherError::SubscriptionSetupFailure { .. }));
    }

    #[test]
    fn test_stops_within_poll_timeout() {
        let store = MemoryStore::new();
        let (tx, _rx) = unbounded();
        let signal = TerminationSignal::new();
        let mut watcher = RosterWatcher::spawn(
            &store,
            PATTERN,
            Duration::from_millis(50),
            signal.clone(),
            tx,
            create_shared_stats(),
        )
        .unwrap();

        let start = Instant::now();
        signal.raise();
        watcher.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    /// Fails every receive without waiting.
    struct FailingSubscription {
        calls: Arc<AtomicUsize>,
    }

    impl Subscription for FailingSubscription {
        fn recv_timeout(
            &mut self,
            _timeout: Duration,
        ) -> Result<Option<Notification>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("connection reset".to_string()))
        }
    }

    #[test]
    fn test_receive_errors_back_off_until_stopped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let subscription = FailingSubscription {
            calls: calls.clone(),
        };
        let (tx, rx) = unbounded();
        let signal = TerminationSignal::new();
        let stats = create_shared_stats();

        let thread_signal = signal.clone();
        let thread_stats = stats.clone();
        let handle = thread::spawn(move || {
            watch(
                subscription,
                Duration::from_millis(20),
                thread_signal,
                tx,
                thread_stats,
            )
        });
        let mut watcher = RosterWatcher {
            signal,
            handle: Some(handle),
        };

        thread::sleep(Duration::from_millis(200));
        assert!(watcher.is_running());
        let failed = calls.load(Ordering::SeqCst);
        assert!(failed >= 1);
        // One receive per poll timeout at most
        assert!(failed <= 20, "{failed} receives in 200ms");

        let start = Instant::now();
        watcher.stop();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!watcher.is_running());
        assert!(rx.try_recv().is_err());
        assert_eq!(stats.snapshot().roster_events, 0);
    }
}
