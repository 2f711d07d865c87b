//! Broadcast termination signal.
//!
//! A signal starts out running and can be raised exactly once. Raising it
//! drops the only sender of an otherwise unused channel, which wakes every
//! thread blocked in [`TerminationSignal::wait_timeout`] at once.

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug)]
struct Inner {
    raised: AtomicBool,
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl Inner {
    fn new() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            raised: AtomicBool::new(false),
            sender: Mutex::new(Some(sender)),
            receiver,
        }
    }

    fn raise(&self) -> bool {
        if self.raised.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        true
    }
}

/// Cloneable handle to a one-way running/terminating flag.
///
/// A signal created with [`TerminationSignal::child`] also observes its
/// parent, so raising the parent terminates every child while raising a
/// child leaves the parent running.
#[derive(Debug, Clone)]
pub struct TerminationSignal {
    own: Arc<Inner>,
    parent: Option<Arc<Inner>>,
}

impl Default for TerminationSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminationSignal {
    /// Create a signal in the running state.
    pub fn new() -> Self {
        Self {
            own: Arc::new(Inner::new()),
            parent: None,
        }
    }

    /// Create a signal that is also raised when `self` is raised.
    pub fn child(&self) -> Self {
        Self {
            own: Arc::new(Inner::new()),
            parent: Some(self.own.clone()),
        }
    }

    /// Move to the terminating state.
    ///
    /// Returns `true` if this call raised the signal, `false` if it was
    /// already raised.
    pub fn raise(&self) -> bool {
        self.own.raise()
    }

    /// Whether this signal (or its parent) has been raised.
    pub fn is_terminating(&self) -> bool {
        self.own.raised.load(Ordering::SeqCst)
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.raised.load(Ordering::SeqCst))
    }

    /// Block for up to `timeout`, returning early once the signal is raised.
    ///
    /// Returns `true` if the signal is raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_terminating() {
            return true;
        }

        match &self.parent {
            None => matches!(
                self.own.receiver.recv_timeout(timeout),
                Err(RecvTimeoutError::Disconnected)
            ),
            Some(parent) => select! {
                recv(self.own.receiver) -> _ => true,
                recv(parent.receiver) -> _ => true,
                default(timeout) => self.is_terminating(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_raise_is_one_way_and_idempotent() {
        let signal = TerminationSignal::new();
        assert!(!signal.is_terminating());
        assert!(signal.raise());
        assert!(signal.is_terminating());
        assert!(!signal.raise());
        assert!(signal.is_terminating());
    }

    #[test]
    fn test_wait_times_out_while_running() {
        let signal = TerminationSignal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_raise_interrupts_wait() {
        let signal = TerminationSignal::new();
        let waiter = signal.clone();

        let handle = thread::spawn(move || {
            let start = Instant::now();
            let raised = waiter.wait_timeout(Duration::from_secs(30));
            (raised, start.elapsed())
        });

        thread::sleep(Duration::from_millis(20));
        signal.raise();

        let (raised, elapsed) = handle.join().unwrap();
        assert!(raised);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_parent_terminates_child() {
        let parent = TerminationSignal::new();
        let child = parent.child();
        let waiter = child.clone();

        let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)));
        thread::sleep(Duration::from_millis(20));
        parent.raise();

        assert!(handle.join().unwrap());
        assert!(child.is_terminating());
    }

    #[test]
    fn test_child_does_not_terminate_parent() {
        let parent = TerminationSignal::new();
        let child = parent.child();
        child.raise();

        assert!(child.is_terminating());
        assert!(!parent.is_terminating());
        assert!(child.wait_timeout(Duration::from_secs(30)));
    }
}
