//! Concurrent activity monitoring.
//!
//! A [`MonitorSupervisor`] runs one [`ActivityPoller`] thread per roster
//! chunk and a [`RosterWatcher`] thread that reports roster changes. All
//! threads stop through a shared [`TerminationSignal`].

pub mod poller;
pub mod report;
pub mod signal;
pub mod supervisor;
pub mod watcher;

// Re-export commonly used types
pub use poller::{poll_sensor, ActivityPoller, CycleOutcome, PollError, PollerConfig};
pub use report::{parse_timestamp, ActivityReport};
pub use signal::TerminationSignal;
pub use supervisor::{
    MonitorSupervisor, SupervisorConfig, SupervisorError, SupervisorEvent, SupervisorState,
};
pub use watcher::{RosterWatcher, WatcherError};
