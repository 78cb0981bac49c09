//! Presence subsystem: live connections, fan-out, status transitions and
//! deferred resets.
//!
//! One [`ConnectionRegistry`] exists per process and only knows that
//! process's connections. Status changes are broadcast locally through the
//! [`Broadcaster`]; other processes learn about changes made elsewhere via
//! the [`RelayListener`], which forwards every relay message to its own
//! local connections.

pub mod fanout;
pub mod registry;
pub mod relay_listener;
pub mod reset;
pub mod service;
pub mod state_machine;

pub use fanout::Broadcaster;
pub use registry::{ConnectionHandle, ConnectionRegistry, NewConnection, Registration, Removal};
pub use relay_listener::{relay_payload, RelayHealth, RelayListener};
pub use reset::{DeferredReset, Job, JobScheduler, ResetOutcome, StatusResetJob, TokioScheduler};
pub use service::{ManualStatus, MeetingJoin, PresenceService};
pub use state_machine::{apply_change, check_guards, PresenceManager};
