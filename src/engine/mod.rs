//! Worker engine: the claim, fetch, resolve loop and its lifecycle.

pub mod worker;

pub use worker::{RunOutcome, RunStats, Worker, WorkerConfig};

/// Exit code for an unrecoverable error (store down, bad config).
pub const EXIT_FATAL: i32 = 1;

/// Exit code asking the supervisor for a relaunch on a new identity.
pub const EXIT_RESTART: i32 = 2;
