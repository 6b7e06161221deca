//! Ralph - a file-based control protocol for long-running iteration loops
//!
//! A runner executes PLANNING -> EXECUTING -> TESTING -> COMMITTING cycles and
//! talks to its observers only through a shared control directory: an
//! append-only telemetry log, a PID liveness record, and pause/inject/stop
//! signals polled between iterations.

pub mod control;
pub mod dashboard;
pub mod error;
pub mod liveness;
pub mod loop_config;
pub mod runner;
pub mod telemetry;

pub use error::{RalphError, Result};
