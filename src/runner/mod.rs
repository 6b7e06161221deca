//! Runner module - the iteration state machine and the work it sequences.

pub mod loop_runner;
pub mod state;
pub mod work;

pub use loop_runner::{LoopRunner, RunOutcome, StopReason};
pub use state::RunnerState;
pub use work::{CommandWork, IterationContext, IterationWork, PhaseError, PhaseResult};
