//! Session runner module - drives the agent loop to a terminal state.
//!
//! - SessionRunner for executing a run
//! - RunnerOptions and RetryBackoff for pacing
//! - RunResult for reporting how the run ended

mod result;
mod session_runner;

pub use result::{EXIT_FAILURE, EXIT_OK, RunResult};
pub use session_runner::{RetryBackoff, RunnerOptions, SessionRunner};
