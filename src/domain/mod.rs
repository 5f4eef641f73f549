//! Domain types for ledgerloop
//!
//! This module contains the loop's core value types:
//! - LoopState: Progress snapshot folded after every session
//! - ExitReason: Why a run stopped
//! - SessionOutcome: How a single agent session ended

pub mod loop_state;
pub mod outcome;

pub use loop_state::{ExitReason, LoopState};
pub use outcome::SessionOutcome;
