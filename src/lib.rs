//! Ledgerloop - drives autonomous agent sessions against a deliverable ledger
//!
//! Each iteration starts a fresh agent session, then re-reads the ledger and
//! decides whether the run has converged, should wait out a usage quota, or
//! goes around again.

pub mod domain;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod quota;
pub mod runner;
pub mod session;
pub mod termination;
pub mod timer;

pub use error::{LedgerLoopError, Result};
