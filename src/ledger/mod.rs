//! Deliverable ledger - the loop's convergence target.
//!
//! - Deliverable: one unit of work with acceptance criteria
//! - DeliverableLedger: the aggregate with convergence predicates
//! - VerificationTracker: per-run record of re-checked deliverables
//! - LedgerRepository: read access used by the runner

mod aggregate;
mod deliverable;
mod repository;
mod verification;

pub use aggregate::DeliverableLedger;
pub use deliverable::{Deliverable, DeliverableStatus};
pub use repository::{InMemoryLedgerRepository, JsonFileLedgerRepository, LedgerRepository};
pub use verification::{SharedVerificationTracker, VerificationTracker};
