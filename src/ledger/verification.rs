//! Verification tracking for verify runs.
//!
//! Tracks which ledger entries were explicitly re-checked during the current
//! run, independent of their pass/fail status.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use super::aggregate::DeliverableLedger;

/// Tracker shared between the runner and the session doing the verifying.
pub type SharedVerificationTracker = Arc<Mutex<VerificationTracker>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationTracker {
    all_ids: BTreeSet<String>,
    verified_ids: BTreeSet<String>,
}

impl VerificationTracker {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            all_ids: ids.into_iter().map(Into::into).collect(),
            verified_ids: BTreeSet::new(),
        }
    }

    /// Track every active (non-deprecated) deliverable in the ledger.
    pub fn from_ledger(ledger: &DeliverableLedger) -> Self {
        Self::new(ledger.active().map(|d| d.id.clone()))
    }

    /// Mark `id` as verified. Unknown ids are ignored and return false.
    pub fn verify(&mut self, id: &str) -> bool {
        if !self.all_ids.contains(id) {
            return false;
        }
        self.verified_ids.insert(id.to_string());
        true
    }

    pub fn is_verified(&self, id: &str) -> bool {
        self.verified_ids.contains(id)
    }

    /// Vacuously true when nothing is tracked.
    pub fn all_verified(&self) -> bool {
        self.verified_ids.len() == self.all_ids.len()
    }

    pub fn verified_count(&self) -> usize {
        self.verified_ids.len()
    }

    pub fn total_count(&self) -> usize {
        self.all_ids.len()
    }

    /// Tracked ids not yet verified, in sorted order
    pub fn unverified(&self) -> impl Iterator<Item = &str> {
        self.all_ids
            .difference(&self.verified_ids)
            .map(String::as_str)
    }

    pub fn into_shared(self) -> SharedVerificationTracker {
        Arc::new(Mutex::new(self))
    }
}
