//! The deliverable ledger aggregate and its convergence predicates.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::deliverable::Deliverable;
use crate::error::{LedgerLoopError, Result};

/// All deliverables for a project. Ids are unique; order is preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawLedger")]
pub struct DeliverableLedger {
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deliverables: Vec<Deliverable>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLedger {
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    deliverables: Vec<Deliverable>,
}

impl TryFrom<RawLedger> for DeliverableLedger {
    type Error = LedgerLoopError;

    fn try_from(raw: RawLedger) -> Result<Self> {
        Self::from_parts(raw.created_at, raw.updated_at, raw.deliverables)
    }
}

impl DeliverableLedger {
    /// Create an empty ledger stamped with the current time.
    pub fn empty() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            updated_at: now,
            deliverables: Vec::new(),
        }
    }

    /// Create a ledger from the given deliverables.
    pub fn new(deliverables: Vec<Deliverable>) -> Result<Self> {
        let now = Utc::now();
        Self::from_parts(now, now, deliverables)
    }

    /// Build a ledger, rejecting duplicate ids and invalid deliverables.
    pub fn from_parts(
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        deliverables: Vec<Deliverable>,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for deliverable in &deliverables {
            deliverable.validate()?;
            if !seen.insert(deliverable.id.as_str()) {
                return Err(LedgerLoopError::InvalidLedger(format!(
                    "duplicate deliverable id {}",
                    deliverable.id
                )));
            }
        }
        Ok(Self {
            created_at,
            updated_at,
            deliverables,
        })
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn deliverables(&self) -> &[Deliverable] {
        &self.deliverables
    }

    pub fn get(&self, id: &str) -> Option<&Deliverable> {
        self.deliverables.iter().find(|d| d.id == id)
    }

    pub fn len(&self) -> usize {
        self.deliverables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliverables.is_empty()
    }

    /// Deliverables that have not been deprecated
    pub fn active(&self) -> impl Iterator<Item = &Deliverable> {
        self.deliverables.iter().filter(|d| !d.is_deprecated())
    }

    pub fn count_passed(&self) -> usize {
        self.deliverables.iter().filter(|d| d.is_passed()).count()
    }

    pub fn count_blocked(&self) -> usize {
        self.deliverables.iter().filter(|d| d.is_blocked()).count()
    }

    /// True iff at least one deliverable is not blocked and every such
    /// deliverable has passed.
    pub fn all_achievable_passed(&self) -> bool {
        let mut achievable = self.deliverables.iter().filter(|d| !d.is_blocked()).peekable();
        achievable.peek().is_some() && achievable.all(|d| d.is_passed())
    }

    /// True iff the ledger is non-empty and every deliverable is blocked.
    pub fn all_blocked(&self) -> bool {
        !self.deliverables.is_empty() && self.deliverables.iter().all(|d| d.is_blocked())
    }

    /// Return a new ledger with the deliverable appended, or replacing the
    /// entry with the same id.
    pub fn with_deliverable(&self, deliverable: Deliverable) -> Result<Self> {
        deliverable.validate()?;
        let mut deliverables = self.deliverables.clone();
        match deliverables.iter_mut().find(|d| d.id == deliverable.id) {
            Some(existing) => *existing = deliverable,
            None => deliverables.push(deliverable),
        }
        Ok(Self {
            created_at: self.created_at,
            updated_at: Utc::now(),
            deliverables,
        })
    }

    /// Return a new ledger with `f` applied to the deliverable `id`.
    pub fn replace<F>(&self, id: &str, f: F) -> Result<Self>
    where
        F: FnOnce(Deliverable) -> Deliverable,
    {
        let current = self
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerLoopError::DeliverableNotFound(id.to_string()))?;
        let updated = f(current);
        if updated.id != id {
            return Err(LedgerLoopError::InvalidLedger(format!(
                "deliverable {} cannot be renamed to {}",
                id, updated.id
            )));
        }
        self.with_deliverable(updated)
    }
}
