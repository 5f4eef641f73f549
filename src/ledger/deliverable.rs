//! Deliverable record and status
//!
//! A deliverable is one verifiable unit of work. Transitions return new values;
//! nothing is mutated in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerLoopError, Result};

/// Status of a deliverable. Passed and blocked are mutually exclusive by
/// construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliverableStatus {
    /// Not yet achieved
    #[default]
    Pending,
    /// Acceptance criteria met
    Passed,
    /// Cannot be achieved in this environment
    Blocked,
}

impl DeliverableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliverableStatus::Pending => "pending",
            DeliverableStatus::Passed => "passed",
            DeliverableStatus::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for DeliverableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single verifiable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deliverable {
    pub id: String,
    pub description: String,
    /// Ordered, never empty
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub status: DeliverableStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecated_at: Option<DateTime<Utc>>,
}

impl Deliverable {
    /// Create a pending deliverable.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        acceptance_criteria: Vec<String>,
    ) -> Result<Self> {
        let deliverable = Self {
            id: id.into(),
            description: description.into(),
            acceptance_criteria,
            status: DeliverableStatus::Pending,
            deprecated_at: None,
        };
        deliverable.validate()?;
        Ok(deliverable)
    }

    /// Check field invariants.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(LedgerLoopError::InvalidLedger(
                "deliverable id must not be empty".to_string(),
            ));
        }
        if self.acceptance_criteria.is_empty() {
            return Err(LedgerLoopError::InvalidLedger(format!(
                "deliverable {} has no acceptance criteria",
                self.id
            )));
        }
        Ok(())
    }

    pub fn is_passed(&self) -> bool {
        self.status == DeliverableStatus::Passed
    }

    pub fn is_blocked(&self) -> bool {
        self.status == DeliverableStatus::Blocked
    }

    pub fn is_deprecated(&self) -> bool {
        self.deprecated_at.is_some()
    }

    #[must_use]
    pub fn mark_passed(self) -> Self {
        self.with_status(DeliverableStatus::Passed)
    }

    #[must_use]
    pub fn mark_blocked(self) -> Self {
        self.with_status(DeliverableStatus::Blocked)
    }

    /// Back to pending.
    #[must_use]
    pub fn reset(self) -> Self {
        self.with_status(DeliverableStatus::Pending)
    }

    #[must_use]
    pub fn mark_deprecated(self, at: DateTime<Utc>) -> Self {
        Self {
            deprecated_at: Some(at),
            ..self
        }
    }

    fn with_status(self, status: DeliverableStatus) -> Self {
        Self { status, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Deliverable {
        Deliverable::new(
            "d-1",
            "Parse config files",
            vec!["reads yaml".to_string(), "rejects bad keys".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_status_display() {
        assert_eq!(DeliverableStatus::Pending.to_string(), "pending");
        assert_eq!(DeliverableStatus::Blocked.to_string(), "blocked");
    }

    #[test]
    fn test_new_deliverable_is_pending() {
        let d = sample();
        assert_eq!(d.status, DeliverableStatus::Pending);
        assert!(!d.is_passed());
        assert!(!d.is_blocked());
        assert!(!d.is_deprecated());
    }

    #[test]
    fn test_new_rejects_empty_criteria() {
        let err = Deliverable::new("d-1", "desc", vec![]).unwrap_err();
        assert!(matches!(err, LedgerLoopError::InvalidLedger(_)));
    }

    #[test]
    fn test_new_rejects_blank_id() {
        assert!(Deliverable::new("  ", "desc", vec!["x".to_string()]).is_err());
    }

    #[test]
    fn test_passed_and_blocked_are_exclusive() {
        let d = sample().mark_passed();
        assert!(d.is_passed());
        assert!(!d.is_blocked());

        let d = d.mark_blocked();
        assert!(d.is_blocked());
        assert!(!d.is_passed());

        let d = d.reset();
        assert_eq!(d.status, DeliverableStatus::Pending);
    }

    #[test]
    fn test_transitions_preserve_fields() {
        let at = Utc::now();
        let original = sample().mark_deprecated(at);
        let passed = original.clone().mark_passed();

        assert_eq!(passed.id, original.id);
        assert_eq!(passed.description, original.description);
        assert_eq!(passed.acceptance_criteria, original.acceptance_criteria);
        assert_eq!(passed.deprecated_at, Some(at));
    }

    #[test]
    fn test_serde_uses_camel_case() {
        let json = serde_json::to_value(sample().mark_blocked()).unwrap();
        assert_eq!(json["acceptanceCriteria"][0], "reads yaml");
        assert_eq!(json["status"], "blocked");
        assert!(json.get("deprecatedAt").is_none());
    }
}
