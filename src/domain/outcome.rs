//! Session outcome types.
//!
//! How a single external agent session ended, as reported by the session
//! itself. A session that fails to report anything is an error, not an outcome.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of one agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Session ran to its natural end
    Completed,
    /// Session finished but reported an execution error
    ExecutionError,
    /// Session hit the agent's own turn limit
    MaxIterationsReached,
    /// Session hit the agent's spend limit
    BudgetExceeded,
    /// Provider usage quota is exhausted
    QuotaExceeded,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOutcome::Completed => "completed",
            SessionOutcome::ExecutionError => "execution_error",
            SessionOutcome::MaxIterationsReached => "max_iterations_reached",
            SessionOutcome::BudgetExceeded => "budget_exceeded",
            SessionOutcome::QuotaExceeded => "quota_exceeded",
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
