//! Loop progress state and exit reasons
//!
//! `LoopState` is a plain value: every transformation consumes the old state and
//! returns the next one. The driver owns the only copy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a run stopped. Exactly one applies per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Every achievable deliverable passed
    AllPassed,
    /// Every deliverable is blocked
    AllBlocked,
    /// Every active deliverable was re-checked in verify mode
    AllVerified,
    /// Iteration budget exhausted
    MaxIterations,
    /// Provider quota exhausted and not waited out
    QuotaExceeded,
    /// Cancelled by the host (e.g. Ctrl-C)
    Interrupted,
    /// Too many consecutive session failures
    MaxRetriesExceeded,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::AllPassed => "all_passed",
            ExitReason::AllBlocked => "all_blocked",
            ExitReason::AllVerified => "all_verified",
            ExitReason::MaxIterations => "max_iterations",
            ExitReason::QuotaExceeded => "quota_exceeded",
            ExitReason::Interrupted => "interrupted",
            ExitReason::MaxRetriesExceeded => "max_retries_exceeded",
        }
    }

    /// Returns true if the host should report a failing exit status
    pub fn is_failure(&self) -> bool {
        matches!(self, ExitReason::MaxRetriesExceeded | ExitReason::QuotaExceeded)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot of loop progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopState {
    /// Agent sessions actually started
    pub iterations: u32,
    /// Accumulated spend, never decreases
    pub total_cost_usd: f64,
    /// Failures since the last successful session
    pub consecutive_errors: u32,
    /// Message of the most recent session failure
    pub last_error: Option<String>,
    /// Set once, at the single exit point
    pub exit_reason: Option<ExitReason>,
    pub deliverables_passed_count: u32,
    pub deliverables_total_count: u32,
    pub blocked_count: u32,
}

impl LoopState {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn increment_iterations(self) -> Self {
        Self {
            iterations: self.iterations + 1,
            ..self
        }
    }

    /// Refund one iteration. Floored at zero.
    #[must_use]
    pub fn decrement_iterations(self) -> Self {
        Self {
            iterations: self.iterations.saturating_sub(1),
            ..self
        }
    }

    /// Add session spend. Negative or non-finite amounts are ignored so the
    /// total stays non-decreasing.
    #[must_use]
    pub fn add_cost(self, cost_usd: f64) -> Self {
        let delta = if cost_usd.is_finite() && cost_usd > 0.0 {
            cost_usd
        } else {
            0.0
        };
        Self {
            total_cost_usd: self.total_cost_usd + delta,
            ..self
        }
    }

    #[must_use]
    pub fn record_error(self, error: impl fmt::Display) -> Self {
        Self {
            consecutive_errors: self.consecutive_errors + 1,
            last_error: Some(error.to_string()),
            ..self
        }
    }

    #[must_use]
    pub fn reset_errors(self) -> Self {
        Self {
            consecutive_errors: 0,
            ..self
        }
    }

    #[must_use]
    pub fn set_exit_reason(self, reason: ExitReason) -> Self {
        Self {
            exit_reason: Some(reason),
            ..self
        }
    }

    #[must_use]
    pub fn update_deliverable_counts(self, passed: u32, total: u32, blocked: u32) -> Self {
        Self {
            deliverables_passed_count: passed,
            deliverables_total_count: total,
            blocked_count: blocked,
            ..self
        }
    }

    /// Returns true once an exit reason has been recorded
    pub fn is_terminated(&self) -> bool {
        self.exit_reason.is_some()
    }
}
