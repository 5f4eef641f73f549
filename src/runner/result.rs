//! The value a run hands back to its caller.

use std::time::Duration;

use serde::Serialize;

use crate::domain::{ExitReason, LoopState};
use crate::ledger::VerificationTracker;

/// Process exit status for a clean stop
pub const EXIT_OK: i32 = 0;
/// Process exit status for retry exhaustion or an unwaited quota stop
pub const EXIT_FAILURE: i32 = 1;

/// Final snapshot of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub iterations: u32,
    pub deliverables_passed_count: u32,
    pub deliverables_total_count: u32,
    pub blocked_count: u32,
    /// Verify runs only
    pub verified_count: Option<u32>,
    /// Verify runs only
    pub verified_total_count: Option<u32>,
    pub total_duration: Duration,
    pub total_cost_usd: f64,
    pub exit_reason: ExitReason,
    /// Last session error, set when retries ran out
    pub error: Option<String>,
}

impl RunResult {
    /// Build from the final state and the reason the loop stopped.
    pub fn from_state(
        state: &LoopState,
        exit_reason: ExitReason,
        verification: Option<&VerificationTracker>,
        total_duration: Duration,
    ) -> Self {
        debug_assert!(
            state.exit_reason.is_none_or(|recorded| recorded == exit_reason),
            "state recorded {:?} but result reports {:?}",
            state.exit_reason,
            exit_reason
        );
        let error = match exit_reason {
            ExitReason::MaxRetriesExceeded => state.last_error.clone(),
            _ => None,
        };
        Self {
            iterations: state.iterations,
            deliverables_passed_count: state.deliverables_passed_count,
            deliverables_total_count: state.deliverables_total_count,
            blocked_count: state.blocked_count,
            verified_count: verification.map(|t| to_u32(t.verified_count())),
            verified_total_count: verification.map(|t| to_u32(t.total_count())),
            total_duration,
            total_cost_usd: state.total_cost_usd,
            exit_reason,
            error,
        }
    }

    pub fn interrupted(&self) -> bool {
        self.exit_reason == ExitReason::Interrupted
    }

    pub fn quota_exceeded(&self) -> bool {
        self.exit_reason == ExitReason::QuotaExceeded
    }

    pub fn is_error(&self) -> bool {
        self.exit_reason.is_failure()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_error() { EXIT_FAILURE } else { EXIT_OK }
    }

    /// One-line summary of the run.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "Run finished: reason={}, iterations={}, passed={}/{}, blocked={}",
            self.exit_reason,
            self.iterations,
            self.deliverables_passed_count,
            self.deliverables_total_count,
            self.blocked_count
        );
        if let (Some(verified), Some(total)) = (self.verified_count, self.verified_total_count) {
            line.push_str(&format!(", verified={}/{}", verified, total));
        }
        line.push_str(&format!(
            ", cost=${:.4}, duration={:.1}s",
            self.total_cost_usd,
            self.total_duration.as_secs_f64()
        ));
        if let Some(error) = &self.error {
            line.push_str(&format!(", error={}", error));
        }
        line
    }
}

pub(crate) fn to_u32(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
