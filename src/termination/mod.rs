//! Termination policy.
//!
//! `evaluate` turns the current loop state plus the latest observation into a
//! single decision. Rules are checked in a fixed priority order and the first
//! match wins:
//!
//! 1. cancellation
//! 2. quota exhaustion (terminate or wait for the reset)
//! 3. convergence (all passed, or all verified in verify mode)
//! 4. total blockage
//! 5. iteration budget
//! 6. retry budget

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::domain::{ExitReason, LoopState, SessionOutcome};
use crate::ledger::{DeliverableLedger, VerificationTracker};
use crate::quota::wait_duration_from;

/// Budgets that bound a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationOptions {
    /// Stop once this many sessions have been started
    pub max_iterations: Option<u32>,
    /// Consecutive session failures tolerated before giving up
    pub max_retries: u32,
    /// Sleep until a quota reset instead of stopping
    pub wait_for_quota: bool,
}

impl Default for TerminationOptions {
    fn default() -> Self {
        Self {
            max_iterations: None,
            max_retries: 3,
            wait_for_quota: false,
        }
    }
}

/// What the runner should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationDecision {
    Terminate { reason: ExitReason },
    /// Sleep, then retry the same iteration
    Wait { duration: Duration },
    Continue,
}

impl TerminationDecision {
    pub fn terminate(reason: ExitReason) -> Self {
        TerminationDecision::Terminate { reason }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TerminationDecision::Terminate { .. })
    }
}

/// Input to a single evaluation.
#[derive(Debug, Clone)]
pub struct TerminationContext<'a> {
    pub state: &'a LoopState,
    pub options: &'a TerminationOptions,
    pub session_outcome: Option<SessionOutcome>,
    pub quota_reset_time: Option<DateTime<Utc>>,
    pub ledger: Option<&'a DeliverableLedger>,
    pub cancel: Option<&'a CancellationToken>,
    pub sync_mode: bool,
    pub verification: Option<&'a VerificationTracker>,
    /// Instant used for quota wait arithmetic
    pub now: DateTime<Utc>,
}

impl<'a> TerminationContext<'a> {
    /// Base context: state, budgets and cancellation. Session outcome, ledger
    /// and verification are layered on with the `with_*` builders.
    pub fn new(state: &'a LoopState, options: &'a TerminationOptions, cancel: &'a CancellationToken) -> Self {
        Self {
            state,
            options,
            session_outcome: None,
            quota_reset_time: None,
            ledger: None,
            cancel: Some(cancel),
            sync_mode: false,
            verification: None,
            now: Utc::now(),
        }
    }

    /// Cancellation-only check, used before a session starts and after a
    /// failed session.
    pub fn pre_session(
        state: &'a LoopState,
        options: &'a TerminationOptions,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self::new(state, options, cancel)
    }

    pub fn with_outcome(mut self, outcome: SessionOutcome, quota_reset_time: Option<DateTime<Utc>>) -> Self {
        self.session_outcome = Some(outcome);
        self.quota_reset_time = quota_reset_time;
        self
    }

    pub fn with_ledger(mut self, ledger: Option<&'a DeliverableLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_verification(mut self, verification: Option<&'a VerificationTracker>) -> Self {
        self.sync_mode = true;
        self.verification = verification;
        self
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

/// Decide whether the loop terminates, waits, or continues.
pub fn evaluate(ctx: &TerminationContext<'_>) -> TerminationDecision {
    if ctx.cancel.is_some_and(CancellationToken::is_cancelled) {
        return TerminationDecision::terminate(ExitReason::Interrupted);
    }

    if ctx.session_outcome == Some(SessionOutcome::QuotaExceeded) {
        return match ctx.quota_reset_time {
            Some(reset) if ctx.options.wait_for_quota => TerminationDecision::Wait {
                duration: wait_duration_from(reset, ctx.now),
            },
            _ => TerminationDecision::terminate(ExitReason::QuotaExceeded),
        };
    }

    if ctx.sync_mode {
        if let Some(tracker) = ctx.verification {
            if tracker.total_count() > 0 && tracker.all_verified() {
                return TerminationDecision::terminate(ExitReason::AllVerified);
            }
        }
    } else if ctx.ledger.is_some_and(DeliverableLedger::all_achievable_passed) {
        return TerminationDecision::terminate(ExitReason::AllPassed);
    }

    if ctx.ledger.is_some_and(DeliverableLedger::all_blocked) {
        return TerminationDecision::terminate(ExitReason::AllBlocked);
    }

    if let Some(max) = ctx.options.max_iterations {
        if ctx.state.iterations >= max {
            return TerminationDecision::terminate(ExitReason::MaxIterations);
        }
    }

    if ctx.state.consecutive_errors > ctx.options.max_retries {
        return TerminationDecision::terminate(ExitReason::MaxRetriesExceeded);
    }

    TerminationDecision::Continue
}
