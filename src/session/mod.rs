//! Agent session boundary.
//!
//! The runner creates one `AgentSession` per iteration through a
//! `SessionFactory` and runs it to completion. Sessions are never reused, so
//! whatever a session holds (child processes, connections) is released when
//! the iteration ends.

mod command;
mod instructions;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::SessionOutcome;
use crate::error::Result;
use crate::ledger::SharedVerificationTracker;

pub use command::{AgentCommand, CommandSessionFactory, StreamObserver};
pub use instructions::{DefaultInstructionSelector, InstructionSelector, Instructions, RunMode};

/// What a finished session reports back to the runner.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    pub cost_usd: f64,
    /// Only meaningful for `QuotaExceeded`
    pub quota_reset_time: Option<DateTime<Utc>>,
}

impl SessionReport {
    pub fn new(outcome: SessionOutcome, cost_usd: f64) -> Self {
        Self {
            outcome,
            cost_usd,
            quota_reset_time: None,
        }
    }

    pub fn completed(cost_usd: f64) -> Self {
        Self::new(SessionOutcome::Completed, cost_usd)
    }

    pub fn quota_exceeded(cost_usd: f64, reset: Option<DateTime<Utc>>) -> Self {
        Self {
            outcome: SessionOutcome::QuotaExceeded,
            cost_usd,
            quota_reset_time: reset,
        }
    }
}

/// Per-iteration data handed to a running session.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    /// 1-based iteration number
    pub iteration: u32,
    /// Present in verify runs; sessions mark re-checked deliverables here
    pub verification: Option<SharedVerificationTracker>,
}

/// A single agent invocation.
#[async_trait]
pub trait AgentSession: Send {
    /// Consume the agent's event stream until it ends.
    async fn run(&mut self, instruction: &str, ctx: &SessionContext) -> Result<SessionReport>;
}

/// Builds a fresh session for each iteration.
pub trait SessionFactory: Send + Sync {
    fn create(&self, instruction_name: &str) -> Result<Box<dyn AgentSession>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_report_constructors() {
        let report = SessionReport::completed(0.5);
        assert_eq!(report.outcome, SessionOutcome::Completed);
        assert_eq!(report.cost_usd, 0.5);
        assert!(report.quota_reset_time.is_none());

        let reset = Utc::now();
        let report = SessionReport::quota_exceeded(0.1, Some(reset));
        assert_eq!(report.outcome, SessionOutcome::QuotaExceeded);
        assert_eq!(report.quota_reset_time, Some(reset));
    }

    #[test]
    fn test_session_context_default() {
        let ctx = SessionContext::default();
        assert_eq!(ctx.iteration, 0);
        assert!(ctx.verification.is_none());
    }
}
