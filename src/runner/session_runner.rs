//! Session runner - drives agent sessions until the ledger converges.
//!
//! Each iteration:
//! 1. Check for cancellation and exhausted budgets
//! 2. Select an instruction and start a FRESH session
//! 3. Fold the session's outcome and cost into `LoopState`
//! 4. Re-read the ledger and evaluate the termination policy
//! 5. Stop, wait for a quota reset, or pause and go again

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::result::{RunResult, to_u32};
use crate::domain::{ExitReason, LoopState};
use crate::error::LedgerLoopError;
use crate::ledger::{DeliverableLedger, LedgerRepository, SharedVerificationTracker, VerificationTracker};
use crate::logging::{LogLogger, Logger};
use crate::session::{
    DefaultInstructionSelector, InstructionSelector, Instructions, RunMode, SessionContext, SessionFactory,
    SessionReport,
};
use crate::termination::{TerminationContext, TerminationDecision, TerminationOptions, evaluate};
use crate::timer::{Timer, TokioTimer};

/// How long to pause after a failed session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryBackoff {
    /// Same pause as between successful sessions
    #[default]
    Fixed,
    /// Double the pause per consecutive failure, capped at `max`
    Exponential { max: Duration },
}

impl RetryBackoff {
    pub fn delay(&self, base: Duration, consecutive_errors: u32) -> Duration {
        match self {
            RetryBackoff::Fixed => base,
            RetryBackoff::Exponential { max } => {
                let exponent = consecutive_errors.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << exponent).min(*max)
            }
        }
    }
}

/// Configuration for the SessionRunner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerOptions {
    pub mode: RunMode,
    pub termination: TerminationOptions,
    /// Pause between sessions; zero skips the pause entirely
    pub delay_between_sessions: Duration,
    pub retry_backoff: RetryBackoff,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::Run,
            termination: TerminationOptions::default(),
            delay_between_sessions: Duration::from_secs(5),
            retry_backoff: RetryBackoff::Fixed,
        }
    }
}

enum SessionAttempt {
    Finished(SessionReport),
    Failed(LedgerLoopError),
    Cancelled,
}

/// Drives the invoke → observe → decide loop.
pub struct SessionRunner {
    factory: Arc<dyn SessionFactory>,
    selector: Arc<dyn InstructionSelector>,
    instructions: Instructions,
    ledger: Option<Arc<dyn LedgerRepository>>,
    timer: Arc<dyn Timer>,
    logger: Arc<dyn Logger>,
    cancel: CancellationToken,
    options: RunnerOptions,
}

impl SessionRunner {
    /// Create a runner with default options, tokio timer and `log` output.
    pub fn new(factory: Arc<dyn SessionFactory>, cancel: CancellationToken) -> Self {
        Self::with_options(factory, cancel, RunnerOptions::default())
    }

    pub fn with_options(factory: Arc<dyn SessionFactory>, cancel: CancellationToken, options: RunnerOptions) -> Self {
        Self {
            factory,
            selector: Arc::new(DefaultInstructionSelector::new(options.mode)),
            instructions: Instructions::default(),
            ledger: None,
            timer: Arc::new(TokioTimer),
            logger: Arc::new(LogLogger::default()),
            cancel,
            options,
        }
    }

    pub fn ledger(mut self, ledger: Arc<dyn LedgerRepository>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn selector(mut self, selector: Arc<dyn InstructionSelector>) -> Self {
        self.selector = selector;
        self
    }

    pub fn instructions(mut self, instructions: Instructions) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Run until a termination rule fires.
    pub async fn run(&self) -> RunResult {
        let started = Instant::now();
        let verification = self
            .options
            .mode
            .is_sync()
            .then(|| self.build_verification_tracker().into_shared());

        self.logger.info(&format!(
            "Session loop started: mode={:?}, max_iterations={}, max_retries={}, wait_for_quota={}",
            self.options.mode,
            self.options
                .termination
                .max_iterations
                .map_or_else(|| "unlimited".to_string(), |n| n.to_string()),
            self.options.termination.max_retries,
            self.options.termination.wait_for_quota
        ));

        let mut state = LoopState::new();
        let reason = loop {
            if let TerminationDecision::Terminate { reason } = self.pre_check(&state) {
                break reason;
            }

            let ledger_exists = self.ledger.as_ref().is_some_and(|l| l.exists());
            let instruction = self.selector.select(state.iterations, ledger_exists);
            state = state.increment_iterations();
            let iteration = state.iterations;
            let session_started = Instant::now();

            let report = match self.execute(&instruction, iteration, verification.as_ref()).await {
                SessionAttempt::Finished(report) => report,
                SessionAttempt::Cancelled => {
                    self.logger.debug(&format!("Session {} cancelled", iteration));
                    continue;
                }
                SessionAttempt::Failed(err) => {
                    state = state.record_error(&err);
                    if let TerminationDecision::Terminate { reason } = self.pre_check(&state) {
                        if reason == ExitReason::MaxRetriesExceeded {
                            self.logger.error(&format!(
                                "Session {} failed, no retries left: {}",
                                iteration, err
                            ));
                        }
                        break reason;
                    }
                    let delay = self
                        .options
                        .retry_backoff
                        .delay(self.options.delay_between_sessions, state.consecutive_errors);
                    self.logger.warn(&format!(
                        "Session {} failed (attempt {}/{}), retrying in {:.1}s: {}",
                        iteration,
                        state.consecutive_errors,
                        self.options.termination.max_retries + 1,
                        delay.as_secs_f64(),
                        err
                    ));
                    self.pause(delay).await;
                    continue;
                }
            };

            state = state.reset_errors().add_cost(report.cost_usd);
            self.logger.info(&format!(
                "Session {} ({}) finished: outcome={}, cost=${:.4}, duration={:.1}s",
                iteration,
                instruction,
                report.outcome,
                report.cost_usd,
                session_started.elapsed().as_secs_f64()
            ));

            let ledger = self.load_ledger();
            if let Some(ledger) = &ledger {
                state = state.update_deliverable_counts(
                    to_u32(ledger.count_passed()),
                    to_u32(ledger.len()),
                    to_u32(ledger.count_blocked()),
                );
            }

            let tracker = snapshot(verification.as_ref());
            let mut ctx = TerminationContext::new(&state, &self.options.termination, &self.cancel)
                .with_outcome(report.outcome, report.quota_reset_time)
                .with_ledger(ledger.as_ref());
            if self.options.mode.is_sync() {
                ctx = ctx.with_verification(tracker.as_ref());
            }

            match evaluate(&ctx) {
                TerminationDecision::Terminate { reason } => break reason,
                TerminationDecision::Wait { duration } => {
                    self.logger.info(&format!(
                        "Quota exceeded, waiting {:.0}s for reset before retrying session {}",
                        duration.as_secs_f64(),
                        iteration
                    ));
                    // A cancelled wait is picked up by the next pre-check.
                    let _ = self.timer.delay(duration, &self.cancel).await;
                    state = state.decrement_iterations();
                }
                TerminationDecision::Continue => self.pause(self.options.delay_between_sessions).await,
            }
        };

        let state = state.set_exit_reason(reason);
        let result = RunResult::from_state(
            &state,
            reason,
            snapshot(verification.as_ref()).as_ref(),
            started.elapsed(),
        );
        self.logger.info(&result.summary());
        result
    }

    fn pre_check(&self, state: &LoopState) -> TerminationDecision {
        evaluate(&TerminationContext::pre_session(
            state,
            &self.options.termination,
            &self.cancel,
        ))
    }

    async fn execute(
        &self,
        instruction: &str,
        iteration: u32,
        verification: Option<&SharedVerificationTracker>,
    ) -> SessionAttempt {
        let text = match self.instructions.resolve(instruction) {
            Ok(text) => text,
            Err(e) => return SessionAttempt::Failed(e),
        };
        let mut session = match self.factory.create(instruction) {
            Ok(session) => session,
            Err(e) => return SessionAttempt::Failed(e),
        };
        let ctx = SessionContext {
            iteration,
            verification: verification.cloned(),
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => SessionAttempt::Cancelled,
            result = session.run(text, &ctx) => match result {
                Ok(report) => SessionAttempt::Finished(report),
                Err(e) => SessionAttempt::Failed(e),
            },
        }
    }

    /// Sleep between sessions; cancellation ends the sleep early.
    async fn pause(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let _ = self.timer.delay(duration, &self.cancel).await;
    }

    /// Current ledger snapshot. An empty ledger stands in when there is no
    /// repository or nothing has been written yet; `None` means the read failed.
    fn load_ledger(&self) -> Option<DeliverableLedger> {
        let Some(repo) = &self.ledger else {
            return Some(DeliverableLedger::empty());
        };
        if !repo.exists() {
            return Some(DeliverableLedger::empty());
        }
        match repo.load() {
            Ok(ledger) => Some(ledger),
            Err(e) => {
                self.logger
                    .warn(&format!("Failed to load ledger, skipping ledger checks this iteration: {}", e));
                None
            }
        }
    }

    fn build_verification_tracker(&self) -> VerificationTracker {
        match self.ledger.as_ref().filter(|repo| repo.exists()).map(|repo| repo.load()) {
            Some(Ok(ledger)) => VerificationTracker::from_ledger(&ledger),
            Some(Err(e)) => {
                self.logger
                    .warn(&format!("Failed to load ledger for verification, tracking nothing: {}", e));
                VerificationTracker::default()
            }
            None => VerificationTracker::default(),
        }
    }
}

fn snapshot(tracker: Option<&SharedVerificationTracker>) -> Option<VerificationTracker> {
    tracker.and_then(|t| t.lock().ok().map(|guard| guard.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SessionOutcome;
    use crate::error::Result;
    use crate::ledger::{Deliverable, InMemoryLedgerRepository};
    use crate::logging::MemoryLogger;
    use crate::session::AgentSession;
    use crate::timer::RecordingTimer;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// What a scripted session does when run.
    #[derive(Debug, Clone)]
    enum Step {
        Report(SessionReport),
        Fail(String),
        Verify(Vec<&'static str>),
        Hang,
    }

    /// Factory that hands out sessions following a script, then completes.
    struct ScriptedFactory {
        steps: Mutex<VecDeque<Step>>,
        fallback: Step,
        created: Mutex<Vec<String>>,
    }

    impl ScriptedFactory {
        fn new(steps: Vec<Step>) -> Self {
            Self::with_fallback(steps, Step::Report(SessionReport::completed(0.0)))
        }

        fn with_fallback(steps: Vec<Step>, fallback: Step) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                fallback,
                created: Mutex::new(Vec::new()),
            }
        }

        fn created(&self) -> Vec<String> {
            self.created.lock().unwrap().clone()
        }
    }

    impl SessionFactory for ScriptedFactory {
        fn create(&self, instruction_name: &str) -> Result<Box<dyn AgentSession>> {
            self.created.lock().unwrap().push(instruction_name.to_string());
            let step = self.steps.lock().unwrap().pop_front().unwrap_or_else(|| self.fallback.clone());
            Ok(Box::new(ScriptedSession { step }))
        }
    }

    struct ScriptedSession {
        step: Step,
    }

    #[async_trait]
    impl AgentSession for ScriptedSession {
        async fn run(&mut self, _instruction: &str, ctx: &SessionContext) -> Result<SessionReport> {
            match &self.step {
                Step::Report(report) => Ok(report.clone()),
                Step::Fail(message) => Err(LedgerLoopError::Session(message.clone())),
                Step::Verify(ids) => {
                    if let Some(tracker) = &ctx.verification {
                        let mut tracker = tracker.lock().unwrap();
                        for id in ids {
                            tracker.verify(id);
                        }
                    }
                    Ok(SessionReport::completed(0.01))
                }
                Step::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(SessionReport::completed(0.0))
                }
            }
        }
    }

    /// Factory whose every session fails, counting attempts.
    struct FailingFactory {
        attempts: AtomicU32,
    }

    impl SessionFactory for FailingFactory {
        fn create(&self, _instruction_name: &str) -> Result<Box<dyn AgentSession>> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Box::new(ScriptedSession {
                step: Step::Fail(format!("agent crashed on attempt {}", attempt)),
            }))
        }
    }

    /// Repository whose file exists but cannot be parsed.
    struct CorruptLedger;

    impl LedgerRepository for CorruptLedger {
        fn exists(&self) -> bool {
            true
        }

        fn load(&self) -> Result<DeliverableLedger> {
            Err(LedgerLoopError::Storage("truncated write".to_string()))
        }
    }

    fn deliverable(id: &str) -> Deliverable {
        Deliverable::new(id, "work", vec!["done".to_string()]).unwrap()
    }

    fn repo(deliverables: Vec<Deliverable>) -> Arc<InMemoryLedgerRepository> {
        Arc::new(InMemoryLedgerRepository::with_ledger(
            DeliverableLedger::new(deliverables).unwrap(),
        ))
    }

    fn options(max_iterations: Option<u32>, max_retries: u32, wait_for_quota: bool) -> RunnerOptions {
        RunnerOptions {
            mode: RunMode::Run,
            termination: TerminationOptions {
                max_iterations,
                max_retries,
                wait_for_quota,
            },
            delay_between_sessions: Duration::ZERO,
            retry_backoff: RetryBackoff::Fixed,
        }
    }

    fn runner(factory: Arc<dyn SessionFactory>, options: RunnerOptions) -> (SessionRunner, Arc<MemoryLogger>) {
        let logger = Arc::new(MemoryLogger::new());
        let runner = SessionRunner::with_options(factory, CancellationToken::new(), options)
            .timer(Arc::new(RecordingTimer::new()))
            .logger(logger.clone());
        (runner, logger)
    }

    #[test]
    fn test_retry_backoff_fixed() {
        let base = Duration::from_secs(2);
        assert_eq!(RetryBackoff::Fixed.delay(base, 1), base);
        assert_eq!(RetryBackoff::Fixed.delay(base, 9), base);
    }

    #[test]
    fn test_retry_backoff_exponential_is_capped() {
        let backoff = RetryBackoff::Exponential {
            max: Duration::from_secs(10),
        };
        let base = Duration::from_secs(1);
        assert_eq!(backoff.delay(base, 1), Duration::from_secs(1));
        assert_eq!(backoff.delay(base, 2), Duration::from_secs(2));
        assert_eq!(backoff.delay(base, 3), Duration::from_secs(4));
        assert_eq!(backoff.delay(base, 5), Duration::from_secs(10));
        assert_eq!(backoff.delay(base, 200), Duration::from_secs(10));
    }

    #[test]
    fn test_runner_options_default() {
        let options = RunnerOptions::default();
        assert_eq!(options.mode, RunMode::Run);
        assert_eq!(options.delay_between_sessions, Duration::from_secs(5));
        assert_eq!(options.termination.max_retries, 3);
        assert!(options.termination.max_iterations.is_none());
    }

    #[tokio::test]
    async fn test_iterations_counted_until_budget() {
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let (runner, logger) = runner(factory.clone(), options(Some(3), 3, false));
        let runner = runner.ledger(repo(vec![deliverable("a")]));

        let result = runner.run().await;

        assert_eq!(result.exit_reason, ExitReason::MaxIterations);
        assert_eq!(result.iterations, 3);
        assert_eq!(factory.created().len(), 3);
        assert_eq!(result.deliverables_total_count, 1);
        assert_eq!(result.deliverables_passed_count, 0);
        assert_eq!(logger.messages_at(log::Level::Info).iter().filter(|m| m.starts_with("Run finished")).count(), 1);
        assert!(logger.contains("Session loop started"));
    }

    #[tokio::test]
    async fn test_all_passed_stops_loop() {
        let factory = Arc::new(ScriptedFactory::new(vec![Step::Report(SessionReport::completed(0.5))]));
        let (runner, _) = runner(factory.clone(), options(Some(10), 3, false));
        let runner = runner.ledger(repo(vec![deliverable("a").mark_passed(), deliverable("b").mark_blocked()]));

        let result = runner.run().await;

        assert_eq!(result.exit_reason, ExitReason::AllPassed);
        assert_eq!(result.iterations, 1);
        assert_eq!(result.total_cost_usd, 0.5);
        assert_eq!(result.deliverables_passed_count, 1);
        assert_eq!(result.blocked_count, 1);
        assert_eq!(result.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_all_blocked_stops_loop() {
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let (runner, _) = runner(factory, options(None, 3, false));
        let runner = runner.ledger(repo(vec![deliverable("a").mark_blocked()]));

        let result = runner.run().await;
        assert_eq!(result.exit_reason, ExitReason::AllBlocked);
        assert_eq!(result.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_makes_four_attempts() {
        let factory = Arc::new(FailingFactory {
            attempts: AtomicU32::new(0),
        });
        let (runner, logger) = runner(factory.clone(), options(None, 3, false));

        let result = runner.run().await;

        assert_eq!(factory.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(result.exit_reason, ExitReason::MaxRetriesExceeded);
        assert_eq!(result.iterations, 4);
        assert_eq!(result.error.as_deref(), Some("Session error: agent crashed on attempt 4"));
        assert_eq!(result.exit_code(), 1);
        assert_eq!(logger.messages_at(log::Level::Warn).len(), 3);
    }

    #[tokio::test]
    async fn test_success_resets_error_streak() {
        let factory = Arc::new(ScriptedFactory::new(vec![
            Step::Fail("one".into()),
            Step::Report(SessionReport::completed(0.0)),
            Step::Fail("two".into()),
            Step::Report(SessionReport::completed(0.0)),
        ]));
        let (runner, _) = runner(factory.clone(), options(Some(4), 1, false));

        let result = runner.run().await;

        assert_eq!(result.exit_reason, ExitReason::MaxIterations);
        assert_eq!(result.iterations, 4);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_failures_consume_iteration_budget() {
        let factory = Arc::new(FailingFactory {
            attempts: AtomicU32::new(0),
        });
        let (runner, _) = runner(factory.clone(), options(Some(2), 10, false));

        let result = runner.run().await;

        assert_eq!(result.exit_reason, ExitReason::MaxIterations);
        assert_eq!(factory.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_execution_error_outcome_is_not_retried() {
        let factory = Arc::new(ScriptedFactory::with_fallback(
            vec![],
            Step::Report(SessionReport::new(SessionOutcome::ExecutionError, 0.2)),
        ));
        let (runner, logger) = runner(factory.clone(), options(Some(3), 0, false));

        let result = runner.run().await;

        assert_eq!(result.exit_reason, ExitReason::MaxIterations);
        assert_eq!(result.iterations, 3);
        assert!((result.total_cost_usd - 0.6).abs() < 1e-9);
        assert!(logger.messages_at(log::Level::Warn).is_empty());
    }

    #[tokio::test]
    async fn test_quota_without_wait_terminates() {
        let factory = Arc::new(ScriptedFactory::new(vec![Step::Report(SessionReport::quota_exceeded(
            0.0,
            Some(Utc::now() + chrono::Duration::hours(2)),
        ))]));
        let (runner, _) = runner(factory, options(None, 3, false));

        let result = runner.run().await;
        assert!(result.quota_exceeded());
        assert_eq!(result.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_quota_wait_refunds_iteration() {
        let factory = Arc::new(ScriptedFactory::new(vec![
            Step::Report(SessionReport::quota_exceeded(0.0, Some(Utc::now() + chrono::Duration::seconds(30)))),
            Step::Report(SessionReport::completed(0.0)),
        ]));
        let timer = Arc::new(RecordingTimer::new());
        let (runner, logger) = runner(factory.clone(), options(Some(1), 3, true));
        let runner = runner
            .timer(timer.clone())
            .ledger(repo(vec![deliverable("a").mark_passed()]));

        let result = runner.run().await;

        assert_eq!(result.exit_reason, ExitReason::AllPassed);
        assert_eq!(result.iterations, 1);
        assert_eq!(factory.created().len(), 2);
        assert!(logger.contains("waiting"));
        let delays = timer.delays();
        assert_eq!(delays.len(), 1);
        assert!(delays[0] > Duration::from_secs(20) && delays[0] <= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_exponential_retry_delays() {
        let factory = Arc::new(FailingFactory {
            attempts: AtomicU32::new(0),
        });
        let timer = Arc::new(RecordingTimer::new());
        let mut opts = options(None, 3, false);
        opts.delay_between_sessions = Duration::from_secs(1);
        opts.retry_backoff = RetryBackoff::Exponential {
            max: Duration::from_secs(3),
        };
        let (runner, _) = runner(factory, opts);
        let runner = runner.timer(timer.clone());

        runner.run().await;

        assert_eq!(
            timer.delays(),
            vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(3)]
        );
    }

    #[tokio::test]
    async fn test_delay_between_sessions_used_on_continue() {
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let timer = Arc::new(RecordingTimer::new());
        let mut opts = options(Some(2), 3, false);
        opts.delay_between_sessions = Duration::from_millis(250);
        let (runner, _) = runner(factory, opts);
        let runner = runner.timer(timer.clone());

        runner.run().await;

        // Only the first session continues; the second hits the budget.
        assert_eq!(timer.delays(), vec![Duration::from_millis(250)]);
    }

    #[tokio::test]
    async fn test_initializer_then_worker() {
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let (runner, _) = runner(factory.clone(), options(Some(2), 3, false));
        let runner = runner.ledger(Arc::new(InMemoryLedgerRepository::new()));

        runner.run().await;

        assert_eq!(factory.created(), vec!["initializer".to_string(), "worker".to_string()]);
    }

    #[tokio::test]
    async fn test_pre_cancelled_starts_no_session() {
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let runner = SessionRunner::with_options(factory.clone(), cancel, options(None, 3, false))
            .logger(Arc::new(MemoryLogger::new()));

        let result = runner.run().await;

        assert!(result.interrupted());
        assert_eq!(result.iterations, 0);
        assert!(factory.created().is_empty());
        assert_eq!(result.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_session() {
        let factory = Arc::new(ScriptedFactory::new(vec![Step::Hang]));
        let cancel = CancellationToken::new();
        let runner = SessionRunner::with_options(factory, cancel.clone(), options(None, 3, false))
            .logger(Arc::new(MemoryLogger::new()));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), runner.run()).await.unwrap();
        assert!(result.interrupted());
        assert_eq!(result.iterations, 1);
    }

    #[tokio::test]
    async fn test_cancel_during_quota_wait() {
        let factory = Arc::new(ScriptedFactory::new(vec![Step::Report(SessionReport::quota_exceeded(
            0.0,
            Some(Utc::now() + chrono::Duration::hours(1)),
        ))]));
        let cancel = CancellationToken::new();
        let runner = SessionRunner::with_options(factory.clone(), cancel.clone(), options(None, 3, true))
            .logger(Arc::new(MemoryLogger::new()));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), runner.run()).await.unwrap();
        assert_eq!(result.exit_reason, ExitReason::Interrupted);
        assert_eq!(result.iterations, 0);
        assert_eq!(factory.created().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_retry_delay() {
        let factory = Arc::new(FailingFactory {
            attempts: AtomicU32::new(0),
        });
        let cancel = CancellationToken::new();
        let mut opts = options(None, 3, false);
        opts.delay_between_sessions = Duration::from_secs(3600);
        let runner = SessionRunner::with_options(factory.clone(), cancel.clone(), opts)
            .logger(Arc::new(MemoryLogger::new()));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), runner.run()).await.unwrap();
        assert!(result.interrupted());
        assert_eq!(factory.attempts.load(Ordering::SeqCst), 1);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_verify_mode_converges_on_all_verified() {
        let factory = Arc::new(ScriptedFactory::new(vec![Step::Verify(vec!["a"]), Step::Verify(vec!["b", "ghost"])]));
        let mut opts = options(Some(10), 3, false);
        opts.mode = RunMode::Verify;
        let (runner, _) = runner(factory.clone(), opts);
        let runner = runner.ledger(repo(vec![
            deliverable("a").mark_passed(),
            deliverable("b"),
            deliverable("old").mark_deprecated(Utc::now()),
        ]));

        let result = runner.run().await;

        assert_eq!(result.exit_reason, ExitReason::AllVerified);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.verified_count, Some(2));
        assert_eq!(result.verified_total_count, Some(2));
        assert_eq!(factory.created(), vec!["verifier".to_string(), "verifier".to_string()]);
    }

    #[tokio::test]
    async fn test_verify_mode_ignores_all_passed() {
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let mut opts = options(Some(2), 3, false);
        opts.mode = RunMode::Verify;
        let (runner, _) = runner(factory, opts);
        let runner = runner.ledger(repo(vec![deliverable("a").mark_passed()]));

        let result = runner.run().await;

        assert_eq!(result.exit_reason, ExitReason::MaxIterations);
        assert_eq!(result.verified_count, Some(0));
    }

    #[tokio::test]
    async fn test_unreadable_ledger_is_tolerated() {
        let factory = Arc::new(ScriptedFactory::new(vec![]));
        let (runner, logger) = runner(factory, options(Some(2), 0, false));
        let runner = runner.ledger(Arc::new(CorruptLedger));

        let result = runner.run().await;

        assert_eq!(result.exit_reason, ExitReason::MaxIterations);
        assert_eq!(result.iterations, 2);
        assert!(logger.contains("Failed to load ledger"));
    }
}
