//! Agent sessions backed by a child process.
//!
//! Each session spawns the configured agent command, writes the instruction to
//! its stdin and reads stdout as a JSON-lines event stream:
//! - `{"type":"result", ...}` ends the session with a cost and a subtype
//! - assistant `tool_use` blocks named `verify_deliverable` mark verifications
//! - a usage-limit notice in an error result means quota exhaustion; stray
//!   stdout or stderr notices only count when no clean result arrived

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use super::{AgentSession, SessionContext, SessionFactory, SessionReport};
use crate::domain::SessionOutcome;
use crate::error::{LedgerLoopError, Result};
use crate::ledger::SharedVerificationTracker;
use crate::quota::{is_quota_message, parse_reset_time};

const VERIFY_TOOL: &str = "verify_deliverable";
const STDERR_TAIL_CHARS: usize = 2000;

/// The agent executable and its fixed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl AgentCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Spawns a fresh agent process for every session.
#[derive(Debug, Clone)]
pub struct CommandSessionFactory {
    command: Arc<AgentCommand>,
}

impl CommandSessionFactory {
    pub fn new(command: AgentCommand) -> Self {
        Self {
            command: Arc::new(command),
        }
    }
}

impl SessionFactory for CommandSessionFactory {
    fn create(&self, instruction_name: &str) -> Result<Box<dyn AgentSession>> {
        Ok(Box::new(CommandSession {
            command: Arc::clone(&self.command),
            instruction_name: instruction_name.to_string(),
        }))
    }
}

struct CommandSession {
    command: Arc<AgentCommand>,
    instruction_name: String,
}

#[async_trait]
impl AgentSession for CommandSession {
    async fn run(&mut self, instruction: &str, ctx: &SessionContext) -> Result<SessionReport> {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .env("LEDGERLOOP_INSTRUCTION", &self.instruction_name)
            .env("LEDGERLOOP_ITERATION", ctx.iteration.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.command.working_dir {
            cmd.current_dir(dir);
        }

        tracing::debug!(
            program = %self.command.program,
            instruction = %self.instruction_name,
            iteration = ctx.iteration,
            "spawning agent"
        );
        let mut child = cmd.spawn().map_err(|e| {
            LedgerLoopError::Session(format!("failed to spawn {}: {}", self.command.program, e))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            let text = instruction.to_string();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(text.as_bytes()).await {
                    tracing::debug!(error = %e, "agent closed stdin before reading the instruction");
                }
            });
        }

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LedgerLoopError::Session("agent stdout unavailable".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut observer = StreamObserver::new();
        while let Some(line) = lines.next_line().await? {
            observer.observe_line(&line, ctx.verification.as_ref());
        }

        let status = child.wait().await?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        tracing::debug!(%status, "agent exited");

        observer.finish(status.success(), &stderr)
    }
}

/// Folds an agent's event stream into a `SessionReport`.
#[derive(Debug, Default)]
pub struct StreamObserver {
    outcome: Option<SessionOutcome>,
    cost_usd: f64,
    /// Quota notice carried by an error result event
    result_quota: Option<String>,
    /// Quota notice seen on a non-JSON stdout line
    line_quota: Option<String>,
}

impl StreamObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_line(&mut self, line: &str, verification: Option<&SharedVerificationTracker>) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(event) => self.observe_event(&event, verification),
            Err(_) => {
                if self.line_quota.is_none() && is_quota_message(line) {
                    self.line_quota = Some(line.to_string());
                }
            }
        }
    }

    /// Build the report once the process has exited.
    ///
    /// An error result carrying a quota notice wins. Stray output and stderr
    /// only count when the agent failed or never produced a result event.
    /// Otherwise the result event decides, and a failed exit with no result
    /// event is a session error.
    pub fn finish(self, exited_ok: bool, stderr: &str) -> Result<SessionReport> {
        let stray_quota = if self.outcome.is_none() || !exited_ok {
            self.line_quota
                .or_else(|| is_quota_message(stderr).then(|| stderr.to_string()))
        } else {
            None
        };
        let quota_text = self.result_quota.or(stray_quota);
        if let Some(text) = quota_text {
            return Ok(SessionReport::quota_exceeded(self.cost_usd, parse_reset_time(&text)));
        }

        match self.outcome {
            Some(outcome) => Ok(SessionReport::new(outcome, self.cost_usd)),
            None if exited_ok => Ok(SessionReport::completed(self.cost_usd)),
            None => Err(LedgerLoopError::Session(format!(
                "agent exited unsuccessfully without a result: {}",
                tail(stderr.trim(), STDERR_TAIL_CHARS)
            ))),
        }
    }

    fn observe_event(&mut self, event: &Value, verification: Option<&SharedVerificationTracker>) {
        match event.get("type").and_then(Value::as_str) {
            Some("result") => {
                if let Some(cost) = event.get("total_cost_usd").and_then(Value::as_f64) {
                    self.cost_usd = cost;
                }
                let subtype = event.get("subtype").and_then(Value::as_str);
                self.outcome = Some(outcome_for_subtype(subtype));
                let is_error = event.get("is_error").and_then(Value::as_bool).unwrap_or(false);
                if is_error || subtype != Some("success") {
                    if let Some(text) = event.get("result").and_then(Value::as_str) {
                        if is_quota_message(text) {
                            self.result_quota = Some(text.to_string());
                        }
                    }
                }
            }
            Some("assistant") => {
                let blocks = event.pointer("/message/content").and_then(Value::as_array);
                for block in blocks.into_iter().flatten() {
                    if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                        observe_tool_use(block, verification);
                    }
                }
            }
            _ => {}
        }
    }
}

fn observe_tool_use(block: &Value, verification: Option<&SharedVerificationTracker>) {
    let Some(name) = block.get("name").and_then(Value::as_str) else {
        return;
    };
    // MCP tools arrive namespaced, e.g. mcp__ledger__verify_deliverable
    if name != VERIFY_TOOL && !name.ends_with(&format!("__{}", VERIFY_TOOL)) {
        return;
    }
    let Some(id) = block.pointer("/input/id").and_then(Value::as_str) else {
        return;
    };
    if let Some(tracker) = verification {
        if let Ok(mut tracker) = tracker.lock() {
            let known = tracker.verify(id);
            tracing::debug!(id, known, "verification recorded");
        }
    }
}

fn outcome_for_subtype(subtype: Option<&str>) -> SessionOutcome {
    match subtype {
        Some("success") => SessionOutcome::Completed,
        Some("error_max_turns") => SessionOutcome::MaxIterationsReached,
        Some("error_max_budget_usd") => SessionOutcome::BudgetExceeded,
        _ => SessionOutcome::ExecutionError,
    }
}

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    let start = text.char_indices().nth(skip).map(|(i, _)| i).unwrap_or(0);
    &text[start..]
}
