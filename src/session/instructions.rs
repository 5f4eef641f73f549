//! Instruction selection and lookup.
//!
//! The runner only asks for an instruction *name* each iteration; the text
//! behind a name comes from `Instructions`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerLoopError, Result};

pub const INITIALIZER: &str = "initializer";
pub const WORKER: &str = "worker";
pub const VERIFIER: &str = "verifier";

/// Which workflow a run follows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Work deliverables until every achievable one passes
    #[default]
    Run,
    /// Re-check every active deliverable once
    Verify,
}

impl RunMode {
    pub fn is_sync(&self) -> bool {
        matches!(self, RunMode::Verify)
    }
}

/// Picks the instruction name for an iteration.
pub trait InstructionSelector: Send + Sync {
    /// `iteration_index` is 0-based.
    fn select(&self, iteration_index: u32, ledger_exists: bool) -> String;
}

/// Initializer first when there is no ledger yet, then the worker. Verify runs
/// always use the verifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultInstructionSelector {
    pub mode: RunMode,
}

impl DefaultInstructionSelector {
    pub fn new(mode: RunMode) -> Self {
        Self { mode }
    }
}

impl InstructionSelector for DefaultInstructionSelector {
    fn select(&self, iteration_index: u32, ledger_exists: bool) -> String {
        let name = match self.mode {
            RunMode::Verify => VERIFIER,
            RunMode::Run if iteration_index == 0 && !ledger_exists => INITIALIZER,
            RunMode::Run => WORKER,
        };
        name.to_string()
    }
}

const DEFAULT_INITIALIZER: &str = r#"There is no deliverable ledger yet.

Read the project goal, break it into verifiable deliverables, and record each one
in the ledger with an id, a description and concrete acceptance criteria. Do not
start implementing yet."#;

const DEFAULT_WORKER: &str = r#"Pick the next pending deliverable from the ledger.

Implement it, check every acceptance criterion, then mark it passed. If it cannot
be achieved in this environment, mark it blocked and explain why. Work on one
deliverable per session."#;

const DEFAULT_VERIFIER: &str = r#"Re-check deliverables in the ledger.

For each active deliverable, verify its acceptance criteria against the current
code and call verify_deliverable with its id. Reset any deliverable that no
longer holds to pending."#;

/// Instruction texts by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instructions {
    texts: HashMap<String, String>,
}

impl Default for Instructions {
    fn default() -> Self {
        let texts = [
            (INITIALIZER, DEFAULT_INITIALIZER),
            (WORKER, DEFAULT_WORKER),
            (VERIFIER, DEFAULT_VERIFIER),
        ]
        .into_iter()
        .map(|(name, text)| (name.to_string(), text.to_string()))
        .collect();
        Self { texts }
    }
}

impl Instructions {
    /// Built-in texts with `overrides` layered on top.
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut instructions = Self::default();
        for (name, text) in overrides {
            instructions.texts.insert(name.clone(), text.clone());
        }
        instructions
    }

    pub fn resolve(&self, name: &str) -> Result<&str> {
        self.texts
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| LedgerLoopError::UnknownInstruction(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_mode_selects_initializer_first_without_ledger() {
        let selector = DefaultInstructionSelector::new(RunMode::Run);
        assert_eq!(selector.select(0, false), INITIALIZER);
        assert_eq!(selector.select(0, true), WORKER);
        assert_eq!(selector.select(1, false), WORKER);
        assert_eq!(selector.select(7, true), WORKER);
    }

    #[test]
    fn test_verify_mode_always_verifier() {
        let selector = DefaultInstructionSelector::new(RunMode::Verify);
        assert_eq!(selector.select(0, false), VERIFIER);
        assert_eq!(selector.select(3, true), VERIFIER);
    }

    #[test]
    fn test_default_instructions_resolve() {
        let instructions = Instructions::default();
        assert!(instructions.resolve(WORKER).unwrap().contains("pending deliverable"));
        assert!(instructions.resolve(VERIFIER).unwrap().contains("verify_deliverable"));
        assert!(matches!(
            instructions.resolve("planner"),
            Err(LedgerLoopError::UnknownInstruction(_))
        ));
    }

    #[test]
    fn test_overrides_replace_and_extend() {
        let overrides = HashMap::from([
            (WORKER.to_string(), "do the thing".to_string()),
            ("reviewer".to_string(), "review it".to_string()),
        ]);
        let instructions = Instructions::with_overrides(&overrides);
        assert_eq!(instructions.resolve(WORKER).unwrap(), "do the thing");
        assert_eq!(instructions.resolve("reviewer").unwrap(), "review it");
        assert!(instructions.resolve(INITIALIZER).is_ok());
    }

    #[test]
    fn test_run_mode_serde() {
        let mode: RunMode = serde_yaml::from_str("verify").unwrap();
        assert_eq!(mode, RunMode::Verify);
        assert!(mode.is_sync());
        assert!(!RunMode::Run.is_sync());
    }
}
