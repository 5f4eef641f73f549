//! CLI command definitions using clap.
//!
//! - run: work the ledger until every achievable deliverable passes
//! - verify: re-check every active deliverable
//! - status: print ledger counts
//! - mark: move a deliverable to a new state

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Ledgerloop - drives agent sessions until a deliverable ledger converges
#[derive(Parser, Debug)]
#[command(name = "ledgerloop")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Ledger file (overrides config)
    #[arg(short, long, global = true)]
    pub ledger: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Work pending deliverables until the ledger converges
    Run(LoopArgs),

    /// Re-verify every active deliverable
    Verify(LoopArgs),

    /// Show ledger progress
    Status {
        /// Print every deliverable, not just the counts
        #[arg(short, long)]
        detailed: bool,
    },

    /// Change the state of one deliverable
    Mark {
        /// Deliverable ID
        id: String,

        /// New state
        #[arg(value_enum)]
        state: MarkState,
    },
}

/// Flags shared by `run` and `verify`; each overrides the config value.
#[derive(Args, Debug, Clone, Default)]
pub struct LoopArgs {
    /// Stop after this many sessions
    #[arg(short = 'n', long)]
    pub max_iterations: Option<u32>,

    /// Consecutive session failures tolerated
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Sleep until a usage quota resets instead of stopping
    #[arg(long)]
    pub wait_for_quota: bool,

    /// Pause between sessions in milliseconds
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Agent program to launch per session
    #[arg(long)]
    pub agent: Option<String>,

    /// Print the run result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkState {
    Pending,
    Passed,
    Blocked,
    Deprecated,
}
