use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ledgerloop::ledger::{Deliverable, DeliverableStatus, JsonFileLedgerRepository, LedgerRepository};
use ledgerloop::runner::{EXIT_OK, RunResult, SessionRunner};
use ledgerloop::session::{AgentCommand, CommandSessionFactory, Instructions, RunMode};
use tokio_util::sync::CancellationToken;

mod cli;
mod config;

use cli::Cli;
use cli::commands::{Commands, LoopArgs, MarkState};
use config::Config;

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ledgerloop")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("ledgerloop.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Returns the process exit code.
fn run_application(cli: &Cli, config: &Config) -> Result<i32> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    let ledger_path = cli.ledger.clone().unwrap_or_else(|| config.ledger.path.clone());

    match &cli.command {
        Commands::Run(args) => handle_loop_command(RunMode::Run, args, &ledger_path, config),
        Commands::Verify(args) => handle_loop_command(RunMode::Verify, args, &ledger_path, config),
        Commands::Status { detailed } => handle_status_command(&ledger_path, *detailed).map(|_| EXIT_OK),
        Commands::Mark { id, state } => handle_mark_command(&ledger_path, id, *state).map(|_| EXIT_OK),
    }
}

fn handle_loop_command(mode: RunMode, args: &LoopArgs, ledger_path: &Path, config: &Config) -> Result<i32> {
    let mut options = config.run.runner_options(mode);
    if let Some(max) = args.max_iterations {
        options.termination.max_iterations = Some(max);
    }
    if let Some(retries) = args.max_retries {
        options.termination.max_retries = retries;
    }
    if args.wait_for_quota {
        options.termination.wait_for_quota = true;
    }
    if let Some(delay) = args.delay_ms {
        options.delay_between_sessions = std::time::Duration::from_millis(delay);
    }

    let program = args.agent.clone().unwrap_or_else(|| config.agent.command.clone());
    let mut command = AgentCommand::new(program).with_args(config.agent.args.iter());
    if let Some(dir) = &config.agent.working_dir {
        command = command.in_dir(dir);
    }

    info!(
        "Starting {:?} loop with ledger {} and agent {}",
        mode,
        ledger_path.display(),
        command.program
    );
    println!("{} {}", "Ledger:".cyan(), ledger_path.display());

    let cancel = CancellationToken::new();
    let runner = SessionRunner::with_options(Arc::new(CommandSessionFactory::new(command)), cancel.clone(), options)
        .ledger(Arc::new(JsonFileLedgerRepository::new(ledger_path)))
        .instructions(Instructions::with_overrides(&config.agent.instructions));

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;
    let result = runtime.block_on(async {
        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("Interrupt received, stopping after the current step");
                signal_cancel.cancel();
            }
        });
        runner.run().await
    });

    print_result(&result, args.json)?;
    Ok(result.exit_code())
}

fn print_result(result: &RunResult, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(result).context("Failed to serialize run result")?
        );
        return Ok(());
    }

    let reason = result.exit_reason.to_string();
    let reason = if result.is_error() { reason.red() } else { reason.green() };
    println!("{} {}", "Finished:".bold(), reason);
    println!("  Iterations: {}", result.iterations);
    println!(
        "  Deliverables: {}/{} passed, {} blocked",
        result.deliverables_passed_count, result.deliverables_total_count, result.blocked_count
    );
    if let (Some(verified), Some(total)) = (result.verified_count, result.verified_total_count) {
        println!("  Verified: {}/{}", verified, total);
    }
    println!("  Cost: ${:.4}", result.total_cost_usd);
    println!("  Duration: {:.1}s", result.total_duration.as_secs_f64());
    if let Some(error) = &result.error {
        println!("  {} {}", "Last error:".red(), error);
    }
    Ok(())
}

fn handle_status_command(ledger_path: &Path, detailed: bool) -> Result<()> {
    info!("Showing status for ledger: {}", ledger_path.display());
    let repo = JsonFileLedgerRepository::new(ledger_path);
    if !repo.exists() {
        println!("{} {}", "No ledger at".yellow(), ledger_path.display());
        return Ok(());
    }

    let ledger = repo.load().context("Failed to load ledger")?;
    let deprecated = ledger.len() - ledger.active().count();
    println!("{} {}", "Ledger:".cyan(), ledger_path.display());
    println!(
        "  {}/{} passed, {} blocked, {} deprecated",
        ledger.count_passed(),
        ledger.len(),
        ledger.count_blocked(),
        deprecated
    );

    if detailed {
        for deliverable in ledger.deliverables() {
            println!("  {} {}: {}", status_label(deliverable), deliverable.id, deliverable.description);
        }
    }
    Ok(())
}

fn status_label(deliverable: &Deliverable) -> ColoredString {
    let label = format!("[{}]", deliverable.status);
    if deliverable.is_deprecated() {
        return label.dimmed();
    }
    match deliverable.status {
        DeliverableStatus::Passed => label.green(),
        DeliverableStatus::Blocked => label.red(),
        DeliverableStatus::Pending => label.yellow(),
    }
}

fn handle_mark_command(ledger_path: &Path, id: &str, state: MarkState) -> Result<()> {
    info!("Marking deliverable {} as {:?}", id, state);
    let repo = JsonFileLedgerRepository::new(ledger_path);
    let ledger = repo.load().context(format!("Failed to load ledger {}", ledger_path.display()))?;

    let updated = ledger
        .replace(id, |d| match state {
            MarkState::Pending => d.reset(),
            MarkState::Passed => d.mark_passed(),
            MarkState::Blocked => d.mark_blocked(),
            MarkState::Deprecated => d.mark_deprecated(chrono::Utc::now()),
        })
        .context(format!("Failed to mark {}", id))?;

    repo.save(&updated).context("Failed to save ledger")?;
    println!("{} {} -> {:?}", "Marked:".green(), id, state);
    Ok(())
}

fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    let code = run_application(&cli, &config).context("Application failed")?;
    if code != EXIT_OK {
        std::process::exit(code);
    }

    Ok(())
}
