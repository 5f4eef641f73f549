//! CLI module for ledgerloop - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
