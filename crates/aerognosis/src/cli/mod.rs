//! Command-line interface for aerognosis.
//!
//! This module provides the CLI structure for the `aerog` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{ConfigCommand, ListCommand, ShowCommand, StatusArg, SubmitCommand};

use crate::logging::Verbosity;

/// aerog - Submit aircraft inspection images for analysis
///
/// Uploads an image to blob storage, asks the inference service to analyse
/// it, and keeps a record of every submission and its outcome.
#[derive(Debug, Parser)]
#[command(name = "aerog")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload an image and analyse it
    Submit(SubmitCommand),

    /// Show one submission
    Show(ShowCommand),

    /// List recent submissions
    List(ListCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.verbose, self.quiet)
    }
}
