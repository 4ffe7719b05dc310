//! CLI subcommand arguments.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::record::RecordStatus;

/// Submit command arguments.
#[derive(Debug, Args)]
pub struct SubmitCommand {
    /// Image file to analyse
    pub file: PathBuf,

    /// Identity of the submitting technician
    #[arg(short, long, value_name = "ID")]
    pub user: String,

    /// Override the MIME type guessed from the file extension
    #[arg(long, value_name = "TYPE")]
    pub mime_type: Option<String>,

    /// Do not print upload progress
    #[arg(long)]
    pub no_progress: bool,

    /// Print the final record as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Show command arguments.
#[derive(Debug, Args)]
pub struct ShowCommand {
    /// Record id
    pub id: String,

    /// Print the record as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// List command arguments.
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Only records in this status
    #[arg(short, long, value_enum)]
    pub status: Option<StatusArg>,

    /// Maximum number of records
    #[arg(short, long, default_value = "20")]
    pub limit: usize,

    /// Print records as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Record status argument for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    /// Upload in progress
    Uploading,
    /// Uploaded, not yet sent for analysis
    Uploaded,
    /// Waiting on the inference service
    Analyzing,
    /// Analysis stored
    Completed,
    /// Some stage failed
    AnalysisFailed,
}

impl From<StatusArg> for RecordStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Uploading => Self::Uploading,
            StatusArg::Uploaded => Self::Uploaded,
            StatusArg::Analyzing => Self::Analyzing,
            StatusArg::Completed => Self::Completed,
            StatusArg::AnalysisFailed => Self::AnalysisFailed,
        }
    }
}
