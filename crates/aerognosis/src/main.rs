//! `aerog` - CLI for aerognosis
//!
//! Submits inspection images through the analysis pipeline and inspects the
//! submission ledger.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;

use aerognosis::cli::{Cli, Command, ConfigCommand, ListCommand, ShowCommand, SubmitCommand};
use aerognosis::pipeline::{CancelHandle, Pipeline, SubmitOptions};
use aerognosis::{
    init_logging, Config, Identity, LocalFile, RecordId, RecordStatus, RecordStore,
    SqliteRecordStore, SubmissionRecord,
};

/// Exit code when a submission ends in `analysis-failed`.
const EXIT_ANALYSIS_FAILED: u8 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    init_logging(cli.verbosity());

    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    match cli.command {
        Command::Submit(cmd) => handle_submit(&config, &cmd, cli.quiet).await,
        Command::Show(cmd) => handle_show(&config, &cmd).await,
        Command::List(cmd) => handle_list(&config, &cmd),
        Command::Config(cmd) => handle_config(&config, cmd),
    }
}

fn open_store(config: &Config) -> anyhow::Result<SqliteRecordStore> {
    let path = config.database_path();
    SqliteRecordStore::open(&path)
        .with_context(|| format!("opening submission ledger at {}", path.display()))
}

async fn handle_submit(
    config: &Config,
    cmd: &SubmitCommand,
    quiet: bool,
) -> anyhow::Result<ExitCode> {
    let identity = Identity::new(cmd.user.clone())?;
    let mut file = LocalFile::open(&cmd.file)
        .await
        .with_context(|| format!("reading {}", cmd.file.display()))?;
    if let Some(mime_type) = &cmd.mime_type {
        file = file.with_mime_type(mime_type.clone());
    }

    let store = Arc::new(open_store(config)?);
    let pipeline = Pipeline::from_config(config, store)?;

    let cancel = CancelHandle::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let show_progress = !(quiet || cmd.no_progress || cmd.json);
    let options = SubmitOptions {
        progress: show_progress.then(|| {
            Arc::new(|pct: u8| {
                let mut stderr = std::io::stderr();
                let _ = write!(stderr, "\ruploading {pct:>3}%");
                if pct == 100 {
                    let _ = writeln!(stderr);
                }
            }) as Arc<aerognosis::blob::ProgressFn>
        }),
        cancel: Some(cancel),
    };

    let record = pipeline.submit_with(&file, &identity, &options).await?;
    print_record(&record, cmd.json)?;

    if record.status() == RecordStatus::AnalysisFailed {
        return Ok(ExitCode::from(EXIT_ANALYSIS_FAILED));
    }
    Ok(ExitCode::SUCCESS)
}

async fn handle_show(config: &Config, cmd: &ShowCommand) -> anyhow::Result<ExitCode> {
    let store = open_store(config)?;
    let Some(record) = store.get(&RecordId::new(cmd.id.clone())).await? else {
        bail!("no submission with id {}", cmd.id);
    };
    print_record(&record, cmd.json)?;
    Ok(ExitCode::SUCCESS)
}

fn handle_list(config: &Config, cmd: &ListCommand) -> anyhow::Result<ExitCode> {
    let store = open_store(config)?;
    let records = store.recent(cmd.limit, cmd.status.map(RecordStatus::from))?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(ExitCode::SUCCESS);
    }

    let stats = store.stats()?;
    println!("{} submissions in {}", stats.total, store.path().display());
    for (status, count) in &stats.by_status {
        println!("  {status:<16} {count}");
    }
    if records.is_empty() {
        return Ok(ExitCode::SUCCESS);
    }
    println!();
    println!("{:<8} {:<16} {:<20} {:<25} FILE", "ID", "STATUS", "BY", "UPDATED");
    for record in &records {
        println!(
            "{:<8} {:<16} {:<20} {:<25} {}",
            record.id,
            record.status(),
            record.submitted_by,
            record.timestamps.updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            record.source_file.name
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn print_record(record: &SubmissionRecord, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(());
    }

    println!("Submission {}", record.id);
    println!("  Status:       {}", record.status());
    println!(
        "  File:         {} ({} bytes, {})",
        record.source_file.name, record.source_file.size_bytes, record.source_file.mime_type
    );
    println!("  Submitted by: {}", record.submitted_by);
    println!("  Created:      {}", record.timestamps.created_at.to_rfc3339());
    if let Some(storage) = record.storage_ref() {
        println!("  Stored at:    {}", storage.url);
    }
    if let Some(error) = record.error() {
        println!("  Error:        {error}");
    }
    if let Some(result) = record.result() {
        if let Some(summary) = &result.summary {
            println!("  Summary:      {summary}");
        }
        if let Some(confidence) = result.confidence {
            println!("  Confidence:   {confidence:.2}");
        }
        if let Some(score) = result.score {
            println!("  Score:        {score:.2}");
        }
        if let Some(severity) = &result.severity {
            println!("  Severity:     {severity}");
        }
        if let Some(m) = &result.measurements {
            if let Some(coverage) = m.coverage_pct {
                println!("  Coverage:     {coverage:.2}%");
            }
            if let Some(length) = m.length_mm {
                println!("  Length:       {length:.1} mm");
            }
        }
        println!("  Findings:     {}", result.findings.len());
        for finding in &result.findings {
            let label = finding
                .label
                .as_deref()
                .or(finding.area.as_deref())
                .unwrap_or("finding");
            let severity = finding.severity.as_deref().unwrap_or("unrated");
            match finding.count {
                Some(count) => println!("    - {label} [{severity}] x{count}"),
                None => println!("    - {label} [{severity}]"),
            }
        }
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<ExitCode> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Store]");
                println!("  Database path:   {}", config.database_path().display());
                println!();
                println!("[Blob]");
                println!("  Backend:         {:?}", config.blob.backend);
                println!("  Root:            {}", config.blob_root().display());
                if let Some(endpoint) = &config.blob.endpoint {
                    println!("  Endpoint:        {endpoint}");
                }
                if let Some(base) = &config.blob.public_base_url {
                    println!("  Public base URL: {base}");
                }
                println!("  Chunk size:      {} bytes", config.blob.chunk_size_bytes);
                println!();
                println!("[Inference]");
                println!("  Base URL:        {}", config.inference.base_url);
                println!("  Analyze path:    {}", config.inference.analyze_path);
                match config.inference_timeout() {
                    Some(timeout) => println!("  Timeout:         {}s", timeout.as_secs()),
                    None => println!("  Timeout:         none"),
                }
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => {
                    println!("Configuration error: {e}");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
