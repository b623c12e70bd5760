//! vm-backup CLI entry point.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use log::{LevelFilter, error, info, warn};

use vm_backup::{BackupOrchestrator, BackupPolicy, OvirtConnector, RunError, RunReport, config};

/// Snapshot, clone and export virtual machines for backup
#[derive(Parser, Debug)]
#[command(name = "vm-backup")]
#[command(version)]
#[command(
    long_about = "Backs up every VM named in the configuration file: each VM is \
snapshotted, cloned from the snapshot, and the clone is exported to the export \
domain. Snapshots and clones are removed afterwards and old exports are pruned \
to the configured retention count.\n\n\
Exits with status 1 when the configuration is invalid, when a configured VM \
does not exist, or when any VM could not be backed up."
)]
struct Cli {
    /// Configuration file (TOML, settings under [config])
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: PathBuf,

    /// Log debug messages
    #[arg(short = 'd', long)]
    debug: bool,

    /// Only log what would be changed
    #[arg(long)]
    dry_run: bool,

    /// Append the run log to this file instead of stderr
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Write the run report as JSON
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Help and version go to stdout and are not failures.
            let code = if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
            let _ = err.print();
            return code;
        }
    };

    let policy = match load_policy(&cli) {
        Ok(policy) => policy,
        Err(err) => {
            let _ = init_logging(cli.debug, None);
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = init_logging(policy.debug(), policy.log_file()) {
        eprintln!("Error: {err:#}");
        return ExitCode::FAILURE;
    }

    match run(policy, cli.report.as_deref()) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Configuration file plus command line overrides
fn load_policy(cli: &Cli) -> Result<BackupPolicy, RunError> {
    let mut builder = config::load_builder(&cli.config)?;
    if cli.dry_run {
        builder = builder.with_dry_run(true);
    }
    if cli.debug {
        builder = builder.with_debug(true);
    }
    if let Some(path) = &cli.log_file {
        builder = builder.with_log_file(path.clone());
    }
    Ok(builder.build()?)
}

/// Initialize env_logger; `RUST_LOG` overrides the level chosen here
fn init_logging(debug: bool, log_file: Option<&Path>) -> anyhow::Result<()> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });
    builder.parse_default_env();

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init().context("Failed to initialize logging")
}

fn run(policy: BackupPolicy, report_path: Option<&Path>) -> anyhow::Result<u8> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    let mut orchestrator = BackupOrchestrator::new(Box::new(OvirtConnector::new()), policy);
    let result = runtime.block_on(orchestrator.run());
    let report = orchestrator.report();

    info!("Backup summary:");
    for line in report.summary_lines() {
        info!("  {line}");
    }

    if let Some(path) = report_path
        && let Err(err) = write_report(path, report)
    {
        warn!("{err:#}");
    }

    Ok(if result.is_err() { 1 } else { report.exit_code() })
}

fn write_report(path: &Path, report: &RunReport) -> anyhow::Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create report file {}", path.display()))?;
    serde_json::to_writer_pretty(file, report)
        .with_context(|| format!("Failed to write report file {}", path.display()))
}
