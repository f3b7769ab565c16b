//! RMAN Backup Driver
//!
//! Provides CLI interface for scheduled Oracle RMAN backups

// rman-backup/src/main.rs
mod backup;
mod config;
mod errors;
mod report;
mod utils;

use anyhow::{Context, Result};
use backup::{BackupRequest, BackupType, RoleFilter, RunDisposition};
use clap::Parser;
use config::{AppConfig, CONFIG_PATH_ENV, DEFAULT_CONFIG_FILE};
use report::BackupOutcome;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rman-backup", version, about = "Run an RMAN backup for one configured database")]
struct Cli {
    /// Database name as it appears in the configuration file
    db_name: String,

    /// Kind of backup to run
    #[arg(value_enum)]
    backup_type: BackupType,

    /// Configuration file (falls back to $RMAN_BACKUP_CONFIG, then ./config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Do not send any mail
    #[arg(short = 'n', long)]
    no_mail: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Only run when the database is a physical standby
    #[arg(short, long, conflicts_with = "primary_only")]
    standby_only: bool,

    /// Only run when the database is a primary
    #[arg(short, long)]
    primary_only: bool,

    /// Generate and log the script without running rman
    #[arg(short, long)]
    dry_run: bool,

    /// Keep the backup for this many days, outside the retention policy
    #[arg(short, long)]
    keep_days: Option<u32>,

    /// Tag for the database and archivelog backup pieces
    #[arg(short, long)]
    tag: Option<String>,
}

impl Cli {
    fn role_filter(&self) -> RoleFilter {
        match (self.primary_only, self.standby_only) {
            (true, _) => RoleFilter::PrimaryOnly,
            (_, true) => RoleFilter::StandbyOnly,
            _ => RoleFilter::Any,
        }
    }

    fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    fn request(&self) -> BackupRequest {
        BackupRequest {
            db_name: self.db_name.clone(),
            backup_type: self.backup_type,
            role_filter: self.role_filter(),
            dry_run: self.dry_run,
            no_mail: self.no_mail,
            keep_days: self.keep_days,
            tag: self.tag.clone(),
        }
    }
}

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run_app(&cli).await {
        Ok(RunDisposition::Finished { outcome: BackupOutcome::Failed, detail_log, .. }) => {
            eprintln!("❌ Backup failed, see {}", detail_log.display());
            ExitCode::FAILURE
        }
        Ok(RunDisposition::Finished { outcome, detail_log, .. }) => {
            println!("✅ Backup finished with status {} ({})", outcome, detail_log.display());
            ExitCode::SUCCESS
        }
        Ok(RunDisposition::LockHeld { pid }) => {
            println!("⏭️ Another backup (pid {}) is running for {}, nothing to do.", pid, cli.db_name);
            ExitCode::SUCCESS
        }
        Ok(RunDisposition::RoleFiltered { role }) => {
            println!("⏭️ {} is {}, skipped by role filter.", cli.db_name, role);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

async fn run_app(cli: &Cli) -> Result<RunDisposition> {
    let config_path = cli.config_path();
    let app_config = AppConfig::load_from_json(&config_path)
        .with_context(|| format!("Failed to load application configuration from {}", config_path.display()))?;

    backup::run_backup_flow(&app_config, &cli.request())
        .await
        .context("Backup process failed")
}
