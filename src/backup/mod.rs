pub(crate) mod channels;
pub(crate) mod facts;
pub(crate) mod format;
mod logic;
pub(crate) mod plan;
pub(crate) mod rman_exec;

use anyhow::{Context, Result};
use chrono::Local;
use std::fmt;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::report::notify::Mailer;
use crate::utils::OracleEnv;
use crate::utils::secret::FileSecretResolver;
use crate::utils::sqlplus::SqlPlus;

pub use logic::{BackupRequest, RoleFilter, RunDisposition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackupType {
    /// Incremental level 0 (full) database backup plus archivelogs
    #[value(name = "lvl0")]
    Level0,
    /// Incremental level 1 database backup plus archivelogs
    #[value(name = "lvl1")]
    Level1,
    /// Archivelog backup
    #[value(name = "arch")]
    ArchiveLog,
    /// Delete archivelogs older than the archive keep window
    #[value(name = "arch-del")]
    ArchiveLogDelete,
    /// Restore-validate database and archivelogs, nothing is written
    #[value(name = "validate")]
    Validate,
}

impl BackupType {
    #[cfg(test)]
    pub const ALL: [BackupType; 5] = [
        BackupType::Level0,
        BackupType::Level1,
        BackupType::ArchiveLog,
        BackupType::ArchiveLogDelete,
        BackupType::Validate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackupType::Level0 => "lvl0",
            BackupType::Level1 => "lvl1",
            BackupType::ArchiveLog => "arch",
            BackupType::ArchiveLogDelete => "arch-del",
            BackupType::Validate => "validate",
        }
    }

    /// Whether the plan produces new backup pieces.
    pub fn writes_backups(self) -> bool {
        matches!(self, BackupType::Level0 | BackupType::Level1 | BackupType::ArchiveLog)
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Public entry point for one backup invocation.
///
/// Wires the production collaborators (sqlplus, rman, encrypted password
/// files, mailx) and hands over to the orchestration. Failures before the
/// engine runs are mailed to the fatal recipients, best-effort.
pub async fn run_backup_flow(app_config: &AppConfig, request: &BackupRequest) -> Result<RunDisposition> {
    let mailer = Mailer::new(&app_config.notify.mail_command);

    let result = run_with_production_backend(app_config, request, &mailer).await;
    if let Err(e) = &result {
        error!(db = %request.db_name, backup_type = %request.backup_type, "backup aborted: {:#}", e);
        if !request.no_mail && !request.dry_run && app_config.notify.enabled {
            mailer
                .notify_fatal(app_config, &request.db_name, request.backup_type, &format!("{:?}", e))
                .await;
        }
    }
    result
}

async fn run_with_production_backend(
    app_config: &AppConfig,
    request: &BackupRequest,
    mailer: &Mailer,
) -> Result<RunDisposition> {
    let backup_config = app_config
        .resolve(&request.db_name)
        .and_then(|config| config.with_overrides(request.keep_days, request.tag.clone()))
        .with_context(|| format!("Failed to resolve configuration for {}", request.db_name))?;

    let oracle_env = OracleEnv::resolve(app_config.oracle_home.as_deref(), &backup_config.oracle_sid)
        .context("Failed to set up the Oracle environment")?;
    info!(
        oracle_home = %oracle_env.oracle_home.display(),
        oracle_sid = %oracle_env.oracle_sid,
        "Oracle environment ready"
    );

    let queries = SqlPlus::new(&oracle_env).context("sqlplus is not available")?;
    let engine = rman_exec::Rman::new(&oracle_env).context("rman is not available")?;
    let secrets = FileSecretResolver::new(&app_config.secrets_dir, &app_config.secret_key_env);

    logic::perform_backup_orchestration(
        app_config,
        &backup_config,
        request,
        &logic::Backend { queries: &queries, engine: &engine, secrets: &secrets, mailer },
        Local::now().naive_local(),
    )
    .await
}
