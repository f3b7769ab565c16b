// rman-backup/src/backup/logic.rs
use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use std::path::PathBuf;
use tracing::{info, warn};
use uuid::Uuid;

use crate::backup::facts::{self, Credential, DatabaseRole};
use crate::backup::plan;
use crate::backup::rman_exec::BackupEngine;
use crate::backup::BackupType;
use crate::config::{AppConfig, BackupConfig};
use crate::report::notify::{self, Mailer};
use crate::report::{self, BackupOutcome, DetailLog, SessionLog, SessionRecord};
use crate::utils::lock::{self, LockAttempt};
use crate::utils::secret::SecretResolver;
use crate::utils::sqlplus::QueryExecutor;

/// Restricts a run to databases in a given role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoleFilter {
    #[default]
    Any,
    PrimaryOnly,
    StandbyOnly,
}

impl RoleFilter {
    pub fn admits(self, role: DatabaseRole) -> bool {
        match self {
            RoleFilter::Any => true,
            RoleFilter::PrimaryOnly => role == DatabaseRole::Primary,
            RoleFilter::StandbyOnly => role == DatabaseRole::PhysicalStandby,
        }
    }
}

/// One invocation as requested on the command line.
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub db_name: String,
    pub backup_type: BackupType,
    pub role_filter: RoleFilter,
    pub dry_run: bool,
    pub no_mail: bool,
    pub keep_days: Option<u32>,
    pub tag: Option<String>,
}

/// How an invocation ended when nothing fatal happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunDisposition {
    /// Another live process holds the lock; nothing ran.
    LockHeld { pid: u32 },
    /// The database role is excluded by the role filter; nothing ran.
    RoleFiltered { role: DatabaseRole },
    Finished {
        outcome: BackupOutcome,
        session_id: Uuid,
        detail_log: PathBuf,
    },
}

/// External collaborators of one run.
pub struct Backend<'a, Q, E, S> {
    pub queries: &'a Q,
    pub engine: &'a E,
    pub secrets: &'a S,
    pub mailer: &'a Mailer,
}

/// Lock, probe, generate, execute, record, notify.
///
/// The lock is held until this function returns, whatever the result.
pub async fn perform_backup_orchestration<Q, E, S>(
    app_config: &AppConfig,
    backup_config: &BackupConfig,
    request: &BackupRequest,
    backend: &Backend<'_, Q, E, S>,
    now: NaiveDateTime,
) -> Result<RunDisposition>
where
    Q: QueryExecutor,
    E: BackupEngine,
    S: SecretResolver,
{
    let db_name = backup_config.db_name.as_str();
    let backup_type = request.backup_type;

    let lock_key = app_config.lock_per_backup_type.then_some(backup_type);
    let lock_file = lock::lock_path(&app_config.lock_dir, db_name, lock_key);
    let _lock = match lock::acquire(&lock_file)
        .with_context(|| format!("Failed to take lock {}", lock_file.display()))?
    {
        LockAttempt::Acquired(guard) => guard,
        LockAttempt::Held { pid } => {
            warn!(db = db_name, pid, "another backup holds {}, not running", lock_file.display());
            return Ok(RunDisposition::LockHeld { pid });
        }
    };

    let (status, role) = facts::probe_instance(backend.queries)
        .with_context(|| format!("Failed to probe instance {}", backup_config.oracle_sid))?;
    if !request.role_filter.admits(role) {
        info!(db = db_name, %role, filter = ?request.role_filter, "role excluded by filter, skipping");
        return Ok(RunDisposition::RoleFiltered { role });
    }

    let mut db_facts = facts::gather_facts(backend.queries, status, role, backup_type, backup_config)
        .with_context(|| format!("Failed to collect database facts for {}", db_name))?;
    if role == DatabaseRole::PhysicalStandby {
        if let Some(login) = &backup_config.standby_login {
            let password = backend
                .secrets
                .decrypt(db_name)
                .with_context(|| format!("Failed to resolve standby password for {}", db_name))?;
            db_facts.credential = Some(Credential::new(&login.user, password, &login.service));
        }
    }

    let plan = plan::generate_plan(backup_type, backup_config, &db_facts, now);
    let session_id = Uuid::new_v4();
    info!(db = db_name, %backup_type, %role, %session_id, "starting backup session");

    let session_log = SessionLog::new(&app_config.log_dir);
    session_log
        .append(&SessionRecord {
            timestamp: now,
            db_name,
            backup_type,
            session_id,
            status: "STARTED",
        })
        .context("Failed to write session log")?;

    let mut detail_log = DetailLog::create(&app_config.log_dir, db_name, backup_type, now)
        .context("Failed to create detail log")?;
    detail_log.write_block(
        "SESSION",
        &format!(
            "session {}\ndatabase {} ({}, {:?})\nbackup type {}\n",
            session_id, db_name, role, status, backup_type
        ),
    )?;
    detail_log.write_block("SCRIPT", &plan.render_redacted())?;

    let outcome = if request.dry_run {
        info!(db = db_name, "dry run, rman not started");
        detail_log.write_line("dry run, rman not started")?;
        BackupOutcome::Skipped
    } else {
        detail_log.write_line("===== RMAN OUTPUT =====")?;
        match backend.engine.execute(&plan, &mut detail_log).await {
            Ok(run) => {
                let markers = report::error_markers(&run.output, &app_config.ignore_error_codes);
                if !markers.is_empty() {
                    warn!(db = db_name, ?markers, "rman reported errors");
                }
                report::classify(run.exit_code, &run.output, &app_config.ignore_error_codes)
            }
            Err(e) => {
                warn!(db = db_name, "rman could not be run: {}", e);
                detail_log.write_line(&format!("rman could not be run: {}", e))?;
                BackupOutcome::Failed
            }
        }
    };
    detail_log.write_line(&format!("===== STATUS: {} =====", outcome))?;

    session_log
        .append(&SessionRecord {
            timestamp: Local::now().naive_local(),
            db_name,
            backup_type,
            session_id,
            status: outcome.as_str(),
        })
        .context("Failed to write session log")?;
    info!(db = db_name, %backup_type, %outcome, log = %detail_log.path().display(), "backup session finished");

    if notify::should_notify(&app_config.notify, outcome, request.no_mail, request.dry_run) {
        let subject = notify::subject(db_name, backup_type, outcome.as_str(), &notify::host_name());
        let body = detail_log.contents()?;
        backend
            .mailer
            .send_best_effort(&app_config.notify.recipients, &subject, &body)
            .await;
    }

    Ok(RunDisposition::Finished {
        outcome,
        session_id,
        detail_log: detail_log.path().to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::plan::DirectiveSequence;
    use crate::backup::rman_exec::EngineRun;
    use crate::errors::AppError;
    use crate::report::SESSION_LOG_FILE;
    use serde_json::json;
    use std::cell::{Cell, RefCell};
    use std::fs;
    use tempfile::TempDir;

    struct FakeDatabase {
        status: &'static str,
        role: &'static str,
    }

    impl QueryExecutor for FakeDatabase {
        fn run(&self, query: &str) -> crate::errors::Result<String> {
            let answer = if query.contains("v$instance") {
                self.status
            } else if query.contains("database_role") {
                self.role
            } else if query.contains("v$archive_dest") {
                "1"
            } else if query.contains("first_change#") {
                "100"
            } else if query.contains("current_scn") {
                "900"
            } else {
                return Err(AppError::Query { query: query.to_string(), stderr: "unexpected".to_string() });
            };
            Ok(answer.to_string())
        }
    }

    struct ScriptedEngine {
        exit_code: Option<i32>,
        output: &'static str,
        calls: Cell<usize>,
        last_script: RefCell<Option<String>>,
    }

    impl ScriptedEngine {
        fn new(exit_code: i32, output: &'static str) -> Self {
            ScriptedEngine {
                exit_code: Some(exit_code),
                output,
                calls: Cell::new(0),
                last_script: RefCell::new(None),
            }
        }
    }

    impl BackupEngine for ScriptedEngine {
        async fn execute(
            &self,
            plan: &DirectiveSequence,
            detail_log: &mut DetailLog,
        ) -> crate::errors::Result<EngineRun> {
            self.calls.set(self.calls.get() + 1);
            *self.last_script.borrow_mut() = Some(plan.render());
            for line in self.output.lines() {
                detail_log.write_line(line)?;
            }
            Ok(EngineRun { exit_code: self.exit_code, output: self.output.to_string() })
        }
    }

    struct FixedSecret(&'static str);

    impl SecretResolver for FixedSecret {
        fn decrypt(&self, _db_name: &str) -> crate::errors::Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Fixture {
        _root: TempDir,
        app_config: AppConfig,
        backup_config: BackupConfig,
    }

    fn fixture(standby_password: bool) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let value = json!({
            "log_dir": root.path().join("log"),
            "lock_dir": root.path().join("lock"),
            "notify": { "enabled": false },
            "databases": {
                "DB1": {
                    "device_type": "disk",
                    "destination": root.path().join("backup"),
                    "channels": 2,
                    "standby_password": standby_password,
                    "standby_service": "DB1_STBY"
                }
            }
        });
        let app_config = AppConfig::from_json_str(&value.to_string()).unwrap();
        let backup_config = app_config.resolve("DB1").unwrap();
        Fixture { _root: root, app_config, backup_config }
    }

    fn request(backup_type: BackupType) -> BackupRequest {
        BackupRequest {
            db_name: "DB1".to_string(),
            backup_type,
            role_filter: RoleFilter::Any,
            dry_run: false,
            no_mail: true,
            keep_days: None,
            tag: None,
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2026-10-16 21:05:09", "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn lock_file(fx: &Fixture) -> PathBuf {
        fx.app_config.lock_dir.join("DB1.lock")
    }

    async fn run(
        fx: &Fixture,
        request: &BackupRequest,
        db: &FakeDatabase,
        engine: &ScriptedEngine,
    ) -> Result<RunDisposition> {
        let mailer = Mailer::new("mailx");
        let backend = Backend { queries: db, engine, secrets: &FixedSecret("s3cret"), mailer: &mailer };
        perform_backup_orchestration(&fx.app_config, &fx.backup_config, request, &backend, now()).await
    }

    const PRIMARY: FakeDatabase = FakeDatabase { status: "OPEN", role: "PRIMARY" };
    const STANDBY: FakeDatabase = FakeDatabase { status: "MOUNTED", role: "PHYSICAL STANDBY" };

    #[test]
    fn test_role_filter_admits() {
        assert!(RoleFilter::Any.admits(DatabaseRole::PhysicalStandby));
        assert!(RoleFilter::PrimaryOnly.admits(DatabaseRole::Primary));
        assert!(!RoleFilter::PrimaryOnly.admits(DatabaseRole::PhysicalStandby));
        assert!(RoleFilter::StandbyOnly.admits(DatabaseRole::PhysicalStandby));
        assert!(!RoleFilter::StandbyOnly.admits(DatabaseRole::Primary));
    }

    #[tokio::test]
    async fn test_standby_with_primary_only_filter_is_skipped() -> anyhow::Result<()> {
        let fx = fixture(false);
        let engine = ScriptedEngine::new(0, "");
        let req = BackupRequest { role_filter: RoleFilter::PrimaryOnly, ..request(BackupType::Level0) };

        let disposition = run(&fx, &req, &STANDBY, &engine).await?;
        assert_eq!(disposition, RunDisposition::RoleFiltered { role: DatabaseRole::PhysicalStandby });
        assert_eq!(engine.calls.get(), 0);
        assert!(!lock_file(&fx).exists());
        assert!(!fx.app_config.log_dir.join(SESSION_LOG_FILE).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_successful_level0_run_is_recorded() -> anyhow::Result<()> {
        let fx = fixture(false);
        let engine = ScriptedEngine::new(
            0,
            "Starting backup\nRMAN-08120: WARNING: archived log not deleted, not yet applied by standby\nRecovery Manager complete.\n",
        );

        let disposition = run(&fx, &request(BackupType::Level0), &PRIMARY, &engine).await?;
        let RunDisposition::Finished { outcome, session_id, detail_log } = disposition else {
            panic!("expected a finished run, got {:?}", disposition);
        };
        assert_eq!(outcome, BackupOutcome::Success);
        assert_eq!(engine.calls.get(), 1);
        assert!(!lock_file(&fx).exists());

        let script = engine.last_script.borrow().clone().unwrap();
        assert!(script.starts_with("CONNECT TARGET /;\n"));
        assert!(script.contains("CONFIGURE ARCHIVELOG DELETION POLICY TO APPLIED ON ALL STANDBY;"));

        let sessions = fs::read_to_string(fx.app_config.log_dir.join(SESSION_LOG_FILE))?;
        let lines: Vec<&str> = sessions.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], format!("2026-10-16 21:05:09|DB1|lvl0|{}|STARTED", session_id));
        assert!(lines[1].ends_with(&format!("|DB1|lvl0|{}|SUCCESS", session_id)));

        assert_eq!(detail_log, fx.app_config.log_dir.join("DB1_lvl0_20261016_210509.log"));
        let detail = fs::read_to_string(&detail_log)?;
        assert!(detail.contains("===== SCRIPT =====\nCONNECT TARGET /;\n"));
        assert!(detail.contains("Recovery Manager complete."));
        assert!(detail.ends_with("===== STATUS: SUCCESS =====\n"));
        Ok(())
    }

    #[tokio::test]
    async fn test_error_marker_downgrades_to_warning() -> anyhow::Result<()> {
        let fx = fixture(false);
        let engine = ScriptedEngine::new(0, "ORA-00600: internal error code\n");
        let disposition = run(&fx, &request(BackupType::ArchiveLog), &PRIMARY, &engine).await?;
        assert!(matches!(disposition, RunDisposition::Finished { outcome: BackupOutcome::Warning, .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_engine_failure_is_recorded_as_failed() -> anyhow::Result<()> {
        let fx = fixture(false);
        let engine = ScriptedEngine::new(1, "Recovery Manager complete.\n");
        let disposition = run(&fx, &request(BackupType::Level1), &PRIMARY, &engine).await?;
        assert!(matches!(disposition, RunDisposition::Finished { outcome: BackupOutcome::Failed, .. }));

        let sessions = fs::read_to_string(fx.app_config.log_dir.join(SESSION_LOG_FILE))?;
        assert!(sessions.lines().last().unwrap().ends_with("|FAILED"));
        Ok(())
    }

    #[tokio::test]
    async fn test_dry_run_never_invokes_engine() -> anyhow::Result<()> {
        let fx = fixture(false);
        let engine = ScriptedEngine::new(0, "");
        let req = BackupRequest { dry_run: true, ..request(BackupType::Validate) };

        let disposition = run(&fx, &req, &PRIMARY, &engine).await?;
        let RunDisposition::Finished { outcome, detail_log, .. } = disposition else {
            panic!("expected a finished run");
        };
        assert_eq!(outcome, BackupOutcome::Skipped);
        assert_eq!(engine.calls.get(), 0);
        let detail = fs::read_to_string(detail_log)?;
        assert!(detail.contains("RESTORE ARCHIVELOG FROM SCN 100 UNTIL SCN 900 VALIDATE;"));
        Ok(())
    }

    #[tokio::test]
    async fn test_live_lock_rejects_without_running() -> anyhow::Result<()> {
        let fx = fixture(false);
        fs::create_dir_all(&fx.app_config.lock_dir)?;
        fs::write(lock_file(&fx), format!("{}\n", std::process::id()))?;
        let engine = ScriptedEngine::new(0, "");

        let disposition = run(&fx, &request(BackupType::Level0), &PRIMARY, &engine).await?;
        assert_eq!(disposition, RunDisposition::LockHeld { pid: std::process::id() });
        assert_eq!(engine.calls.get(), 0);
        assert!(lock_file(&fx).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_standby_password_reaches_rman_but_not_logs() -> anyhow::Result<()> {
        let fx = fixture(true);
        let engine = ScriptedEngine::new(0, "");

        let disposition = run(&fx, &request(BackupType::ArchiveLog), &STANDBY, &engine).await?;
        let RunDisposition::Finished { detail_log, .. } = disposition else {
            panic!("expected a finished run");
        };
        let script = engine.last_script.borrow().clone().unwrap();
        assert!(script.starts_with("CONNECT TARGET \"sys/s3cret@DB1_STBY AS SYSDBA\";"));
        assert!(!script.contains("CONFIGURE RETENTION POLICY"));

        let detail = fs::read_to_string(detail_log)?;
        assert!(!detail.contains("s3cret"));
        assert!(detail.contains("sys/********@DB1_STBY"));
        Ok(())
    }

    #[tokio::test]
    async fn test_precondition_failure_releases_lock() {
        let fx = fixture(false);
        let engine = ScriptedEngine::new(0, "");
        let db = FakeDatabase { status: "STARTED", role: "PRIMARY" };

        let result = run(&fx, &request(BackupType::Level0), &db, &engine).await;
        let err = result.unwrap_err();
        assert!(matches!(err.downcast_ref::<AppError>(), Some(AppError::Precondition(_))));
        assert_eq!(engine.calls.get(), 0);
        assert!(!lock_file(&fx).exists());
    }
}
