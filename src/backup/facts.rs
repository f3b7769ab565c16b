// rman-backup/src/backup/facts.rs
use std::fmt;
use tracing::debug;

use crate::backup::BackupType;
use crate::config::{BackupConfig, RetentionPolicy};
use crate::errors::{AppError, Result};
use crate::utils::sqlplus::QueryExecutor;

const INSTANCE_STATUS_QUERY: &str = "SELECT status FROM v$instance";
const DATABASE_ROLE_QUERY: &str = "SELECT database_role FROM v$database";
const STANDBY_DEST_QUERY: &str =
    "SELECT COUNT(*) FROM v$archive_dest WHERE target = 'STANDBY' AND status = 'VALID'";
const CURRENT_SCN_QUERY: &str = "SELECT TO_CHAR(current_scn) FROM v$database";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseRole {
    Primary,
    PhysicalStandby,
}

impl DatabaseRole {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PRIMARY" => Ok(DatabaseRole::Primary),
            "PHYSICAL STANDBY" => Ok(DatabaseRole::PhysicalStandby),
            other => Err(AppError::Precondition(format!(
                "unsupported database role '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for DatabaseRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseRole::Primary => f.write_str("PRIMARY"),
            DatabaseRole::PhysicalStandby => f.write_str("PHYSICAL STANDBY"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Open,
    Mounted,
}

impl InstanceStatus {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "OPEN" => Ok(InstanceStatus::Open),
            "MOUNTED" => Ok(InstanceStatus::Mounted),
            other => Err(AppError::Precondition(format!(
                "instance is '{}', expected OPEN or MOUNTED",
                other
            ))),
        }
    }
}

/// Inclusive SCN range a validate run is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScnWindow {
    pub min: u64,
    pub max: u64,
}

/// Decrypted login for a standby connection. `Debug` never shows the password.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub user: String,
    password: String,
    pub service: String,
}

impl Credential {
    pub fn new(user: impl Into<String>, password: impl Into<String>, service: impl Into<String>) -> Self {
        Credential {
            user: user.into(),
            password: password.into(),
            service: service.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &"********")
            .field("service", &self.service)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseFacts {
    pub role: DatabaseRole,
    pub status: InstanceStatus,
    pub has_standby: bool,
    pub scn_window: Option<ScnWindow>,
    pub credential: Option<Credential>,
}

/// Instance status and database role; enough to decide whether to run at all.
pub fn probe_instance<Q: QueryExecutor + ?Sized>(queries: &Q) -> Result<(InstanceStatus, DatabaseRole)> {
    let status = InstanceStatus::parse(&queries.run(INSTANCE_STATUS_QUERY)?)?;
    let role = DatabaseRole::parse(&queries.run(DATABASE_ROLE_QUERY)?)?;
    debug!(?status, %role, "instance probed");
    Ok((status, role))
}

/// Collects the remaining facts the plan generator needs.
///
/// The credential is left empty; it is resolved separately and only for standbys.
pub fn gather_facts<Q: QueryExecutor + ?Sized>(
    queries: &Q,
    status: InstanceStatus,
    role: DatabaseRole,
    backup_type: BackupType,
    config: &BackupConfig,
) -> Result<DatabaseFacts> {
    let standby_destinations = parse_number(STANDBY_DEST_QUERY, &queries.run(STANDBY_DEST_QUERY)?)?;

    let scn_window = if backup_type == BackupType::Validate {
        Some(scn_window(queries, config)?)
    } else {
        None
    };

    Ok(DatabaseFacts {
        role,
        status,
        has_standby: standby_destinations > 0,
        scn_window,
        credential: None,
    })
}

fn scn_window<Q: QueryExecutor + ?Sized>(queries: &Q, config: &BackupConfig) -> Result<ScnWindow> {
    let min_query = min_scn_query(config);
    let min_raw = queries.run(&min_query)?;
    if min_raw.trim().is_empty() {
        return Err(AppError::Precondition(
            "no archived logs inside the retention window, nothing to validate".to_string(),
        ));
    }
    let min = parse_number(&min_query, &min_raw)?;
    let max = parse_number(CURRENT_SCN_QUERY, &queries.run(CURRENT_SCN_QUERY)?)?;
    if min > max {
        return Err(AppError::Precondition(format!(
            "validate window is empty: min SCN {} is above current SCN {}",
            min, max
        )));
    }
    Ok(ScnWindow { min, max })
}

/// Oldest archived log still covered by retention. A recovery window maps
/// to days, redundancy has no time bound so the archive keep hours apply.
fn min_scn_query(config: &BackupConfig) -> String {
    let horizon = match config.retention {
        RetentionPolicy::RecoveryWindow(days) => format!("SYSDATE - {}", days),
        RetentionPolicy::Redundancy(_) => format!("SYSDATE - {}/24", config.archive_keep_hours),
    };
    format!(
        "SELECT TO_CHAR(MIN(first_change#)) FROM v$archived_log WHERE completion_time > {}",
        horizon
    )
}

fn parse_number(query: &str, raw: &str) -> Result<u64> {
    raw.trim().parse::<u64>().map_err(|_| AppError::Query {
        query: query.to_string(),
        stderr: format!("expected a number, got '{}'", raw.trim()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Device;
    use std::collections::HashMap;
    use std::path::PathBuf;

    struct CannedQueries(HashMap<&'static str, &'static str>);

    impl QueryExecutor for CannedQueries {
        fn run(&self, query: &str) -> Result<String> {
            self.0
                .iter()
                .find(|(needle, _)| query.contains(*needle))
                .map(|(_, answer)| answer.to_string())
                .ok_or_else(|| AppError::Query { query: query.to_string(), stderr: "unexpected".to_string() })
        }
    }

    fn config(retention: RetentionPolicy) -> BackupConfig {
        BackupConfig {
            db_name: "DB1".to_string(),
            oracle_sid: "DB1".to_string(),
            device: Device::Disk { destination: PathBuf::from("/backup/db1") },
            retention,
            channels: 1,
            compressed: false,
            keep_days: None,
            tag: None,
            archive_keep_hours: 36,
            archive_copies: 1,
            standby_login: None,
        }
    }

    fn queries(pairs: &[(&'static str, &'static str)]) -> CannedQueries {
        CannedQueries(pairs.iter().copied().collect())
    }

    #[test]
    fn test_probe_instance_parses_status_and_role() -> anyhow::Result<()> {
        let q = queries(&[("v$instance", "MOUNTED"), ("database_role", "PHYSICAL STANDBY")]);
        assert_eq!(probe_instance(&q)?, (InstanceStatus::Mounted, DatabaseRole::PhysicalStandby));
        Ok(())
    }

    #[test]
    fn test_probe_instance_rejects_started_instance() {
        let q = queries(&[("v$instance", "STARTED"), ("database_role", "PRIMARY")]);
        assert!(matches!(probe_instance(&q), Err(AppError::Precondition(_))));
    }

    #[test]
    fn test_probe_instance_rejects_unknown_role() {
        let q = queries(&[("v$instance", "OPEN"), ("database_role", "LOGICAL STANDBY")]);
        assert!(matches!(probe_instance(&q), Err(AppError::Precondition(_))));
    }

    #[test]
    fn test_gather_facts_counts_standby_destinations() -> anyhow::Result<()> {
        let q = queries(&[("v$archive_dest", "2")]);
        let facts = gather_facts(
            &q,
            InstanceStatus::Open,
            DatabaseRole::Primary,
            BackupType::Level0,
            &config(RetentionPolicy::RecoveryWindow(7)),
        )?;
        assert!(facts.has_standby);
        assert_eq!(facts.scn_window, None);
        Ok(())
    }

    #[test]
    fn test_validate_collects_scn_window() -> anyhow::Result<()> {
        let q = queries(&[
            ("v$archive_dest", "0"),
            ("SYSDATE - 7", "1200"),
            ("current_scn", "98765"),
        ]);
        let facts = gather_facts(
            &q,
            InstanceStatus::Open,
            DatabaseRole::Primary,
            BackupType::Validate,
            &config(RetentionPolicy::RecoveryWindow(7)),
        )?;
        assert!(!facts.has_standby);
        assert_eq!(facts.scn_window, Some(ScnWindow { min: 1200, max: 98765 }));
        Ok(())
    }

    #[test]
    fn test_redundancy_policy_bounds_window_by_archive_hours() {
        let query = min_scn_query(&config(RetentionPolicy::Redundancy(2)));
        assert!(query.ends_with("completion_time > SYSDATE - 36/24"));
    }

    #[test]
    fn test_validate_without_archived_logs_is_a_precondition_error() {
        let q = queries(&[("v$archive_dest", "0"), ("first_change#", ""), ("current_scn", "10")]);
        let result = gather_facts(
            &q,
            InstanceStatus::Open,
            DatabaseRole::Primary,
            BackupType::Validate,
            &config(RetentionPolicy::RecoveryWindow(7)),
        );
        assert!(matches!(result, Err(AppError::Precondition(_))));
    }

    #[test]
    fn test_inverted_scn_window_is_rejected() {
        let q = queries(&[("v$archive_dest", "0"), ("first_change#", "500"), ("current_scn", "10")]);
        let result = gather_facts(
            &q,
            InstanceStatus::Open,
            DatabaseRole::Primary,
            BackupType::Validate,
            &config(RetentionPolicy::RecoveryWindow(7)),
        );
        assert!(matches!(result, Err(AppError::Precondition(_))));
    }

    #[test]
    fn test_credential_debug_hides_password() {
        let credential = Credential::new("sys", "s3cret", "DB1");
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("sys"));
    }
}
