// rman-backup/src/config/mod.rs
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::errors::{AppError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
pub const CONFIG_PATH_ENV: &str = "RMAN_BACKUP_CONFIG";

const DEFAULT_RECOVERY_WINDOW_DAYS: u32 = 7;
const DEFAULT_ARCHIVE_KEEP_HOURS: u32 = 24;
const DEFAULT_SECRET_KEY_ENV: &str = "RMAN_SECRET_KEY";
const DEFAULT_MAIL_COMMAND: &str = "mailx";
/// Standby apply lag warnings that RMAN reports on every archivelog deletion.
const DEFAULT_IGNORED_CODES: &[&str] = &["RMAN-08120", "RMAN-08137"];
/// RMAN refuses longer tags.
const MAX_TAG_LEN: usize = 30;
/// `_E<ddmmyyyy>` appended to every tag of a keep backup.
const EXPIRATION_SUFFIX_LEN: usize = 10;

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDatabaseSettings {
    pub oracle_sid: Option<String>,
    pub device_type: Option<String>,
    pub destination: Option<PathBuf>,
    pub tape_env: Option<String>,
    pub redundancy: Option<u32>,
    pub recovery_window_days: Option<u32>,
    pub channels: Option<u32>,
    pub compressed: Option<bool>,
    pub keep_days: Option<u32>,
    pub tag: Option<String>,
    pub archive_keep_hours: Option<u32>,
    pub archive_copies: Option<u32>,
    pub standby_password: Option<bool>,
    pub standby_user: Option<String>,
    pub standby_service: Option<String>,
}

impl RawDatabaseSettings {
    /// Field-by-field overlay: values set on `self` win over `defaults`.
    fn overlay(&self, defaults: &RawDatabaseSettings) -> RawDatabaseSettings {
        fn pick<T: Clone>(own: &Option<T>, fallback: &Option<T>) -> Option<T> {
            own.clone().or_else(|| fallback.clone())
        }

        RawDatabaseSettings {
            oracle_sid: pick(&self.oracle_sid, &defaults.oracle_sid),
            device_type: pick(&self.device_type, &defaults.device_type),
            destination: pick(&self.destination, &defaults.destination),
            tape_env: pick(&self.tape_env, &defaults.tape_env),
            redundancy: pick(&self.redundancy, &defaults.redundancy),
            recovery_window_days: pick(&self.recovery_window_days, &defaults.recovery_window_days),
            channels: pick(&self.channels, &defaults.channels),
            compressed: pick(&self.compressed, &defaults.compressed),
            keep_days: pick(&self.keep_days, &defaults.keep_days),
            tag: pick(&self.tag, &defaults.tag),
            archive_keep_hours: pick(&self.archive_keep_hours, &defaults.archive_keep_hours),
            archive_copies: pick(&self.archive_copies, &defaults.archive_copies),
            standby_password: pick(&self.standby_password, &defaults.standby_password),
            standby_user: pick(&self.standby_user, &defaults.standby_user),
            standby_service: pick(&self.standby_service, &defaults.standby_service),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawNotifyConfig {
    pub enabled: Option<bool>,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub fatal_recipients: Option<Vec<String>>,
    pub mail_on_success: Option<bool>,
    pub mail_command: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub oracle_home: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub lock_dir: Option<PathBuf>,
    pub secrets_dir: Option<PathBuf>,
    pub secret_key_env: Option<String>,
    #[serde(default)]
    pub lock_per_backup_type: bool,
    pub ignore_error_codes: Option<Vec<String>>,
    #[serde(default)]
    pub notify: RawNotifyConfig,
    #[serde(default)]
    pub defaults: RawDatabaseSettings,
    #[serde(default)]
    pub databases: HashMap<String, RawDatabaseSettings>,
}

// Application's internal configuration structs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Tape,
    Disk,
}

impl DeviceType {
    /// Device type keyword as RMAN expects it.
    pub fn rman_name(self) -> &'static str {
        match self {
            DeviceType::Tape => "SBT_TAPE",
            DeviceType::Disk => "DISK",
        }
    }
}

impl FromStr for DeviceType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disk" => Ok(DeviceType::Disk),
            "tape" | "sbt" | "sbt_tape" => Ok(DeviceType::Tape),
            other => Err(AppError::Config(format!(
                "unknown device_type '{}', expected 'disk' or 'tape'",
                other
            ))),
        }
    }
}

/// Where backup pieces go. Tape carries the media manager environment,
/// disk carries the destination directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Device {
    Tape { env: String },
    Disk { destination: PathBuf },
}

impl Device {
    pub fn device_type(&self) -> DeviceType {
        match self {
            Device::Tape { .. } => DeviceType::Tape,
            Device::Disk { .. } => DeviceType::Disk,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    Redundancy(u32),
    RecoveryWindow(u32),
}

impl RetentionPolicy {
    /// Redundancy wins when both are configured; neither means a seven day window.
    pub fn from_settings(redundancy: Option<u32>, recovery_window_days: Option<u32>) -> Self {
        match (redundancy, recovery_window_days) {
            (Some(n), _) => RetentionPolicy::Redundancy(n),
            (None, Some(days)) => RetentionPolicy::RecoveryWindow(days),
            (None, None) => RetentionPolicy::RecoveryWindow(DEFAULT_RECOVERY_WINDOW_DAYS),
        }
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionPolicy::Redundancy(n) => write!(f, "REDUNDANCY {}", n),
            RetentionPolicy::RecoveryWindow(days) => write!(f, "RECOVERY WINDOW OF {} DAYS", days),
        }
    }
}

/// Login used when the target is a physical standby and OS authentication is not enough.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandbyLogin {
    pub user: String,
    pub service: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    pub db_name: String,
    pub oracle_sid: String,
    pub device: Device,
    pub retention: RetentionPolicy,
    pub channels: u32,
    pub compressed: bool,
    pub keep_days: Option<u32>,
    pub tag: Option<String>,
    pub archive_keep_hours: u32,
    pub archive_copies: u32,
    pub standby_login: Option<StandbyLogin>,
}

#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub enabled: bool,
    pub recipients: Vec<String>,
    pub fatal_recipients: Vec<String>,
    pub mail_on_success: bool,
    pub mail_command: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub oracle_home: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub lock_dir: PathBuf,
    pub secrets_dir: PathBuf,
    pub secret_key_env: String,
    pub lock_per_backup_type: bool,
    pub ignore_error_codes: Vec<String>,
    pub notify: NotifyConfig,
    pub raw_json_config: RawJsonConfig,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            AppError::Config(format!(
                "failed to read config file at {}: {}",
                config_path.display(),
                e
            ))
        })?;
        Self::from_json_str(&config_content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw_json_config: RawJsonConfig = serde_json::from_str(content)?;
        Ok(Self::from_raw(raw_json_config))
    }

    fn from_raw(raw: RawJsonConfig) -> Self {
        let notify_raw = &raw.notify;
        let recipients: Vec<String> = notify_raw
            .recipients
            .iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        let fatal_recipients = notify_raw
            .fatal_recipients
            .clone()
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| recipients.clone());

        let notify = NotifyConfig {
            enabled: notify_raw.enabled.unwrap_or(true),
            recipients,
            fatal_recipients,
            mail_on_success: notify_raw.mail_on_success.unwrap_or(true),
            mail_command: notify_raw
                .mail_command
                .clone()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MAIL_COMMAND.to_string()),
        };

        AppConfig {
            oracle_home: raw.oracle_home.clone(),
            log_dir: raw.log_dir.clone().unwrap_or_else(|| PathBuf::from("./log")),
            lock_dir: raw.lock_dir.clone().unwrap_or_else(std::env::temp_dir),
            secrets_dir: raw.secrets_dir.clone().unwrap_or_else(|| PathBuf::from("./secrets")),
            secret_key_env: raw
                .secret_key_env
                .clone()
                .unwrap_or_else(|| DEFAULT_SECRET_KEY_ENV.to_string()),
            lock_per_backup_type: raw.lock_per_backup_type,
            ignore_error_codes: raw.ignore_error_codes.clone().unwrap_or_else(|| {
                DEFAULT_IGNORED_CODES.iter().map(|c| c.to_string()).collect()
            }),
            notify,
            raw_json_config: raw,
        }
    }

    /// Resolves the effective backup configuration for one database.
    ///
    /// Per-database settings override `defaults`. A disk destination is created
    /// here so that an unusable destination is reported before anything runs.
    pub fn resolve(&self, db_name: &str) -> Result<BackupConfig> {
        let raw = &self.raw_json_config;
        let (key, db_settings) = raw
            .databases
            .iter()
            .find(|(name, _)| name.as_str() == db_name)
            .or_else(|| {
                raw.databases
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(db_name))
            })
            .ok_or_else(|| {
                AppError::Config(format!("database '{}' is not configured", db_name))
            })?;
        let settings = db_settings.overlay(&raw.defaults);

        let device_type: DeviceType = settings
            .device_type
            .as_deref()
            .ok_or_else(|| AppError::Config(format!("device_type must be set for {}", key)))?
            .parse()?;

        let device = match device_type {
            DeviceType::Tape => {
                let env = settings
                    .tape_env
                    .filter(|e| !e.trim().is_empty())
                    .ok_or_else(|| {
                        AppError::Config(format!("tape_env must be set for tape backups of {}", key))
                    })?;
                Device::Tape { env }
            }
            DeviceType::Disk => {
                let destination = settings
                    .destination
                    .filter(|d| !d.as_os_str().is_empty())
                    .ok_or_else(|| {
                        AppError::Config(format!("destination must be set for disk backups of {}", key))
                    })?;
                fs::create_dir_all(&destination).map_err(|e| {
                    AppError::Config(format!(
                        "backup destination {} cannot be created: {}",
                        destination.display(),
                        e
                    ))
                })?;
                Device::Disk { destination }
            }
        };

        let channels = settings.channels.unwrap_or(1);
        if channels == 0 {
            return Err(AppError::Config(format!("channels must be at least 1 for {}", key)));
        }
        let archive_copies = settings.archive_copies.unwrap_or(1);
        if archive_copies == 0 {
            return Err(AppError::Config(format!(
                "archive_copies must be at least 1 for {}",
                key
            )));
        }

        let standby_login = if settings.standby_password.unwrap_or(false) {
            Some(StandbyLogin {
                user: settings.standby_user.unwrap_or_else(|| "sys".to_string()),
                service: settings.standby_service.unwrap_or_else(|| key.clone()),
            })
        } else {
            None
        };

        let tag = settings.tag.filter(|t| !t.trim().is_empty());
        check_tag(key, tag.as_deref(), settings.keep_days)?;

        Ok(BackupConfig {
            db_name: key.clone(),
            oracle_sid: settings.oracle_sid.unwrap_or_else(|| key.clone()),
            device,
            retention: RetentionPolicy::from_settings(
                settings.redundancy,
                settings.recovery_window_days,
            ),
            channels,
            compressed: settings.compressed.unwrap_or(false),
            keep_days: settings.keep_days,
            tag,
            archive_keep_hours: settings.archive_keep_hours.unwrap_or(DEFAULT_ARCHIVE_KEEP_HOURS),
            archive_copies,
            standby_login,
        })
    }
}

impl BackupConfig {
    /// Applies `--keep-days` / `--tag` from the command line on top of the file values.
    pub fn with_overrides(mut self, keep_days: Option<u32>, tag: Option<String>) -> Result<Self> {
        if keep_days.is_some() {
            self.keep_days = keep_days;
        }
        if let Some(tag) = tag.filter(|t| !t.trim().is_empty()) {
            self.tag = Some(tag);
        }
        check_tag(&self.db_name, self.tag.as_deref(), self.keep_days)?;
        Ok(self)
    }
}

/// A tag override must still fit once a keep backup appends its expiration suffix.
fn check_tag(db_name: &str, tag: Option<&str>, keep_days: Option<u32>) -> Result<()> {
    let Some(tag) = tag else {
        return Ok(());
    };
    let limit = match keep_days {
        Some(_) => MAX_TAG_LEN - EXPIRATION_SUFFIX_LEN,
        None => MAX_TAG_LEN,
    };
    if tag.len() > limit {
        return Err(AppError::Config(format!(
            "tag '{}' for {} is {} characters, at most {} are allowed{}",
            tag,
            db_name,
            tag.len(),
            limit,
            if keep_days.is_some() { " with keep_days" } else { "" }
        )));
    }
    Ok(())
}
