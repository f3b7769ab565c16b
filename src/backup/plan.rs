// rman-backup/src/backup/plan.rs
//! Turns (backup type, resolved config, database facts) into the ordered
//! RMAN directives of one script.
//!
//! Directives are typed until the very end; [`DirectiveSequence::render`]
//! produces the script text and [`DirectiveSequence::render_redacted`] the
//! copy that is safe to log.

use chrono::NaiveDateTime;
use std::fmt;

use crate::backup::BackupType;
use crate::backup::channels;
use crate::backup::facts::{Credential, DatabaseFacts, DatabaseRole, ScnWindow};
use crate::backup::format::{self, PieceKind, TagKind};
use crate::config::{BackupConfig, DeviceType, RetentionPolicy};

const DATAFILE_FILESPERSET: u32 = 1;
const ARCHIVELOG_FILESPERSET: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Connect(Option<Credential>),
    ConfigureRetention(RetentionPolicy),
    ConfigureAutobackupFormat { device_type: DeviceType, format: String },
    ConfigureAutobackupOn,
    ConfigureStandbyDeletionPolicy,
    RunBegin,
    AllocateChannel { index: u32, device_type: DeviceType, parms: Option<String> },
    ReleaseChannel { index: u32 },
    ArchiveLogCurrent,
    BackupDatabase { level: u8, compressed: bool, format: String, tag: String },
    BackupArchivelog { compressed: bool, copies: u32, format: String, tag: String },
    BackupControlfile { format: String, tag: String },
    KeepUntil { tag: String, keep_days: u32 },
    DeleteObsolete(RetentionPolicy),
    DeleteBackedUpArchivelog { copies: u32, device_type: DeviceType, keep_hours: u32 },
    DeleteArchivelog { keep_hours: u32 },
    CrosscheckBackup,
    ValidateDatabase { until_scn: Option<u64> },
    ValidateArchivelog { window: Option<ScnWindow> },
    RunEnd,
    ListBackupSummary,
    ReportNeedBackup,
    ListExpiredBackup,
    ListExpiredArchivelog,
    Exit,
}

impl Directive {
    fn write_to(&self, f: &mut fmt::Formatter<'_>, redact: bool) -> fmt::Result {
        match self {
            Directive::Connect(None) => write!(f, "CONNECT TARGET /;"),
            Directive::Connect(Some(credential)) => {
                let password = if redact { "********" } else { credential.password() };
                write!(
                    f,
                    "CONNECT TARGET \"{}/{}@{} AS SYSDBA\";",
                    credential.user, password, credential.service
                )
            }
            Directive::ConfigureRetention(policy) => write!(
                f,
                "CONFIGURE RETENTION POLICY TO {};",
                format::retention_clause(*policy)
            ),
            Directive::ConfigureAutobackupFormat { device_type, format } => write!(
                f,
                "CONFIGURE CONTROLFILE AUTOBACKUP FORMAT FOR DEVICE TYPE {} TO '{}';",
                device_type.rman_name(),
                format
            ),
            Directive::ConfigureAutobackupOn => write!(f, "CONFIGURE CONTROLFILE AUTOBACKUP ON;"),
            Directive::ConfigureStandbyDeletionPolicy => write!(
                f,
                "CONFIGURE ARCHIVELOG DELETION POLICY TO APPLIED ON ALL STANDBY;"
            ),
            Directive::RunBegin => write!(f, "RUN {{"),
            Directive::AllocateChannel { index, device_type, parms } => {
                write!(f, "ALLOCATE CHANNEL CH{} DEVICE TYPE {}", index, device_type.rman_name())?;
                if let Some(parms) = parms {
                    write!(f, " PARMS '{}'", parms)?;
                }
                write!(f, ";")
            }
            Directive::ReleaseChannel { index } => write!(f, "RELEASE CHANNEL CH{};", index),
            Directive::ArchiveLogCurrent => write!(f, "SQL 'ALTER SYSTEM ARCHIVE LOG CURRENT';"),
            Directive::BackupDatabase { level, compressed, format, tag } => write!(
                f,
                "BACKUP {}INCREMENTAL LEVEL {} FILESPERSET {} FORMAT '{}' TAG '{}' DATABASE;",
                compression_prefix(*compressed),
                level,
                DATAFILE_FILESPERSET,
                format,
                tag
            ),
            Directive::BackupArchivelog { compressed, copies, format, tag } => write!(
                f,
                "BACKUP {}FILESPERSET {} FORMAT '{}' TAG '{}' ARCHIVELOG ALL NOT BACKED UP {} TIMES;",
                compression_prefix(*compressed),
                ARCHIVELOG_FILESPERSET,
                format,
                tag,
                copies
            ),
            Directive::BackupControlfile { format, tag } => write!(
                f,
                "BACKUP CURRENT CONTROLFILE FORMAT '{}' TAG '{}';",
                format, tag
            ),
            Directive::KeepUntil { tag, keep_days } => write!(
                f,
                "CHANGE BACKUP TAG '{}' KEEP UNTIL TIME 'SYSDATE+{}';",
                tag, keep_days
            ),
            Directive::DeleteObsolete(policy) => write!(
                f,
                "DELETE NOPROMPT OBSOLETE {};",
                format::retention_clause(*policy)
            ),
            Directive::DeleteBackedUpArchivelog { copies, device_type, keep_hours } => write!(
                f,
                "DELETE NOPROMPT ARCHIVELOG ALL BACKED UP {} TIMES TO DEVICE TYPE {} COMPLETED BEFORE 'SYSDATE-{}/24';",
                copies,
                device_type.rman_name(),
                keep_hours
            ),
            Directive::DeleteArchivelog { keep_hours } => write!(
                f,
                "DELETE NOPROMPT ARCHIVELOG ALL COMPLETED BEFORE 'SYSDATE-{}/24';",
                keep_hours
            ),
            Directive::CrosscheckBackup => write!(f, "CROSSCHECK BACKUP;"),
            Directive::ValidateDatabase { until_scn: Some(scn) } => {
                write!(f, "RESTORE DATABASE UNTIL SCN {} VALIDATE;", scn)
            }
            Directive::ValidateDatabase { until_scn: None } => write!(f, "RESTORE DATABASE VALIDATE;"),
            Directive::ValidateArchivelog { window: Some(window) } => write!(
                f,
                "RESTORE ARCHIVELOG FROM SCN {} UNTIL SCN {} VALIDATE;",
                window.min, window.max
            ),
            Directive::ValidateArchivelog { window: None } => {
                write!(f, "RESTORE ARCHIVELOG ALL VALIDATE;")
            }
            Directive::RunEnd => write!(f, "}}"),
            Directive::ListBackupSummary => write!(f, "LIST BACKUP SUMMARY;"),
            Directive::ReportNeedBackup => write!(f, "REPORT NEED BACKUP;"),
            Directive::ListExpiredBackup => write!(f, "LIST EXPIRED BACKUP;"),
            Directive::ListExpiredArchivelog => write!(f, "LIST EXPIRED ARCHIVELOG ALL;"),
            Directive::Exit => write!(f, "EXIT;"),
        }
    }
}

fn compression_prefix(compressed: bool) -> String {
    let clause = format::compression_clause(compressed);
    if clause.is_empty() { String::new() } else { format!("{} ", clause) }
}

/// Renders the directive exactly as RMAN receives it, credentials included.
impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_to(f, false)
    }
}

struct Redacted<'a>(&'a Directive);

impl fmt::Display for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.write_to(f, true)
    }
}

/// One RMAN script. Append-only while the generator builds it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectiveSequence {
    directives: Vec<Directive>,
}

impl DirectiveSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, directive: Directive) {
        self.directives.push(directive);
    }

    pub fn extend(&mut self, directives: impl IntoIterator<Item = Directive>) {
        self.directives.extend(directives);
    }

    pub fn render(&self) -> String {
        let mut script = String::new();
        for directive in &self.directives {
            script.push_str(&directive.to_string());
            script.push('\n');
        }
        script
    }

    pub fn render_redacted(&self) -> String {
        let mut script = String::new();
        for directive in &self.directives {
            script.push_str(&Redacted(directive).to_string());
            script.push('\n');
        }
        script
    }
}

#[cfg(test)]
impl DirectiveSequence {
    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    pub fn lines(&self) -> Vec<String> {
        self.directives.iter().map(|d| d.to_string()).collect()
    }
}

/// Tags computed once per plan so that a backup and the `CHANGE ... KEEP`
/// that follows it always name the same tag.
struct PlanTags {
    database: String,
    archivelog: String,
    controlfile: String,
}

impl PlanTags {
    fn new(backup_type: BackupType, config: &BackupConfig, generated_at: NaiveDateTime) -> Self {
        let build = |kind: TagKind| {
            format::tag(
                kind,
                config.keep_days,
                config.tag.as_deref(),
                generated_at,
                format::expiration_date,
            )
        };
        let database_kind = match backup_type {
            BackupType::Level1 => TagKind::Level1,
            _ => TagKind::Level0,
        };
        PlanTags {
            database: build(database_kind),
            archivelog: build(TagKind::Archivelog),
            controlfile: build(TagKind::Controlfile),
        }
    }
}

/// Generates the complete script for one invocation.
///
/// `generated_at` stamps every tag; two calls with identical arguments
/// return identical sequences.
pub fn generate_plan(
    backup_type: BackupType,
    config: &BackupConfig,
    facts: &DatabaseFacts,
    generated_at: NaiveDateTime,
) -> DirectiveSequence {
    let tags = PlanTags::new(backup_type, config, generated_at);
    let device_type = config.device.device_type();
    let is_primary = facts.role == DatabaseRole::Primary;
    let mut plan = DirectiveSequence::new();

    let credential = match facts.role {
        DatabaseRole::PhysicalStandby => facts.credential.clone(),
        DatabaseRole::Primary => None,
    };
    plan.push(Directive::Connect(credential));

    // Retention configuration is only touched on the primary; standbys
    // rely on the explicit clause of DELETE OBSOLETE below.
    if is_primary {
        plan.push(Directive::ConfigureRetention(config.retention));
    }
    plan.push(Directive::ConfigureAutobackupFormat {
        device_type,
        format: format::controlfile_format(&config.device),
    });
    plan.push(Directive::ConfigureAutobackupOn);
    if facts.has_standby {
        plan.push(Directive::ConfigureStandbyDeletionPolicy);
    }

    plan.push(Directive::RunBegin);
    plan.extend(channels::allocate(config.channels, &config.device));

    match backup_type {
        BackupType::ArchiveLogDelete => {
            plan.push(Directive::DeleteArchivelog { keep_hours: config.archive_keep_hours });
        }
        BackupType::ArchiveLog => {
            push_archivelog_backup(&mut plan, config, is_primary, &tags.archivelog);
        }
        BackupType::Level0 | BackupType::Level1 => {
            let (level, kind) = match backup_type {
                BackupType::Level1 => (1, PieceKind::DatafileLevel1),
                _ => (0, PieceKind::DatafileLevel0),
            };
            plan.push(Directive::BackupDatabase {
                level,
                compressed: config.compressed,
                format: format::backup_format(&config.device, kind),
                tag: tags.database.clone(),
            });
            match config.keep_days {
                Some(keep_days) => plan.push(Directive::KeepUntil {
                    tag: tags.database.clone(),
                    keep_days,
                }),
                None => plan.push(Directive::DeleteObsolete(config.retention)),
            }
            push_archivelog_backup(&mut plan, config, is_primary, &tags.archivelog);
        }
        BackupType::Validate => {
            plan.push(Directive::ValidateDatabase {
                until_scn: facts.scn_window.map(|w| w.max),
            });
            plan.push(Directive::ValidateArchivelog { window: facts.scn_window });
        }
    }

    if backup_type.writes_backups() {
        if config.keep_days.is_none() {
            plan.push(Directive::BackupControlfile {
                format: format::backup_format(&config.device, PieceKind::Controlfile),
                tag: tags.controlfile.clone(),
            });
        }
        plan.push(Directive::CrosscheckBackup);
    }

    plan.extend(channels::release(config.channels));
    plan.push(Directive::RunEnd);

    plan.push(Directive::ListBackupSummary);
    if is_primary {
        plan.push(Directive::ReportNeedBackup);
    }
    plan.push(Directive::ListExpiredBackup);
    plan.push(Directive::ListExpiredArchivelog);
    plan.push(Directive::Exit);
    plan
}

/// Log switch (primary only), archivelog backup, then either a KEEP on the
/// new backup or removal of archivelogs already backed up often enough.
fn push_archivelog_backup(
    plan: &mut DirectiveSequence,
    config: &BackupConfig,
    is_primary: bool,
    tag: &str,
) {
    if is_primary {
        plan.push(Directive::ArchiveLogCurrent);
    }
    plan.push(Directive::BackupArchivelog {
        compressed: config.compressed,
        copies: config.archive_copies,
        format: format::backup_format(&config.device, PieceKind::Archivelog),
        tag: tag.to_string(),
    });
    match config.keep_days {
        Some(keep_days) => plan.push(Directive::KeepUntil { tag: tag.to_string(), keep_days }),
        None => plan.push(Directive::DeleteBackedUpArchivelog {
            copies: config.archive_copies,
            device_type: config.device.device_type(),
            keep_hours: config.archive_keep_hours,
        }),
    }
}
