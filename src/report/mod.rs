// rman-backup/src/report/mod.rs
pub mod notify;

use chrono::NaiveDateTime;
use fs2::FileExt;
use regex::Regex;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use uuid::Uuid;

use crate::backup::BackupType;
use crate::errors::Result;

pub const SESSION_LOG_FILE: &str = "rman_sessions.log";

static ERROR_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:RMAN|ORA)-\d{5}\b").expect("error marker pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupOutcome {
    Success,
    Warning,
    Failed,
    Skipped,
}

impl BackupOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupOutcome::Success => "SUCCESS",
            BackupOutcome::Warning => "WARNING",
            BackupOutcome::Failed => "FAILED",
            BackupOutcome::Skipped => "SKIPPED",
        }
    }
}

impl fmt::Display for BackupOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Distinct `RMAN-nnnnn` / `ORA-nnnnn` codes in `output` that are not ignored,
/// in order of first appearance.
pub fn error_markers(output: &str, ignored: &[String]) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for marker in ERROR_MARKER.find_iter(output) {
        let code = marker.as_str();
        if ignored.iter().any(|i| i == code) || found.iter().any(|f| f == code) {
            continue;
        }
        found.push(code.to_string());
    }
    found
}

/// Non-zero exit (or death by signal) is a failure no matter what was printed.
/// A clean exit with unignored error markers is a warning.
pub fn classify(exit_code: Option<i32>, output: &str, ignored: &[String]) -> BackupOutcome {
    match exit_code {
        Some(0) if error_markers(output, ignored).is_empty() => BackupOutcome::Success,
        Some(0) => BackupOutcome::Warning,
        _ => BackupOutcome::Failed,
    }
}

/// One line of the shared session log.
#[derive(Debug, Clone)]
pub struct SessionRecord<'a> {
    pub timestamp: NaiveDateTime,
    pub db_name: &'a str,
    pub backup_type: BackupType,
    pub session_id: Uuid,
    pub status: &'a str,
}

impl fmt::Display for SessionRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}|{}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.db_name,
            self.backup_type,
            self.session_id,
            self.status
        )
    }
}

/// Append-only log shared by every invocation on the host.
pub struct SessionLog {
    path: PathBuf,
}

impl SessionLog {
    pub fn new(log_dir: &Path) -> Self {
        SessionLog { path: log_dir.join(SESSION_LOG_FILE) }
    }

    /// Writes one record under an exclusive file lock.
    pub fn append(&self, record: &SessionRecord<'_>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.lock_exclusive()?;
        let written = file
            .write_all(format!("{}\n", record).as_bytes())
            .and_then(|_| file.flush());
        let unlocked = FileExt::unlock(&file);
        written?;
        unlocked?;
        Ok(())
    }
}

/// Detail log of a single run: header, redacted script, engine output.
pub struct DetailLog {
    path: PathBuf,
    file: File,
}

impl DetailLog {
    pub fn create(
        log_dir: &Path,
        db_name: &str,
        backup_type: BackupType,
        started_at: NaiveDateTime,
    ) -> Result<Self> {
        fs::create_dir_all(log_dir)?;
        let path = log_dir.join(format!(
            "{}_{}_{}.log",
            db_name,
            backup_type,
            started_at.format("%Y%m%d_%H%M%S")
        ));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(DetailLog { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.file, "{}", line)?;
        Ok(())
    }

    pub fn write_block(&mut self, title: &str, body: &str) -> Result<()> {
        writeln!(self.file, "===== {} =====", title)?;
        self.file.write_all(body.as_bytes())?;
        if !body.ends_with('\n') {
            writeln!(self.file)?;
        }
        Ok(())
    }

    pub fn contents(&mut self) -> Result<String> {
        self.file.flush()?;
        Ok(fs::read_to_string(&self.path)?)
    }
}
