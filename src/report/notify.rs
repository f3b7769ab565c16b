// rman-backup/src/report/notify.rs
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{info, warn};
use which::which;

use super::BackupOutcome;
use crate::backup::BackupType;
use crate::config::{AppConfig, NotifyConfig};
use crate::errors::{AppError, Result};

/// Sends mail through a `mailx` compatible command: `<cmd> -s <subject> <rcpt>...`
/// with the body on stdin.
pub struct Mailer {
    command: String,
}

impl Mailer {
    pub fn new(command: &str) -> Self {
        Mailer { command: command.to_string() }
    }

    pub async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<()> {
        let executable = which(&self.command)
            .map_err(|_| AppError::Execution(format!("{} not found in PATH", self.command)))?;

        let mut child = Command::new(executable)
            .arg("-s")
            .arg(subject)
            .args(recipients)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(body.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(AppError::Execution(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    /// Mail failures are logged and otherwise ignored.
    pub async fn send_best_effort(&self, recipients: &[String], subject: &str, body: &str) {
        if recipients.is_empty() {
            return;
        }
        match self.send(recipients, subject, body).await {
            Ok(()) => info!(?recipients, subject, "notification sent"),
            Err(e) => warn!(subject, "failed to send notification: {}", e),
        }
    }

    pub async fn notify_fatal(&self, app_config: &AppConfig, db_name: &str, backup_type: BackupType, error: &str) {
        let subject = subject(db_name, backup_type, "FATAL", &host_name());
        self.send_best_effort(&app_config.notify.fatal_recipients, &subject, error).await;
    }
}

/// Whether a finished run should be mailed.
pub fn should_notify(notify: &NotifyConfig, outcome: BackupOutcome, no_mail: bool, dry_run: bool) -> bool {
    if no_mail || dry_run || !notify.enabled || notify.recipients.is_empty() {
        return false;
    }
    match outcome {
        BackupOutcome::Success => notify.mail_on_success,
        BackupOutcome::Skipped => false,
        BackupOutcome::Warning | BackupOutcome::Failed => true,
    }
}

pub fn subject(db_name: &str, backup_type: BackupType, status: &str, host: &str) -> String {
    format!("RMAN {} {} {} on {}", db_name, backup_type, status, host)
}

pub fn host_name() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-host".to_string())
}
