// rman-backup/src/backup/rman_exec.rs
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use tempfile::Builder as TempFileBuilder;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::backup::plan::DirectiveSequence;
use crate::errors::{AppError, Result};
use crate::report::DetailLog;
use crate::utils::OracleEnv;

/// What the backup engine reported for one script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineRun {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub output: String,
}

/// Runs a generated script. Implemented by [`Rman`] in production.
pub trait BackupEngine {
    async fn execute(&self, plan: &DirectiveSequence, detail_log: &mut DetailLog) -> Result<EngineRun>;
}

pub struct Rman {
    executable: PathBuf,
    env: OracleEnv,
}

impl Rman {
    pub fn new(env: &OracleEnv) -> Result<Self> {
        Ok(Rman {
            executable: env.find_executable("rman")?,
            env: env.clone(),
        })
    }
}

impl BackupEngine for Rman {
    /// Writes the script to a private temp file and runs `rman cmdfile=...`
    /// once. Output lines go to the detail log as they arrive.
    async fn execute(&self, plan: &DirectiveSequence, detail_log: &mut DetailLog) -> Result<EngineRun> {
        let mut script = TempFileBuilder::new()
            .prefix(&format!("rman_{}_", self.env.oracle_sid))
            .suffix(".rcv")
            .tempfile()?;
        script.write_all(plan.render().as_bytes())?;
        script.flush()?;

        info!(rman = %self.executable.display(), "starting rman");
        let mut child = Command::new(&self.executable)
            .arg(format!("cmdfile={}", script.path().display()))
            .envs(self.env.vars())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Execution("rman stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Execution("rman stderr unavailable".to_string()))?;

        let output = match collect_output(stdout, stderr, detail_log).await {
            Ok(output) => output,
            Err(e) => {
                // rman must not outlive its cmdfile
                warn!("lost rman output, stopping rman: {}", e);
                if let Err(kill_err) = child.kill().await {
                    warn!("failed to stop rman: {}", kill_err);
                }
                return Err(e);
            }
        };

        let status = child.wait().await?;
        info!(%status, "rman finished");
        Ok(EngineRun {
            exit_code: status.code(),
            output,
        })
    }
}

/// Interleaves stdout and stderr line by line into the detail log.
///
/// RMAN prints in the session character set, so lines are decoded lossily
/// instead of being rejected when they are not UTF-8.
async fn collect_output<O, E>(stdout: O, stderr: E, detail_log: &mut DetailLog) -> Result<String>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut stdout_lines = BufReader::new(stdout).split(b'\n');
    let mut stderr_lines = BufReader::new(stderr).split(b'\n');

    let mut output = String::new();
    let (mut stdout_done, mut stderr_done) = (false, false);
    while !(stdout_done && stderr_done) {
        let segment = tokio::select! {
            segment = stdout_lines.next_segment(), if !stdout_done => match segment? {
                Some(segment) => Some(segment),
                None => {
                    stdout_done = true;
                    None
                }
            },
            segment = stderr_lines.next_segment(), if !stderr_done => match segment? {
                Some(segment) => Some(segment),
                None => {
                    stderr_done = true;
                    None
                }
            },
        };
        if let Some(segment) = segment {
            let line = decode_line(&segment);
            debug!(target: "rman", "{}", line);
            detail_log.write_line(&line)?;
            output.push_str(&line);
            output.push('\n');
        }
    }
    Ok(output)
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim_end_matches('\r').to_string()
}
