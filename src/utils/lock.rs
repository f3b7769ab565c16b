// rman-backup/src/utils/lock.rs
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::backup::BackupType;
use crate::errors::{AppError, Result};

/// Exclusive ownership of one lock file. The file is removed on drop.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "lock released"),
            Err(e) => warn!(path = %self.path.display(), "failed to remove lock file: {}", e),
        }
    }
}

#[derive(Debug)]
pub enum LockAttempt {
    Acquired(LockGuard),
    /// Another live process owns the lock.
    Held { pid: u32 },
}

/// `<DB>.lock`, or `<DB>_<type>.lock` when locking per backup type.
pub fn lock_path(lock_dir: &Path, db_name: &str, backup_type: Option<BackupType>) -> PathBuf {
    match backup_type {
        Some(t) => lock_dir.join(format!("{}_{}.lock", db_name, t)),
        None => lock_dir.join(format!("{}.lock", db_name)),
    }
}

/// Serializes every check-and-create on one lock directory, so a lock file is
/// never seen before its PID is written and a stale file is never removed
/// after someone else has replaced it.
const ACQUIRE_GUARD_FILE: &str = ".rman-backup.acquire";

/// Takes the PID lock at `path`, reclaiming it when its owner is gone.
pub fn acquire(path: &Path) -> Result<LockAttempt> {
    let lock_dir = path
        .parent()
        .ok_or_else(|| AppError::Lock(format!("{} has no parent directory", path.display())))?;
    fs::create_dir_all(lock_dir)?;

    let guard = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_dir.join(ACQUIRE_GUARD_FILE))?;
    guard.lock_exclusive()?;
    let attempt = acquire_serialized(path);
    let unlocked = FileExt::unlock(&guard);
    let attempt = attempt?;
    unlocked?;
    Ok(attempt)
}

fn acquire_serialized(path: &Path) -> Result<LockAttempt> {
    // Second pass only happens after a stale lock was removed.
    for _ in 0..2 {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                file.sync_all()?;
                debug!(path = %path.display(), "lock acquired");
                return Ok(LockAttempt::Acquired(LockGuard { path: path.to_path_buf() }));
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let owner = fs::read_to_string(path)
                    .ok()
                    .and_then(|content| content.trim().parse::<u32>().ok());
                match owner {
                    Some(pid) if process_alive(pid) => return Ok(LockAttempt::Held { pid }),
                    _ => {
                        warn!(path = %path.display(), owner = ?owner, "removing stale lock");
                        match fs::remove_file(path) {
                            Ok(()) => {}
                            Err(e) if e.kind() == ErrorKind::NotFound => {}
                            Err(e) => return Err(e.into()),
                        }
                    }
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(AppError::Lock(format!(
        "could not acquire {} after removing a stale lock",
        path.display()
    )))
}

fn process_alive(pid: u32) -> bool {
    pid != 0 && Path::new("/proc").join(pid.to_string()).exists()
}
