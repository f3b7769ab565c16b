pub mod lock;
pub mod secret;
pub mod sqlplus;

use std::path::{Path, PathBuf};
use which::which;

use crate::errors::{AppError, Result};

/// Date format RMAN uses in its output; keeps log timestamps readable.
const NLS_DATE_FORMAT: &str = "DD.MM.YYYY HH24:MI:SS";

/// Environment every Oracle client process of one invocation runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleEnv {
    pub oracle_home: PathBuf,
    pub oracle_sid: String,
}

impl OracleEnv {
    /// `oracle_home` from the config file wins over `$ORACLE_HOME`.
    pub fn resolve(configured_home: Option<&Path>, oracle_sid: &str) -> Result<Self> {
        let oracle_home = match configured_home {
            Some(home) => home.to_path_buf(),
            None => std::env::var_os("ORACLE_HOME")
                .map(PathBuf::from)
                .ok_or_else(|| {
                    AppError::Config("ORACLE_HOME is neither configured nor set in the environment".to_string())
                })?,
        };
        if oracle_sid.trim().is_empty() {
            return Err(AppError::Config("ORACLE_SID cannot be empty".to_string()));
        }
        Ok(OracleEnv {
            oracle_home,
            oracle_sid: oracle_sid.to_string(),
        })
    }

    /// Variables to set on a child process.
    pub fn vars(&self) -> Vec<(&'static str, String)> {
        vec![
            ("ORACLE_HOME", self.oracle_home.display().to_string()),
            ("ORACLE_SID", self.oracle_sid.clone()),
            ("NLS_DATE_FORMAT", NLS_DATE_FORMAT.to_string()),
            ("LD_LIBRARY_PATH", self.oracle_home.join("lib").display().to_string()),
        ]
    }

    /// Finds an Oracle client tool, `$ORACLE_HOME/bin` first, then `PATH`.
    pub fn find_executable(&self, name: &str) -> Result<PathBuf> {
        let in_home = self.oracle_home.join("bin").join(name);
        if in_home.is_file() {
            return Ok(in_home);
        }
        which(name).map_err(|_| {
            AppError::Config(format!(
                "{} executable not found in {} or PATH. Please ensure the Oracle client tools are installed.",
                name,
                self.oracle_home.join("bin").display()
            ))
        })
    }
}
