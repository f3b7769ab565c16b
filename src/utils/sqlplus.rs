// rman-backup/src/utils/sqlplus.rs
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::debug;

use super::OracleEnv;
use crate::errors::{AppError, Result};

/// Runs one scalar query against the target database.
pub trait QueryExecutor {
    fn run(&self, query: &str) -> Result<String>;
}

const SQLPLUS_SETTINGS: &str =
    "SET HEADING OFF FEEDBACK OFF PAGESIZE 0 LINESIZE 200 TRIMOUT ON TRIMSPOOL ON VERIFY OFF ECHO OFF";

/// `sqlplus -S / as sysdba`, fed through stdin.
pub struct SqlPlus {
    executable: PathBuf,
    env: OracleEnv,
}

impl SqlPlus {
    pub fn new(env: &OracleEnv) -> Result<Self> {
        Ok(SqlPlus {
            executable: env.find_executable("sqlplus")?,
            env: env.clone(),
        })
    }
}

impl QueryExecutor for SqlPlus {
    fn run(&self, query: &str) -> Result<String> {
        debug!(query, "running sqlplus query");
        let query_error = |stderr: String| AppError::Query { query: query.to_string(), stderr };

        let mut child = Command::new(&self.executable)
            .arg("-S")
            .arg("/ as sysdba")
            .envs(self.env.vars())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| query_error("sqlplus stdin unavailable".to_string()))?;
            stdin.write_all(session_script(query).as_bytes())?;
        }

        let output = child.wait_with_output()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            return Err(query_error(format!(
                "sqlplus exited with {}: {}{}",
                output.status,
                stdout.trim(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        parse_scalar(&stdout).map_err(query_error)
    }
}

fn session_script(query: &str) -> String {
    let query = query.trim().trim_end_matches(';');
    format!(
        "{}\nWHENEVER SQLERROR EXIT FAILURE\n{};\nEXIT;\n",
        SQLPLUS_SETTINGS, query
    )
}

/// First non-empty output line. Error lines from sqlplus are returned as `Err`
/// carrying the full output.
fn parse_scalar(stdout: &str) -> std::result::Result<String, String> {
    let lines: Vec<&str> = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines
        .iter()
        .any(|l| l.starts_with("ORA-") || l.starts_with("SP2-") || l.starts_with("ERROR"))
    {
        return Err(lines.join("\n"));
    }
    Ok(lines.first().map(|l| l.to_string()).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::install_tool;

    #[test]
    fn test_session_script_terminates_query_once() {
        let script = session_script("SELECT status FROM v$instance;");
        assert!(script.contains("\nSELECT status FROM v$instance;\nEXIT;\n"));
        assert!(script.starts_with("SET HEADING OFF"));
    }

    #[test]
    fn test_parse_scalar_takes_first_line() {
        assert_eq!(parse_scalar("\n  OPEN  \n\n"), Ok("OPEN".to_string()));
        assert_eq!(parse_scalar("\n\n"), Ok(String::new()));
    }

    fn sqlplus_with(body: &str) -> (tempfile::TempDir, SqlPlus) {
        let home = tempfile::tempdir().unwrap();
        install_tool(home.path(), "sqlplus", body).unwrap();
        let env = OracleEnv { oracle_home: home.path().to_path_buf(), oracle_sid: "DB1".to_string() };
        let sqlplus = SqlPlus::new(&env).unwrap();
        (home, sqlplus)
    }

    #[test]
    fn test_run_feeds_query_on_stdin_as_sysdba() -> anyhow::Result<()> {
        let (_home, sqlplus) = sqlplus_with(concat!(
            "[ \"$1\" = \"-S\" ] && [ \"$2\" = \"/ as sysdba\" ] || exit 9\n",
            "input=$(cat)\n",
            "case \"$input\" in\n",
            "  *'FROM v$instance;'*) printf '\\nOPEN\\n' ;;\n",
            "  *) echo 'ORA-00942: table or view does not exist' ;;\n",
            "esac\n",
        ));

        assert_eq!(sqlplus.run("SELECT status FROM v$instance")?, "OPEN");
        Ok(())
    }

    #[test]
    fn test_run_reports_ora_lines_as_query_errors() {
        let (_home, sqlplus) =
            sqlplus_with("cat >/dev/null\necho 'ORA-00942: table or view does not exist'\n");

        match sqlplus.run("SELECT x FROM missing") {
            Err(AppError::Query { query, stderr }) => {
                assert_eq!(query, "SELECT x FROM missing");
                assert!(stderr.contains("ORA-00942"));
            }
            other => panic!("expected a query error, got {:?}", other),
        }
    }

    #[test]
    fn test_run_reports_non_zero_exit() {
        let (_home, sqlplus) = sqlplus_with(
            "cat >/dev/null\necho 'ORA-01034: ORACLE not available'\necho 'connect failed' >&2\nexit 1\n",
        );

        match sqlplus.run("SELECT status FROM v$instance") {
            Err(AppError::Query { stderr, .. }) => {
                assert!(stderr.contains("sqlplus exited with"));
                assert!(stderr.contains("ORA-01034"));
                assert!(stderr.contains("connect failed"));
            }
            other => panic!("expected a query error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_scalar_surfaces_errors() {
        let err = parse_scalar("ERROR at line 1:\nORA-00942: table or view does not exist\n").unwrap_err();
        assert!(err.contains("ORA-00942"));
    }
}
