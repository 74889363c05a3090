//! Local diagnostic command execution
//!
//! Runs a status command with a timeout and hands back its stdout. Anything
//! on stderr counts as a failure: squidclient reports connection problems
//! there while still exiting 0.

use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum DiagnosticError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
    #[error("{program} reported an error: {stderr}")]
    Stderr { program: String, stderr: String },
}

#[derive(Debug, Clone)]
pub struct DiagnosticCommand {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl DiagnosticCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// `squidclient -h <host> -p <port> mgr:info`
    pub fn squidclient(host: &str, port: u16) -> Self {
        Self::new(
            "squidclient",
            vec![
                "-h".to_string(),
                host.to_string(),
                "-p".to_string(),
                port.to_string(),
                "mgr:info".to_string(),
            ],
        )
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[cfg(test)]
    pub fn program(&self) -> &str {
        &self.program
    }

    pub async fn run(&self) -> Result<String, DiagnosticError> {
        let started = Instant::now();
        debug!(program = %self.program, args = ?self.args, "Running diagnostic command");

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.program)
                .args(&self.args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| DiagnosticError::Timeout {
            program: self.program.clone(),
            timeout: self.timeout,
        })?
        .map_err(|source| DiagnosticError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            return Err(DiagnosticError::Stderr {
                program: self.program.clone(),
                stderr: stderr.trim().to_string(),
            });
        }

        debug!(
            program = %self.program,
            exit_code = ?output.status.code(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Diagnostic command finished"
        );
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
