//! Logging bootstrap for plugin binaries
//!
//! Verbose mode writes DEBUG and above to a rolling log file. Otherwise only
//! warnings and errors reach stderr; stdout is left alone because the
//! collectd exec protocol reads it.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

pub const DEFAULT_LOG_FILE: &str = "/var/log/graphitePlugin.log";
const MAX_LOG_FILES: usize = 5;

#[derive(Debug, Clone)]
pub struct LogSettings {
    pub verbose: bool,
    pub file: PathBuf,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            verbose: false,
            file: PathBuf::from(DEFAULT_LOG_FILE),
        }
    }
}

impl LogSettings {
    fn default_directive(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "warn"
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.default_directive()))
    }
}

/// Install the global subscriber. Keep the returned guard alive for the
/// whole program, dropping it flushes and stops the file writer.
pub fn init_logging(settings: &LogSettings) -> Result<Option<WorkerGuard>> {
    if !settings.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(settings.filter())
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))?;
        return Ok(None);
    }

    let appender = file_appender(&settings.file)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(settings.filter())
        .with_writer(writer)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))?;

    Ok(Some(guard))
}

fn file_appender(path: &Path) -> Result<RollingFileAppender> {
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let prefix = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("graphitePlugin.log");

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(MAX_LOG_FILES)
        .build(directory)
        .with_context(|| format!("Failed to open log file under {}", directory.display()))
}
