//! Configuration management
//!
//! Handles:
//! - CLI flags (clap)
//! - Optional TOML file (`--config`, or `<config dir>/graphite-plugins/xenserver.toml`)
//! - XenAPI password lookup in the OS keyring
//!
//! Precedence: defaults, then the file, then the command line.

use crate::collector::{CollectorSettings, Credentials};
use anyhow::{Context, Result};
use clap::Parser;
use keyring::Entry;
use plugin_kit::logging::{LogSettings, DEFAULT_LOG_FILE};
use plugin_kit::Schedule;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_STEP_SECS: u64 = 10;
pub const DEFAULT_CARBON_PORT: u16 = 2003;
const DEFAULT_USER: &str = "root";
const DEFAULT_CF: &str = "AVERAGE";
const DEFAULT_RRD_INTERVAL: u64 = 5;
const DEFAULT_RECONNECT_EVERY: u32 = 60;
const KEYRING_SERVICE: &str = "graphite-plugins";

#[derive(Debug, Clone, Parser)]
#[command(name = "xenserver-plugin", version, about = "Send XenServer host and VM metrics to carbon or collectd")]
pub struct Cli {
    /// Print the data to the console and exit
    #[arg(long)]
    pub console: bool,

    /// Print PUTVAL lines for the collectd exec plugin
    #[arg(long)]
    pub collectd_exec: bool,

    /// XenServer address (local XenAPI when omitted)
    #[arg(long)]
    pub host: Option<String>,

    /// XenAPI user name
    #[arg(short, long)]
    pub user: Option<String>,

    /// XenAPI password
    #[arg(short, long)]
    pub passwd: Option<String>,

    /// Carbon server address
    #[arg(long)]
    pub server: Option<String>,

    /// Carbon server port
    #[arg(long)]
    pub port: Option<String>,

    /// Seconds between polls
    #[arg(long)]
    pub step: Option<String>,

    /// Debug logging to the log file
    #[arg(long)]
    pub verbose: bool,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log file used with --verbose
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Polls per XenAPI session before reconnecting
    #[arg(long)]
    pub reconnect_every: Option<u32>,

    /// Cap in seconds for exponential backoff after failed cycles (fixed interval when unset)
    #[arg(long)]
    pub max_backoff: Option<u64>,

    /// rrd_updates consolidation function
    #[arg(long)]
    pub cf: Option<String>,

    /// Skip host-level metrics
    #[arg(long)]
    pub no_host_metrics: bool,
}

/// Contents of the TOML file; every key is optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub host: Option<String>,
    pub user: Option<String>,
    pub passwd: Option<String>,
    pub server: Option<String>,
    pub port: Option<u16>,
    pub step: Option<u64>,
    pub cf: Option<String>,
    pub rrd_interval: Option<u64>,
    pub reconnect_every: Option<u32>,
    pub max_backoff_secs: Option<u64>,
    pub graph_host: Option<bool>,
    pub log_file: Option<PathBuf>,
}

impl FileConfig {
    pub fn default_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("graphite-plugins");
        path.push("xenserver.toml");
        Some(path)
    }

    /// Load `explicit`, or the default file when it exists
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Console,
    CollectdExec,
    Carbon { server: String, port: u16 },
}

/// Relay mode selected without a server and a port
#[derive(Debug, thiserror::Error)]
#[error("Please input a server and a port for the socket to send data to carbon")]
pub struct MissingRelay;

#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: Mode,
    pub host: Option<String>,
    pub credentials: Credentials,
    pub collector: CollectorSettings,
    pub cf: String,
    pub rrd_interval: u64,
    pub max_backoff: Option<Duration>,
}

impl Settings {
    pub fn resolve(
        cli: &Cli,
        file: &FileConfig,
        keyring: impl FnOnce(&str) -> Option<String>,
    ) -> Result<Self, MissingRelay> {
        let mode = if cli.console {
            Mode::Console
        } else if cli.collectd_exec {
            Mode::CollectdExec
        } else {
            let server = cli.server.clone().or_else(|| file.server.clone());
            let port = match &cli.port {
                Some(raw) => Some(parse_or_default("port", raw, DEFAULT_CARBON_PORT)),
                None => file.port,
            };
            match (server, port) {
                (Some(server), Some(port)) => Mode::Carbon { server, port },
                _ => return Err(MissingRelay),
            }
        };

        let step = match &cli.step {
            Some(raw) => parse_or_default("step", raw, DEFAULT_STEP_SECS),
            None => file.step.unwrap_or(DEFAULT_STEP_SECS),
        };

        let user = cli
            .user
            .clone()
            .or_else(|| file.user.clone())
            .unwrap_or_else(|| DEFAULT_USER.to_string());
        let passwd = resolve_password(cli.passwd.as_deref(), file.passwd.as_deref(), &user, keyring);

        Ok(Self {
            mode,
            host: cli.host.clone().or_else(|| file.host.clone()),
            credentials: Credentials { user, passwd },
            collector: CollectorSettings {
                step,
                reconnect_every: cli
                    .reconnect_every
                    .or(file.reconnect_every)
                    .unwrap_or(DEFAULT_RECONNECT_EVERY)
                    .max(1),
                graph_host: !cli.no_host_metrics && file.graph_host.unwrap_or(true),
            },
            cf: cli
                .cf
                .clone()
                .or_else(|| file.cf.clone())
                .unwrap_or_else(|| DEFAULT_CF.to_string()),
            rrd_interval: file.rrd_interval.unwrap_or(DEFAULT_RRD_INTERVAL),
            max_backoff: cli
                .max_backoff
                .or(file.max_backoff_secs)
                .map(Duration::from_secs),
        })
    }

    /// XenAPI endpoint; the local XenAPI when no host is configured
    pub fn base_url(&self) -> String {
        match &self.host {
            Some(host) => format!("http://{}", host),
            None => "http://localhost".to_string(),
        }
    }

    pub fn schedule(&self) -> Schedule {
        Schedule::fixed(Duration::from_secs(self.collector.step)).with_max_backoff(self.max_backoff)
    }
}

pub fn log_settings(cli: &Cli, file: &FileConfig) -> LogSettings {
    LogSettings {
        verbose: cli.verbose,
        file: cli
            .log_file
            .clone()
            .or_else(|| file.log_file.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE)),
    }
}

fn parse_or_default<T: std::str::FromStr + std::fmt::Display + Copy>(name: &str, raw: &str, default: T) -> T {
    raw.trim().parse().unwrap_or_else(|_| {
        warn!("{} must be an integer, got {:?}, using {}", name, raw, default);
        default
    })
}

/// Command line (backslashes stripped), then config file, then keyring
fn resolve_password(
    cli: Option<&str>,
    file: Option<&str>,
    user: &str,
    keyring: impl FnOnce(&str) -> Option<String>,
) -> String {
    if let Some(passwd) = cli {
        return passwd.replace('\\', "");
    }
    if let Some(passwd) = file {
        return passwd.to_string();
    }
    keyring(user).unwrap_or_default()
}

/// Password stored under the `graphite-plugins` service for `user`
pub fn keyring_password(user: &str) -> Option<String> {
    match Entry::new(KEYRING_SERVICE, user) {
        Ok(entry) => stored_password(&entry, user),
        Err(e) => {
            debug!("Keyring unavailable: {}", e);
            None
        }
    }
}

fn stored_password(entry: &Entry, user: &str) -> Option<String> {
    match entry.get_password() {
        Ok(passwd) => Some(passwd),
        Err(e) => {
            debug!(user, "No keyring password: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["xenserver-plugin"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    fn no_keyring(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_console_defaults() {
        let settings = Settings::resolve(&cli(&["--console"]), &FileConfig::default(), no_keyring).unwrap();
        assert_eq!(settings.mode, Mode::Console);
        assert_eq!(settings.credentials.user, "root");
        assert_eq!(settings.credentials.passwd, "");
        assert_eq!(settings.collector, CollectorSettings::default());
        assert_eq!(settings.cf, "AVERAGE");
        assert_eq!(settings.rrd_interval, 5);
        assert_eq!(settings.max_backoff, None);
        assert_eq!(settings.base_url(), "http://localhost");
    }

    #[test]
    fn test_relay_requires_server_and_port() {
        let file = FileConfig::default();
        assert!(Settings::resolve(&cli(&[]), &file, no_keyring).is_err());
        assert!(Settings::resolve(&cli(&["--server", "relay"]), &file, no_keyring).is_err());
        assert!(Settings::resolve(&cli(&["--port", "2003"]), &file, no_keyring).is_err());

        let settings = Settings::resolve(&cli(&["--server", "relay", "--port", "2004"]), &file, no_keyring).unwrap();
        assert_eq!(
            settings.mode,
            Mode::Carbon {
                server: "relay".to_string(),
                port: 2004
            }
        );
    }

    #[test]
    fn test_bad_numbers_fall_back() {
        let settings = Settings::resolve(
            &cli(&["--server", "relay", "--port", "twenty", "--step", "often"]),
            &FileConfig::default(),
            no_keyring,
        )
        .unwrap();
        assert_eq!(
            settings.mode,
            Mode::Carbon {
                server: "relay".to_string(),
                port: DEFAULT_CARBON_PORT
            }
        );
        assert_eq!(settings.collector.step, DEFAULT_STEP_SECS);
    }

    #[test]
    fn test_password_precedence() {
        assert_eq!(resolve_password(Some("p\\a\\ss"), Some("file"), "root", |_| Some("ring".into())), "pass");
        assert_eq!(resolve_password(None, Some("file"), "root", |_| Some("ring".into())), "file");
        assert_eq!(resolve_password(None, None, "ops", |user| Some(format!("ring-{}", user))), "ring-ops");
        assert_eq!(resolve_password(None, None, "root", no_keyring), "");
    }

    #[test]
    fn test_keyring_entry_lookup() {
        keyring::set_default_credential_builder(keyring::mock::default_credential_builder());

        let entry = Entry::new(KEYRING_SERVICE, "monitor").unwrap();
        assert_eq!(stored_password(&entry, "monitor"), None);

        entry.set_password("stored-secret").unwrap();
        assert_eq!(stored_password(&entry, "monitor").as_deref(), Some("stored-secret"));
        assert_eq!(
            resolve_password(None, None, "monitor", |user| stored_password(&entry, user)),
            "stored-secret"
        );
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = FileConfig {
            host: Some("10.0.0.5".to_string()),
            user: Some("monitor".to_string()),
            server: Some("relay-a".to_string()),
            port: Some(2003),
            step: Some(30),
            graph_host: Some(true),
            max_backoff_secs: Some(300),
            ..FileConfig::default()
        };
        let settings = Settings::resolve(
            &cli(&["--server", "relay-b", "--step", "15", "--no-host-metrics", "--reconnect-every", "0"]),
            &file,
            no_keyring,
        )
        .unwrap();

        assert_eq!(
            settings.mode,
            Mode::Carbon {
                server: "relay-b".to_string(),
                port: 2003
            }
        );
        assert_eq!(settings.base_url(), "http://10.0.0.5");
        assert_eq!(settings.credentials.user, "monitor");
        assert_eq!(settings.collector.step, 15);
        assert_eq!(settings.collector.reconnect_every, 1);
        assert!(!settings.collector.graph_host);
        assert_eq!(settings.schedule().max_backoff, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_short_flags() {
        let parsed = cli(&["--collectd-exec", "-u", "admin", "-p", "secret"]);
        assert!(parsed.collectd_exec);
        assert_eq!(parsed.user.as_deref(), Some("admin"));
        assert_eq!(parsed.passwd.as_deref(), Some("secret"));
    }

    #[tokio::test]
    async fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "host = \"xen01\"\nstep = 20\ncf = \"MAX\"\nrrd_interval = 60").unwrap();

        let config = FileConfig::load(Some(file.path())).await.unwrap();
        assert_eq!(config.host.as_deref(), Some("xen01"));
        assert_eq!(config.step, Some(20));
        assert_eq!(config.cf.as_deref(), Some("MAX"));
        assert_eq!(config.rrd_interval, Some(60));
        assert_eq!(config.passwd, None);
    }

    #[tokio::test]
    async fn test_load_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "step = \"soon\"").unwrap();
        assert!(FileConfig::load(Some(file.path())).await.is_err());
    }

    #[test]
    fn test_log_settings() {
        let settings = log_settings(&cli(&["--console", "--verbose"]), &FileConfig::default());
        assert!(settings.verbose);
        assert_eq!(settings.file, PathBuf::from(DEFAULT_LOG_FILE));

        let settings = log_settings(&cli(&["--console", "--log-file", "/tmp/x.log"]), &FileConfig::default());
        assert_eq!(settings.file, PathBuf::from("/tmp/x.log"));
    }

    #[test]
    fn test_default_path() {
        if let Some(path) = FileConfig::default_path() {
            assert!(path.ends_with("graphite-plugins/xenserver.toml"));
        }
    }
}
