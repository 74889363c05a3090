//! Squid plugin - file descriptor usage for carbon or collectd
//!
//! Runs `squidclient mgr:info` every step and forwards the file descriptor
//! counters as `<hostname>.squid.<type>` metrics. Loops in every mode.

mod diagnostic;
mod execution;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use diagnostic::SquidPlugin;
use execution::DiagnosticCommand;
use plugin_kit::logging::{init_logging, LogSettings, DEFAULT_LOG_FILE};
use plugin_kit::{run_plugin, CarbonEmitter, CarbonPath, ConsoleEmitter, LineProtocolEmitter, Output, Schedule};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_STEP_SECS: u64 = 30;
const DEFAULT_CARBON_PORT: u16 = 2003;

#[derive(Debug, Clone, Parser)]
#[command(name = "squid-plugin", version, about = "Send squid file descriptor usage to carbon or collectd")]
struct Cli {
    /// Print the data to the console
    #[arg(long)]
    console: bool,

    /// Print PUTVAL lines for the collectd exec plugin
    #[arg(long)]
    collectd_exec: bool,

    /// Carbon server address
    #[arg(long)]
    server: Option<String>,

    /// Carbon server port
    #[arg(long)]
    port: Option<String>,

    /// Seconds between polls
    #[arg(long)]
    step: Option<String>,

    /// Debug logging to the log file
    #[arg(long)]
    verbose: bool,

    /// Log file used with --verbose
    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    /// Address squidclient connects to
    #[arg(long, default_value = "127.0.0.1")]
    squid_host: String,

    /// Port squidclient connects to
    #[arg(long, default_value_t = 80)]
    squid_port: u16,

    /// squidclient timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Cap in seconds for exponential backoff after failed cycles (fixed interval when unset)
    #[arg(long)]
    max_backoff: Option<u64>,
}

impl Cli {
    /// `None` when no output mode is usable
    fn output(&self) -> Option<Output> {
        if self.console {
            return Some(Output::Console(ConsoleEmitter::new(CarbonPath::EndpointMetricType)));
        }
        if self.collectd_exec {
            return Some(Output::CollectdExec(LineProtocolEmitter));
        }
        let server = self.server.as_deref()?;
        let port = self.port.as_deref()?;
        let port = port.trim().parse().unwrap_or_else(|_| {
            warn!("Port must be an integer, got {:?}, using {}", port, DEFAULT_CARBON_PORT);
            DEFAULT_CARBON_PORT
        });
        Some(Output::Carbon(CarbonEmitter::new(server, port, CarbonPath::EndpointMetricType)))
    }

    fn step(&self) -> u64 {
        match &self.step {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!("Step must be an integer, got {:?}, using {}", raw, DEFAULT_STEP_SECS);
                DEFAULT_STEP_SECS
            }),
            None => DEFAULT_STEP_SECS,
        }
    }

    fn schedule(&self) -> Schedule {
        Schedule::fixed(Duration::from_secs(self.step())).with_max_backoff(self.max_backoff.map(Duration::from_secs))
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_guard = init_logging(&LogSettings {
        verbose: cli.verbose,
        file: cli.log_file.clone(),
    })?;

    let Some(output) = cli.output() else {
        eprintln!("{}", Cli::command().render_help());
        drop(log_guard);
        std::process::exit(1);
    };

    let endpoint = gethostname::gethostname().to_string_lossy().to_string();
    let command = DiagnosticCommand::squidclient(&cli.squid_host, cli.squid_port)
        .with_timeout(Duration::from_secs(cli.timeout));
    let mut plugin = SquidPlugin::new(command, endpoint.as_str(), cli.step());

    info!(endpoint = %endpoint, step = cli.step(), "Squid plugin starting");
    run_plugin(&mut plugin, &output, &cli.schedule()).await
}
