//! XenServer plugin - host and VM metrics for carbon or collectd
//!
//! Polls the XenAPI `rrd_updates` handler on a fixed interval and forwards
//! the newest sample of every host and VM parameter:
//! - `--console`: one cycle printed as carbon lines, then exit
//! - `--collectd-exec`: PUTVAL lines on stdout, forever
//! - `--server/--port`: plaintext carbon over TCP, forever

mod collector;
mod config;
mod discovery;
mod rrd;
mod xapi;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use collector::Collector;
use config::{keyring_password, log_settings, Cli, FileConfig, Mode, Settings};
use plugin_kit::logging::init_logging;
use plugin_kit::{run_once, run_plugin, CarbonEmitter, CarbonPath, ConsoleEmitter, LineProtocolEmitter, Output, Plugin};
use rrd::RrdUpdates;
use std::time::Instant;
use tracing::info;
use xapi::XapiClient;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let file = FileConfig::load(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    let log_guard = init_logging(&log_settings(&cli, &file))?;

    let settings = match Settings::resolve(&cli, &file, keyring_password) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("{}", Cli::command().render_usage());
            drop(log_guard);
            std::process::exit(1);
        }
    };

    let client = XapiClient::new(settings.base_url()).context("Failed to build XenAPI client")?;
    let source = RrdUpdates::new(settings.base_url(), settings.cf.as_str(), settings.rrd_interval)
        .context("Failed to build rrd_updates client")?;
    info!(
        url = %settings.base_url(),
        mode = ?settings.mode,
        step = settings.collector.step,
        start = source.window().start,
        "XenServer plugin starting"
    );

    let mut collector = Collector::new(client, settings.credentials.clone(), source, settings.collector.clone());

    match &settings.mode {
        Mode::Console => {
            let output = Output::Console(ConsoleEmitter::new(CarbonPath::MetricType));
            let started = Instant::now();
            let result = run_once(&mut collector, &output).await;
            collector.shutdown().await;
            let sent = result?;
            info!(sent, elapsed_ms = started.elapsed().as_millis() as u64, "Console cycle complete");
        }
        Mode::CollectdExec => {
            let output = Output::CollectdExec(LineProtocolEmitter);
            run_plugin(&mut collector, &output, &settings.schedule()).await?;
        }
        Mode::Carbon { server, port } => {
            let output = Output::Carbon(CarbonEmitter::new(server.as_str(), *port, CarbonPath::MetricType));
            run_plugin(&mut collector, &output, &settings.schedule()).await?;
        }
    }

    Ok(())
}
