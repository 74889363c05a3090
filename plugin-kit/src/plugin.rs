//! Plugin trait and the fixed-interval poll runner
//!
//! A plugin only knows how to prepare one batch of records. The runner owns
//! the schedule: prepare, deliver, sleep, repeat. Cycles never overlap and
//! the sleep does not account for how long the cycle took.

use crate::output::Output;
use crate::record::MetricRecord;
use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A metric source polled by [`run_plugin`]
#[allow(async_fn_in_trait)]
pub trait Plugin {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Produce this cycle's batch
    async fn prepare_data(&mut self) -> Result<Vec<MetricRecord>>;

    /// Release external resources (sessions, connections). Best effort.
    async fn shutdown(&mut self) {}
}

/// Inter-cycle sleep policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub step: Duration,
    /// When set, consecutive failed cycles back off exponentially up to this cap.
    /// When unset the loop sleeps exactly `step` whatever happened.
    pub max_backoff: Option<Duration>,
}

impl Schedule {
    pub fn fixed(step: Duration) -> Self {
        Self { step, max_backoff: None }
    }

    pub fn with_max_backoff(mut self, max_backoff: Option<Duration>) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Sleep duration before the next cycle
    pub fn delay_after(&self, consecutive_failures: u32) -> Duration {
        let Some(cap) = self.max_backoff else {
            return self.step;
        };
        if consecutive_failures == 0 {
            return self.step;
        }
        let factor = 2u32.saturating_pow(consecutive_failures - 1);
        self.step.saturating_mul(factor).min(cap.max(self.step))
    }
}

/// Prepare and deliver a single batch
pub async fn run_once<P: Plugin>(plugin: &mut P, output: &Output) -> Result<usize> {
    let records = plugin
        .prepare_data()
        .await
        .with_context(|| format!("{} failed to prepare data", plugin.name()))?;
    let sent = output
        .deliver(&records)
        .await
        .context("Failed to emit batch")?;
    Ok(sent)
}

/// Poll forever until Ctrl-C or SIGTERM, then shut the plugin down
pub async fn run_plugin<P: Plugin>(plugin: &mut P, output: &Output, schedule: &Schedule) -> Result<()> {
    run_loop(plugin, output, schedule, None, shutdown_signal()).await
}

pub(crate) async fn run_loop<P, S>(
    plugin: &mut P,
    output: &Output,
    schedule: &Schedule,
    max_cycles: Option<u64>,
    shutdown: S,
) -> Result<()>
where
    P: Plugin,
    S: Future<Output = ()>,
{
    info!(plugin = plugin.name(), step_secs = schedule.step.as_secs(), "Starting poll loop");
    tokio::pin!(shutdown);

    let mut cycles: u64 = 0;
    let mut failures: u32 = 0;

    loop {
        let outcome = tokio::select! {
            _ = &mut shutdown => break,
            outcome = run_once(plugin, output) => outcome,
        };

        match outcome {
            Ok(sent) => {
                failures = 0;
                debug!(plugin = plugin.name(), sent, "Cycle complete");
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                error!(plugin = plugin.name(), failures, "Cycle failed: {:#}", e);
            }
        }

        cycles += 1;
        if max_cycles.is_some_and(|max| cycles >= max) {
            break;
        }

        let delay = schedule.delay_after(failures);
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    info!(plugin = plugin.name(), cycles, "Poll loop stopped, shutting down");
    plugin.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
