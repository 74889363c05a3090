//! XenServer poll cycle
//!
//! Session lifecycle:
//! - Disconnected → Connected: login, then name discovery
//! - Connected: each poll fetches one report and turns it into records
//! - back to Disconnected after `reconnect_every` polls on one session, on a
//!   fetch failure, or at shutdown (logout is best effort)

use crate::discovery::EntityNameMap;
use crate::rrd::extract;
use crate::rrd::index::{EntityReport, ReportIndex};
use crate::rrd::legend;
use crate::rrd::{RawReport, ReportSource, RrdError, RrdUpdates};
use crate::xapi::{XapiClient, XapiError};
use anyhow::{Context, Result};
use plugin_kit::{MetricRecord, Plugin};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub passwd: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorSettings {
    /// Poll interval in seconds, copied into every record
    pub step: u64,
    /// Polls per session before a forced reconnect
    pub reconnect_every: u32,
    /// Emit host-level records
    pub graph_host: bool,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            step: 10,
            reconnect_every: 60,
            graph_host: true,
        }
    }
}

struct Connection {
    session: String,
    names: EntityNameMap,
    polls: u32,
}

enum SessionState {
    Disconnected,
    Connected(Connection),
}

pub struct Collector<R: ReportSource = RrdUpdates> {
    client: XapiClient,
    credentials: Credentials,
    source: R,
    settings: CollectorSettings,
    state: SessionState,
    /// First host uuid ever reported; it must never change afterwards
    pinned_host: Option<String>,
}

impl<R: ReportSource> Collector<R> {
    pub fn new(client: XapiClient, credentials: Credentials, source: R, settings: CollectorSettings) -> Self {
        Self {
            client,
            credentials,
            source,
            settings,
            state: SessionState::Disconnected,
            pinned_host: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connected(_))
    }

    async fn connect(&mut self) -> Result<(), XapiError> {
        info!(url = %self.client.url(), user = %self.credentials.user, "Connecting to XenAPI");
        let session = self
            .client
            .login(&self.credentials.user, &self.credentials.passwd)
            .await?;

        match EntityNameMap::discover(&self.client, &session).await {
            Ok(names) => {
                info!(host = %names.hostname(), host_uuid = %names.host_uuid(), "Session opened");
                self.state = SessionState::Connected(Connection {
                    session,
                    names,
                    polls: 0,
                });
                Ok(())
            }
            Err(e) => {
                self.logout(&session).await;
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) {
        if let SessionState::Connected(conn) = std::mem::replace(&mut self.state, SessionState::Disconnected) {
            info!(host = %conn.names.hostname(), polls = conn.polls, "Disconnecting");
            self.logout(&conn.session).await;
        }
    }

    async fn logout(&self, session: &str) {
        if let Err(e) = self.client.logout(session).await {
            debug!("Logout failed, ignoring: {}", e);
        }
    }

    /// One fetch → resolve → extract cycle
    pub async fn poll(&mut self) -> Result<Vec<MetricRecord>> {
        if let SessionState::Connected(conn) = &self.state {
            if conn.polls >= self.settings.reconnect_every {
                info!(polls = conn.polls, "Session rotation due");
                self.disconnect().await;
            }
        }

        if !self.is_connected() {
            self.connect().await.context("Failed to open XenAPI session")?;
        }

        let SessionState::Connected(conn) = &mut self.state else {
            anyhow::bail!("XenAPI session unavailable");
        };
        conn.polls += 1;
        let session = conn.session.clone();

        let report = match self.source.fetch(&session).await {
            Ok(report) => report,
            Err(e) if e.is_fetch() => {
                warn!("Fetch failed, dropping session: {}", e);
                self.disconnect().await;
                return Err(e.into());
            }
            Err(e) => return Err(e.into()),
        };

        let SessionState::Connected(conn) = &self.state else {
            anyhow::bail!("XenAPI session unavailable");
        };
        let records = normalize(&report, &conn.names, &self.settings, &mut self.pinned_host).map_err(|e| {
            if matches!(e, RrdError::HostIdentityMismatch { .. }) {
                error!("Provider reported an inconsistent host: {}", e);
            }
            e
        })?;

        debug!(records = records.len(), end_time = report.end_time, "Report normalized");
        Ok(records)
    }
}

impl<R: ReportSource> Plugin for Collector<R> {
    fn name(&self) -> &str {
        "xenserver"
    }

    async fn prepare_data(&mut self) -> Result<Vec<MetricRecord>> {
        self.poll().await
    }

    async fn shutdown(&mut self) {
        self.disconnect().await;
    }
}

/// Turn a report into records: host first (when enabled), then VMs by uuid
fn normalize(
    report: &RawReport,
    names: &EntityNameMap,
    settings: &CollectorSettings,
    pinned_host: &mut Option<String>,
) -> Result<Vec<MetricRecord>, RrdError> {
    let descriptors = legend::resolve(&report.legend)?;
    debug!(
        columns = descriptors.len(),
        cf = descriptors.first().map(|d| d.cf.as_str()).unwrap_or_default(),
        "Legend resolved"
    );
    let index = ReportIndex::build(&descriptors, pinned_host.as_deref())?;
    if pinned_host.is_none() {
        *pinned_host = index.host_id().map(String::from);
    }

    let mut records = Vec::new();
    if settings.graph_host {
        if let Some(host) = index.host() {
            records.extend(entity_records("host", host, report, names, settings.step));
        }
    }
    for vm in index.vms() {
        records.extend(entity_records("vm", vm, report, names, settings.step));
    }
    Ok(records)
}

fn entity_records(
    kind: &str,
    entity: &EntityReport,
    report: &RawReport,
    names: &EntityNameMap,
    step: u64,
) -> Vec<MetricRecord> {
    let id = format!("Xenserver_{}_{}", kind, names.name_of(&entity.uuid));
    entity
        .params
        .iter()
        .filter(|(param, _)| !param.is_empty())
        .map(|(param, &column)| {
            MetricRecord::new(
                id.clone(),
                id.clone(),
                param.clone(),
                step,
                extract::latest(report, column),
                report.end_time,
            )
        })
        .collect()
}
