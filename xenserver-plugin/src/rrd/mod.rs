//! XenServer `rrd_updates` reports
//!
//! Handles:
//! - Incremental queries (`start` cursor advanced past each report's end)
//! - Parsing the `<xport>` document into a [`RawReport`] grid
//! - Legend resolution ([`legend`]), column indexing ([`index`]) and
//!   latest-sample selection ([`extract`])

pub mod extract;
pub mod index;
pub mod legend;

use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// How far back the very first query reaches
const INITIAL_LOOKBACK_SECS: i64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum RrdError {
    #[error("rrd_updates request failed: {0}")]
    Fetch(#[source] reqwest::Error),
    #[error("malformed rrd_updates payload: {0}")]
    MalformedPayload(String),
    #[error("legend entry {entry:?} has {fields} fields, expected 4")]
    MalformedLegend { entry: String, fields: usize },
    #[error("legend entry {entry:?} has unknown scope {scope:?}")]
    UnknownScope { entry: String, scope: String },
    #[error("host uuid changed (was {expected}, is {found})")]
    HostIdentityMismatch { expected: String, found: String },
    #[error("cell (row {row}, column {column:?}) is outside the {rows}x{columns} grid")]
    IndexOutOfRange {
        row: usize,
        column: Option<usize>,
        rows: usize,
        columns: usize,
    },
    #[error("cell (row {row}, column {column:?}) is not numeric: {text:?}")]
    NumericParse {
        row: usize,
        column: Option<usize>,
        text: String,
    },
}

impl RrdError {
    /// Transport failures invalidate the session, parse failures do not
    pub fn is_fetch(&self) -> bool {
        matches!(self, RrdError::Fetch(_))
    }
}

/// One `<row>`: the timestamp cell then one cell per column, kept as text
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub timestamp: String,
    pub values: Vec<String>,
}

/// Parsed `rrd_updates` document. `data` is in document order (newest first).
#[derive(Debug, Clone, PartialEq)]
pub struct RawReport {
    pub rows: usize,
    pub columns: usize,
    pub start_time: i64,
    pub step_time: i64,
    pub end_time: i64,
    pub legend: Vec<String>,
    pub data: Vec<RawRow>,
}

#[derive(Debug, Deserialize)]
struct XportXml {
    meta: MetaXml,
    data: DataXml,
}

#[derive(Debug, Deserialize)]
struct MetaXml {
    start: i64,
    step: i64,
    end: i64,
    rows: usize,
    columns: usize,
    legend: LegendXml,
}

#[derive(Debug, Default, Deserialize)]
struct LegendXml {
    #[serde(default)]
    entry: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DataXml {
    #[serde(default)]
    row: Vec<RowXml>,
}

#[derive(Debug, Deserialize)]
struct RowXml {
    t: String,
    #[serde(default)]
    v: Vec<String>,
}

impl RawReport {
    pub fn parse(xml: &str) -> Result<Self, RrdError> {
        let doc: XportXml =
            quick_xml::de::from_str(xml).map_err(|e| RrdError::MalformedPayload(e.to_string()))?;

        let report = Self {
            rows: doc.meta.rows,
            columns: doc.meta.columns,
            start_time: doc.meta.start,
            step_time: doc.meta.step,
            end_time: doc.meta.end,
            legend: doc.meta.legend.entry,
            data: doc
                .data
                .row
                .into_iter()
                .map(|r| RawRow {
                    timestamp: r.t,
                    values: r.v,
                })
                .collect(),
        };
        report.validate()?;
        Ok(report)
    }

    fn validate(&self) -> Result<(), RrdError> {
        if self.legend.len() != self.columns {
            return Err(RrdError::MalformedPayload(format!(
                "legend has {} entries but <columns> is {}",
                self.legend.len(),
                self.columns
            )));
        }
        if self.data.len() != self.rows {
            return Err(RrdError::MalformedPayload(format!(
                "found {} rows but <rows> is {}",
                self.data.len(),
                self.rows
            )));
        }
        if let Some((i, row)) = self
            .data
            .iter()
            .enumerate()
            .find(|(_, row)| row.values.len() != self.columns)
        {
            return Err(RrdError::MalformedPayload(format!(
                "row {} has {} values, expected {}",
                i,
                row.values.len(),
                self.columns
            )));
        }
        Ok(())
    }
}

/// Where raw reports come from
#[allow(async_fn_in_trait)]
pub trait ReportSource {
    async fn fetch(&mut self, session_id: &str) -> Result<RawReport, RrdError>;
}

/// Query parameters besides the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryWindow {
    /// Exclusive lower bound of the next query
    pub start: i64,
    /// Consolidation function
    pub cf: String,
    /// Requested sample resolution in seconds
    pub interval: u64,
}

/// HTTP `rrd_updates` fetcher owning the window cursor
pub struct RrdUpdates {
    http: reqwest::Client,
    base_url: String,
    window: QueryWindow,
}

impl RrdUpdates {
    pub fn new(base_url: impl Into<String>, cf: impl Into<String>, interval: u64) -> Result<Self, RrdError> {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(RrdError::Fetch)?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            window: QueryWindow {
                start: chrono::Utc::now().timestamp() - INITIAL_LOOKBACK_SECS,
                cf: cf.into(),
                interval,
            },
        })
    }

    #[cfg(test)]
    pub fn with_start(mut self, start: i64) -> Self {
        self.window.start = start;
        self
    }

    pub fn window(&self) -> &QueryWindow {
        &self.window
    }

    fn query(&self, session_id: &str) -> Vec<(&'static str, String)> {
        vec![
            ("start", self.window.start.to_string()),
            ("host", "true".to_string()),
            ("cf", self.window.cf.clone()),
            ("interval", self.window.interval.to_string()),
            ("session_id", session_id.to_string()),
        ]
    }

    /// Move the cursor past `report`. Never moves backwards.
    fn commit(&mut self, report: &RawReport) {
        self.window.start = self.window.start.max(report.end_time + 1);
    }
}

impl ReportSource for RrdUpdates {
    async fn fetch(&mut self, session_id: &str) -> Result<RawReport, RrdError> {
        let url = format!("{}/rrd_updates", self.base_url);
        debug!(
            url = %url,
            start = self.window.start,
            cf = %self.window.cf,
            interval = self.window.interval,
            "Querying rrd_updates"
        );

        let body = self
            .http
            .get(&url)
            .query(&self.query(session_id))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(RrdError::Fetch)?
            .text()
            .await
            .map_err(RrdError::Fetch)?;

        let report = RawReport::parse(&body)?;
        debug!(
            start_time = report.start_time,
            step_time = report.step_time,
            end_time = report.end_time,
            rows = report.rows,
            columns = report.columns,
            "Parsed rrd_updates"
        );
        self.commit(&report);
        Ok(report)
    }
}
