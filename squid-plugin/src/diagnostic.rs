//! Squid `mgr:info` file descriptor report → metric records

use crate::execution::DiagnosticCommand;
use anyhow::Result;
use plugin_kit::{MetricRecord, Plugin};
use tracing::{debug, warn};

pub const METRIC: &str = "squid";

/// Label fragment → record type, checked in order; the first match wins
const LABELS: [(&str, &str); 5] = [
    ("Maximum number", "MaxFileDescNum"),
    ("Largest file desc", "LargestFileDescInUse"),
    ("Number of", "CurrentFileDescInUse"),
    ("Available number", "AvailableFileDesc"),
    ("Reserved number", "ReservedFileDesc"),
];

fn classify(label: &str) -> Option<&'static str> {
    LABELS
        .iter()
        .find(|(fragment, _)| label.contains(fragment))
        .map(|(_, kind)| *kind)
}

/// Parse `mgr:info` output. Lines that are not `<label>: <value>` file
/// descriptor lines, or whose label is unknown, are skipped.
pub fn parse_report(output: &str, endpoint: &str, step: u64, timestamp: i64) -> Vec<MetricRecord> {
    output
        .lines()
        .filter(|line| line.contains("file desc"))
        .filter_map(|line| {
            let mut parts = line.split(':');
            let (Some(label), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
                debug!(line, "Skipping line");
                return None;
            };
            let kind = classify(label.trim())?;
            Some(MetricRecord::new(endpoint, METRIC, kind, step, value.trim(), timestamp))
        })
        .collect()
}

pub struct SquidPlugin {
    command: DiagnosticCommand,
    endpoint: String,
    step: u64,
}

impl SquidPlugin {
    pub fn new(command: DiagnosticCommand, endpoint: impl Into<String>, step: u64) -> Self {
        Self {
            command,
            endpoint: endpoint.into(),
            step,
        }
    }
}

impl Plugin for SquidPlugin {
    fn name(&self) -> &str {
        "squid"
    }

    /// A command failure yields an empty batch, not an error
    async fn prepare_data(&mut self) -> Result<Vec<MetricRecord>> {
        let output = match self.command.run().await {
            Ok(output) => output,
            Err(e) => {
                warn!("{}", e);
                return Ok(Vec::new());
            }
        };

        let timestamp = chrono::Utc::now().timestamp();
        Ok(parse_report(&output, &self.endpoint, self.step, timestamp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugin_devkit::CarbonCapture;
    use plugin_kit::{run_once, CarbonEmitter, CarbonPath, Output};
    use std::time::Duration;

    const MGR_INFO: &str = "\
Squid Object Cache: Version 3.5.20
File descriptor usage for squid:
\tMaximum number of file descriptors:   1024
\tLargest file desc currently in use:     25
\tNumber of file desc currently in use:   19
\tFiles queued for open:                   0
\tAvailable number of file descriptors: 1005
\tReserved number of file descriptors:   100
\tStore Disk files open:                   0
";

    fn kinds_and_values(records: &[MetricRecord]) -> Vec<(&str, &str)> {
        records.iter().map(|r| (r.kind(), r.value())).collect()
    }

    #[test]
    fn test_maximum_line() {
        let records = parse_report("Maximum number of file descriptors:    1024", "proxy01", 30, 1700000000);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind(), "MaxFileDescNum");
        assert_eq!(records[0].value(), "1024");
        assert_eq!(records[0].endpoint(), "proxy01");
        assert_eq!(records[0].metric(), "squid");
        assert_eq!(records[0].step(), 30);
    }

    #[test]
    fn test_full_report() {
        let records = parse_report(MGR_INFO, "proxy01", 30, 1700000000);
        assert_eq!(
            kinds_and_values(&records),
            vec![
                ("MaxFileDescNum", "1024"),
                ("LargestFileDescInUse", "25"),
                ("CurrentFileDescInUse", "19"),
                ("AvailableFileDesc", "1005"),
                ("ReservedFileDesc", "100"),
            ]
        );
        assert!(records.iter().all(|r| r.timestamp() == 1700000000));
    }

    #[test]
    fn test_unmatched_lines_are_ignored() {
        let output = "\
File descriptor usage for squid:
Mystery file desc counter: 7
Number of file desc: 1: 2
";
        assert!(parse_report(output, "proxy01", 30, 0).is_empty());
    }

    #[tokio::test]
    async fn test_command_failure_gives_empty_batch() {
        let command = DiagnosticCommand::new("sh", vec!["-c".to_string(), "echo refused >&2".to_string()]);
        let mut plugin = SquidPlugin::new(command, "proxy01", 30);
        assert!(plugin.prepare_data().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cycle_to_carbon_uses_three_segment_paths() {
        let capture = CarbonCapture::start().await.unwrap();
        let command = DiagnosticCommand::new(
            "sh",
            vec![
                "-c".to_string(),
                "printf '\\tMaximum number of file descriptors:   1024\\n'".to_string(),
            ],
        );
        let mut plugin = SquidPlugin::new(command, "proxy01", 30);
        let output = Output::Carbon(CarbonEmitter::new("127.0.0.1", capture.port(), CarbonPath::EndpointMetricType));

        assert_eq!(run_once(&mut plugin, &output).await.unwrap(), 1);
        let lines = capture.wait_for_lines(1, Duration::from_secs(5)).await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("proxy01.squid.MaxFileDescNum 1024 "));
    }
}
