//! Line serializations for metric records
//!
//! Two wire shapes are supported:
//! - collectd exec: `PUTVAL "<endpoint>/<metric>/<type>" interval=<step> N:<value>`
//! - carbon plaintext: `<path> <value> <timestamp>`, where the path is either
//!   `<metric>.<type>` or `<endpoint>.<metric>.<type>` depending on the plugin

use crate::record::MetricRecord;

/// Serialize-one capability shared by every sink
pub trait Emitter {
    fn serialize(&self, record: &MetricRecord) -> String;
}

/// Metric path layout for carbon-style lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarbonPath {
    /// `<metric>.<type>`
    MetricType,
    /// `<endpoint>.<metric>.<type>`
    EndpointMetricType,
}

impl CarbonPath {
    fn line(self, record: &MetricRecord) -> String {
        match self {
            CarbonPath::MetricType => format!(
                "{}.{} {} {}",
                record.metric(),
                record.kind(),
                record.value(),
                record.timestamp()
            ),
            CarbonPath::EndpointMetricType => format!(
                "{}.{}.{} {} {}",
                record.endpoint(),
                record.metric(),
                record.kind(),
                record.value(),
                record.timestamp()
            ),
        }
    }
}

/// collectd exec plugin format
#[derive(Debug, Clone, Copy, Default)]
pub struct LineProtocolEmitter;

impl Emitter for LineProtocolEmitter {
    fn serialize(&self, record: &MetricRecord) -> String {
        format!(
            "PUTVAL \"{}/{}/{}\" interval={} N:{}",
            record.endpoint(),
            record.metric(),
            record.kind(),
            record.step(),
            record.value()
        )
    }
}

/// Carbon-style lines printed for an operator
#[derive(Debug, Clone, Copy)]
pub struct ConsoleEmitter {
    pub path: CarbonPath,
}

impl ConsoleEmitter {
    pub fn new(path: CarbonPath) -> Self {
        Self { path }
    }
}

impl Emitter for ConsoleEmitter {
    fn serialize(&self, record: &MetricRecord) -> String {
        self.path.line(record)
    }
}

/// Carbon plaintext protocol sent to a relay at `server:port`
#[derive(Debug, Clone)]
pub struct CarbonEmitter {
    pub server: String,
    pub port: u16,
    pub path: CarbonPath,
}

impl CarbonEmitter {
    pub fn new(server: impl Into<String>, port: u16, path: CarbonPath) -> Self {
        Self {
            server: server.into(),
            port,
            path,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }
}

impl Emitter for CarbonEmitter {
    fn serialize(&self, record: &MetricRecord) -> String {
        self.path.line(record)
    }
}

/// Serialize a whole batch without performing any I/O
pub fn render_batch<E: Emitter + ?Sized>(emitter: &E, records: &[MetricRecord]) -> Vec<String> {
    records.iter().map(|r| emitter.serialize(r)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_record() -> MetricRecord {
        MetricRecord::new(
            "Xenserver_host_myhost",
            "Xenserver_host_myhost",
            "cpu0",
            5,
            "0.42",
            1700000000,
        )
    }

    #[test]
    fn test_putval_line() {
        let line = LineProtocolEmitter.serialize(&host_record());
        assert_eq!(
            line,
            "PUTVAL \"Xenserver_host_myhost/Xenserver_host_myhost/cpu0\" interval=5 N:0.42"
        );
    }

    #[test]
    fn test_carbon_two_segment_path() {
        let emitter = CarbonEmitter::new("relay", 2003, CarbonPath::MetricType);
        assert_eq!(
            emitter.serialize(&host_record()),
            "Xenserver_host_myhost.cpu0 0.42 1700000000"
        );
    }

    #[test]
    fn test_carbon_three_segment_path() {
        let record = MetricRecord::new("proxy01", "squid", "MaxFileDescNum", 30, "1024", 1700000123);
        let emitter = ConsoleEmitter::new(CarbonPath::EndpointMetricType);
        assert_eq!(emitter.serialize(&record), "proxy01.squid.MaxFileDescNum 1024 1700000123");
    }

    #[test]
    fn test_console_matches_carbon_format() {
        let console = ConsoleEmitter::new(CarbonPath::MetricType);
        let carbon = CarbonEmitter::new("relay", 2003, CarbonPath::MetricType);
        assert_eq!(console.serialize(&host_record()), carbon.serialize(&host_record()));
    }

    #[test]
    fn test_render_batch_preserves_order() {
        let records = vec![
            MetricRecord::new("e", "m", "a", 5, "1", 10),
            MetricRecord::new("e", "m", "b", 5, "2", 10),
        ];
        let lines = render_batch(&ConsoleEmitter::new(CarbonPath::MetricType), &records);
        assert_eq!(lines, vec!["m.a 1 10", "m.b 2 10"]);
    }

    #[test]
    fn test_empty_value_is_emitted_verbatim() {
        let record = MetricRecord::new("e", "m", "vbd_xvda_read", 5, "", 10);
        assert_eq!(
            LineProtocolEmitter.serialize(&record),
            "PUTVAL \"e/m/vbd_xvda_read\" interval=5 N:"
        );
    }

    #[test]
    fn test_carbon_address() {
        let emitter = CarbonEmitter::new("10.1.2.3", 2004, CarbonPath::MetricType);
        assert_eq!(emitter.address(), "10.1.2.3:2004");
    }
}
