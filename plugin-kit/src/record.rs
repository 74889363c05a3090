//! Normalized metric record shared by every plugin

use std::fmt;

/// One metric sample, ready to be serialized by an [`crate::Emitter`].
///
/// Naming follows the collectd identifier `host/plugin-instance/type-instance`:
/// `endpoint` is the host part, `metric` the plugin instance and `kind` the
/// type instance (the raw parameter name, e.g. `cpu0`).
///
/// Records are built fresh every poll cycle and are never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRecord {
    endpoint: String,
    metric: String,
    kind: String,
    step: u64,
    value: String,
    timestamp: i64,
}

impl MetricRecord {
    pub fn new(
        endpoint: impl Into<String>,
        metric: impl Into<String>,
        kind: impl Into<String>,
        step: u64,
        value: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            metric: metric.into(),
            kind: kind.into(),
            step,
            value: value.into(),
            timestamp,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Parameter name (`type` in the collectd vocabulary)
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Poll interval in seconds
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Epoch seconds
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl fmt::Display for MetricRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}={} @{}",
            self.endpoint, self.metric, self.kind, self.value, self.timestamp
        )
    }
}
