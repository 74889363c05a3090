//! Output sinks for a cycle's batch of records

use crate::emitter::{CarbonEmitter, ConsoleEmitter, Emitter, LineProtocolEmitter};
use crate::record::MetricRecord;
use std::io::Write;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// Errors raised while delivering a batch
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("failed to connect to carbon relay {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("transport error after {sent} records: {source}")]
    Transport {
        sent: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write to stdout: {0}")]
    Stdout(#[from] std::io::Error),
}

/// Where a plugin's records go
#[derive(Debug, Clone)]
pub enum Output {
    /// Carbon-style lines on stdout
    Console(ConsoleEmitter),
    /// PUTVAL lines on stdout, read by the collectd exec plugin
    CollectdExec(LineProtocolEmitter),
    /// Plaintext carbon protocol over TCP
    Carbon(CarbonEmitter),
}

impl Output {
    pub fn emitter(&self) -> &dyn Emitter {
        match self {
            Output::Console(e) => e as &dyn Emitter,
            Output::CollectdExec(e) => e,
            Output::Carbon(e) => e,
        }
    }

    /// Deliver one batch. Returns the number of records written.
    ///
    /// There is no atomicity across a batch: a transport failure aborts the
    /// remaining records but whatever was written before stays written.
    pub async fn deliver(&self, records: &[MetricRecord]) -> Result<usize, EmitError> {
        match self {
            Output::Console(_) | Output::CollectdExec(_) => self.print(records),
            Output::Carbon(carbon) => send_to_carbon(carbon, records).await,
        }
    }

    fn print(&self, records: &[MetricRecord]) -> Result<usize, EmitError> {
        let emitter = self.emitter();
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for record in records {
            writeln!(out, "{}", emitter.serialize(record))?;
        }
        // collectd reads the pipe line by line; never leave a batch buffered
        out.flush()?;
        Ok(records.len())
    }
}

/// One connection per batch: connect, write every line, close.
async fn send_to_carbon(carbon: &CarbonEmitter, records: &[MetricRecord]) -> Result<usize, EmitError> {
    let address = carbon.address();
    let mut stream = TcpStream::connect(&address)
        .await
        .map_err(|source| EmitError::Connect {
            address: address.clone(),
            source,
        })?;

    let mut sent = 0;
    for record in records {
        // carbon warns about an unfinished line without the trailing newline
        let message = format!("{}\n", carbon.serialize(record));
        stream
            .write_all(message.as_bytes())
            .await
            .map_err(|source| EmitError::Transport { sent, source })?;
        sent += 1;
    }

    stream
        .shutdown()
        .await
        .map_err(|source| EmitError::Transport { sent, source })?;

    debug!(address = %address, sent, "Batch sent to carbon");
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::CarbonPath;
    use plugin_devkit::CarbonCapture;
    use std::time::Duration;

    fn batch() -> Vec<MetricRecord> {
        vec![
            MetricRecord::new("Xenserver_host_h1", "Xenserver_host_h1", "cpu0", 5, "0.25", 1700000000),
            MetricRecord::new("Xenserver_host_h1", "Xenserver_host_h1", "memory_free_kib", 5, "2048", 1700000000),
        ]
    }

    #[tokio::test]
    async fn test_carbon_batch_over_one_connection() {
        let capture = CarbonCapture::start().await.unwrap();
        let output = Output::Carbon(CarbonEmitter::new("127.0.0.1", capture.port(), CarbonPath::MetricType));

        let sent = output.deliver(&batch()).await.unwrap();
        assert_eq!(sent, 2);

        let lines = capture.wait_for_lines(2, Duration::from_secs(5)).await;
        assert_eq!(
            lines,
            vec![
                "Xenserver_host_h1.cpu0 0.25 1700000000",
                "Xenserver_host_h1.memory_free_kib 2048 1700000000",
            ]
        );
        assert_eq!(capture.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_carbon_connect_failure() {
        // bind then drop to obtain a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let output = Output::Carbon(CarbonEmitter::new("127.0.0.1", port, CarbonPath::MetricType));
        let err = output.deliver(&batch()).await.unwrap_err();
        assert!(matches!(err, EmitError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_relay_dropping_mid_batch_stops_emission() {
        let capture = CarbonCapture::start_dropping_after(10).await.unwrap();
        let output = Output::Carbon(CarbonEmitter::new("127.0.0.1", capture.port(), CarbonPath::MetricType));
        // large enough to outgrow the socket buffers once the relay is gone
        let records: Vec<MetricRecord> = (0..100_000)
            .map(|i| MetricRecord::new("Xenserver_vm_web", "Xenserver_vm_web", format!("vbd_{}", i), 5, "1", 1700000000))
            .collect();

        match output.deliver(&records).await {
            Err(EmitError::Transport { sent, .. }) => assert!(sent >= 10 && sent < records.len()),
            other => panic!("expected a transport error, got {:?}", other),
        }
        let lines = capture.wait_for_lines(10, Duration::from_secs(5)).await;
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[0], "Xenserver_vm_web.vbd_0 1 1700000000");
    }

    #[tokio::test]
    async fn test_empty_batch_still_opens_and_closes() {
        let capture = CarbonCapture::start().await.unwrap();
        let output = Output::Carbon(CarbonEmitter::new("127.0.0.1", capture.port(), CarbonPath::MetricType));

        assert_eq!(output.deliver(&[]).await.unwrap(), 0);
        let lines = capture.wait_for_lines(1, Duration::from_millis(200)).await;
        assert!(lines.is_empty());
    }

    #[tokio::test]
    async fn test_stdout_outputs_report_count() {
        let output = Output::CollectdExec(LineProtocolEmitter);
        assert_eq!(output.deliver(&batch()).await.unwrap(), 2);

        let output = Output::Console(ConsoleEmitter::new(CarbonPath::MetricType));
        assert_eq!(output.deliver(&batch()).await.unwrap(), 2);
    }
}
