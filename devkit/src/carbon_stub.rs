/*!
Carbon capture listener

Accepts plaintext carbon connections on an ephemeral local port and keeps
every received line so tests can assert on what a sink actually sent.
*/

use anyhow::Result;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub struct CarbonCapture {
    port: u16,
    lines: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
}

impl CarbonCapture {
    /// Bind on 127.0.0.1 with an OS-assigned port and start accepting
    pub async fn start() -> Result<Self> {
        Self::listen(None).await
    }

    /// Like [`CarbonCapture::start`], but every connection is dropped after
    /// `limit` lines, mimicking a relay that goes away mid-batch
    pub async fn start_dropping_after(limit: usize) -> Result<Self> {
        Self::listen(Some(limit)).await
    }

    async fn listen(limit: Option<usize>) -> Result<Self> {
        env_logger::try_init().ok();

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let task_lines = lines.clone();
        let task_connections = connections.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, peer)) = listener.accept().await else {
                    break;
                };
                task_connections.fetch_add(1, Ordering::SeqCst);
                log::info!("[carbon-stub] connection from {}", peer);

                let conn_lines = task_lines.clone();
                tokio::spawn(async move {
                    let mut reader = BufReader::new(stream).lines();
                    let mut received = 0;
                    while let Ok(Some(line)) = reader.next_line().await {
                        conn_lines.lock().unwrap().push(line);
                        received += 1;
                        if limit.is_some_and(|limit| received >= limit) {
                            log::info!("[carbon-stub] dropping {} after {} lines", peer, received);
                            break;
                        }
                    }
                });
            }
        });

        log::info!("[carbon-stub] listening on 127.0.0.1:{}", port);
        Ok(Self {
            port,
            lines,
            connections,
            accept_task,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Every line received so far, in arrival order
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` lines arrived or `timeout` elapsed, then
    /// return whatever was received.
    pub async fn wait_for_lines(&self, count: usize, timeout: Duration) -> Vec<String> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            let lines = self.lines();
            if lines.len() >= count {
                return lines;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        log::warn!("[carbon-stub] timeout waiting for {} lines", count);
        self.lines()
    }
}

impl Drop for CarbonCapture {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_capture_records_lines_per_connection() {
        let capture = CarbonCapture::start().await.unwrap();

        let mut first = TcpStream::connect(("127.0.0.1", capture.port())).await.unwrap();
        first.write_all(b"a.b 1 10\na.c 2 10\n").await.unwrap();
        first.shutdown().await.unwrap();

        let lines = capture.wait_for_lines(2, Duration::from_secs(5)).await;
        assert_eq!(lines, vec!["a.b 1 10", "a.c 2 10"]);

        let mut second = TcpStream::connect(("127.0.0.1", capture.port())).await.unwrap();
        second.write_all(b"a.d 3 20\n").await.unwrap();
        second.shutdown().await.unwrap();

        let lines = capture.wait_for_lines(3, Duration::from_secs(5)).await;
        assert_eq!(lines.len(), 3);
        assert_eq!(capture.connection_count(), 2);
    }

    #[tokio::test]
    async fn test_capture_drops_connection_after_limit() {
        let capture = CarbonCapture::start_dropping_after(1).await.unwrap();

        let mut stream = TcpStream::connect(("127.0.0.1", capture.port())).await.unwrap();
        stream.write_all(b"a.b 1 10\n").await.unwrap();
        let lines = capture.wait_for_lines(1, Duration::from_secs(5)).await;
        assert_eq!(lines, vec!["a.b 1 10"]);

        stream.write_all(b"a.c 2 10\n").await.ok();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(capture.lines().len(), 1);
    }
}
