//! Inbound transfers.
//!
//! Per connection:
//!
//! ```text
//! Accepted → ReadingHeaderLength → ReadingHeaderBody → ReceivingPayload → Acknowledging → Closed
//!                                   (any step) → Failed → Closed
//! ```
//!
//! Failures are isolated to their connection. A peer that closes early
//! leaves its partial file on disk and is reported as truncated.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::config::TransferConfig;
use crate::error::{Error, Result, TransferError};
use crate::file::{self, FileWriter};
use crate::history::{TransferDirection, TransferHistory, TransferHistoryEntry};
use crate::protocol::{self, TransferHeader};
use crate::socket;

/// Capacity of the received-file event channel.
const EVENT_CAPACITY: usize = 64;

/// How long `stop` waits for the accept loop before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of one inbound connection.
#[derive(Debug, Clone)]
pub enum ReceiveStatus {
    /// The declared size arrived and was written
    Completed,
    /// The connection failed; any partial file is kept
    Failed(TransferError),
}

impl ReceiveStatus {
    /// Whether the file arrived in full.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// The failure, if any.
    #[must_use]
    pub const fn error(&self) -> Option<&TransferError> {
        match self {
            Self::Completed => None,
            Self::Failed(e) => Some(e),
        }
    }
}

/// Record published for every finished inbound connection.
#[derive(Debug, Clone)]
pub struct ReceivedFile {
    /// Remote endpoint
    pub peer: SocketAddr,
    /// Header as sent, if it could be read
    pub header: Option<TransferHeader>,
    /// Where the payload was written, if a file was created
    pub path: Option<PathBuf>,
    /// Payload bytes written to disk
    pub bytes_written: u64,
    /// Final status
    pub status: ReceiveStatus,
}

impl ReceivedFile {
    fn failed(peer: SocketAddr, header: Option<TransferHeader>, error: TransferError) -> Self {
        Self {
            peer,
            header,
            path: None,
            bytes_written: 0,
            status: ReceiveStatus::Failed(error),
        }
    }

    /// Declared payload size, if the header was read.
    #[must_use]
    pub fn declared_size(&self) -> Option<u64> {
        self.header.as_ref().map(|h| h.size)
    }
}

/// Receive one file from `stream` into `download_dir`.
///
/// Never returns an error; every failure is captured in the returned
/// record's status. A peer that has not delivered its full header within
/// `header_timeout` fails with [`TransferError::Timeout`]. The
/// acknowledgment is written only after the declared size has been stored.
pub async fn receive_connection<S>(
    stream: &mut S,
    peer: SocketAddr,
    download_dir: &Path,
    chunk_size: usize,
    header_timeout: Duration,
) -> ReceivedFile
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let header = match tokio::time::timeout(header_timeout, protocol::read_header(stream)).await {
        Ok(Ok(header)) => header,
        Ok(Err(e)) => return ReceivedFile::failed(peer, None, e),
        Err(_) => {
            let error = TransferError::Timeout {
                operation: "header",
                secs: header_timeout.as_secs(),
            };
            return ReceivedFile::failed(peer, None, error);
        }
    };

    let Some(name) = file::base_name(&header.name) else {
        let error = TransferError::Malformed(format!("unusable file name {:?}", header.name));
        return ReceivedFile::failed(peer, Some(header), error);
    };

    let mut writer = match FileWriter::create_unique(download_dir, name, header.size).await {
        Ok(writer) => writer,
        Err(e) => {
            let error = TransferError::Unknown(format!("creating destination: {e}"));
            return ReceivedFile::failed(peer, Some(header), error);
        }
    };

    tracing::debug!(
        "Receiving {} ({} bytes) from {} into {}",
        header.name,
        header.size,
        peer,
        writer.output_path.display()
    );

    let payload = receive_payload(stream, &mut writer, chunk_size).await;
    let bytes_written = writer.bytes_written;
    let path = writer.output_path.clone();

    let finalized = writer.finalize().await;
    let status = match (payload, finalized) {
        (Err(e), _) => ReceiveStatus::Failed(e),
        (Ok(()), Err(e)) => ReceiveStatus::Failed(TransferError::Unknown(format!(
            "flushing destination: {e}"
        ))),
        (Ok(()), Ok(_)) => {
            if let Err(e) = protocol::write_ack(stream).await {
                tracing::warn!("Failed to acknowledge transfer from {}: {}", peer, e);
            }
            ReceiveStatus::Completed
        }
    };

    let _ = stream.shutdown().await;

    ReceivedFile {
        peer,
        header: Some(header),
        path: Some(path),
        bytes_written,
        status,
    }
}

async fn receive_payload<S>(
    stream: &mut S,
    writer: &mut FileWriter,
    chunk_size: usize,
) -> std::result::Result<(), TransferError>
where
    S: AsyncRead + Unpin,
{
    let capacity = usize::try_from(writer.expected_size).map_or(chunk_size, |s| s.min(chunk_size));
    let mut buf = vec![0u8; capacity];

    while !writer.is_complete() {
        let want = usize::try_from(writer.remaining()).map_or(buf.len(), |r| r.min(buf.len()));
        let n = match stream.read(&mut buf[..want]).await {
            Ok(0) => {
                return Err(TransferError::Truncated {
                    received: writer.bytes_written,
                    expected: writer.expected_size,
                })
            }
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(TransferError::Truncated {
                    received: writer.bytes_written,
                    expected: writer.expected_size,
                })
            }
            Err(e) => return Err(TransferError::Unknown(format!("reading payload: {e}"))),
        };

        writer
            .write_chunk(&buf[..n])
            .await
            .map_err(|e| TransferError::Unknown(format!("writing destination: {e}")))?;
    }

    Ok(())
}

struct Running {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

/// Shared by the accept loop and its workers.
struct Worker {
    download_dir: PathBuf,
    chunk_size: usize,
    header_timeout: Duration,
    events_tx: broadcast::Sender<ReceivedFile>,
    history: Option<Arc<TransferHistory>>,
}

impl Worker {
    async fn serve(&self, mut stream: tokio::net::TcpStream, peer: SocketAddr) {
        let started = Instant::now();
        let record = receive_connection(
            &mut stream,
            peer,
            &self.download_dir,
            self.chunk_size,
            self.header_timeout,
        )
        .await;

        match &record.status {
            ReceiveStatus::Completed => tracing::info!(
                "Received {} ({}) from {}",
                record
                    .path
                    .as_deref()
                    .map_or_else(String::new, |p| p.display().to_string()),
                file::format_size(record.bytes_written),
                peer
            ),
            ReceiveStatus::Failed(e) => {
                tracing::warn!("Inbound transfer from {} failed: {}", peer, e);
            }
        }

        if let Some(history) = &self.history {
            let name = record
                .path
                .as_deref()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .or_else(|| record.header.as_ref().map(|h| h.name.clone()))
                .unwrap_or_default();
            let mut entry = TransferHistoryEntry::new(TransferDirection::Received, name, peer)
                .with_stats(
                    record.bytes_written,
                    record.declared_size().unwrap_or_default(),
                    started.elapsed(),
                );
            if let Some(e) = record.status.error() {
                entry = entry.with_error(e);
            }
            history.add(entry);
        }

        let _ = self.events_tx.send(record);
    }
}

/// Accepts inbound transfers in the background.
pub struct Receiver {
    worker: Arc<Worker>,
    max_concurrent: usize,
    /// Shutdown signal sender
    shutdown_tx: broadcast::Sender<()>,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("download_dir", &self.worker.download_dir)
            .field("chunk_size", &self.worker.chunk_size)
            .field("max_concurrent", &self.max_concurrent)
            .finish_non_exhaustive()
    }
}

impl Receiver {
    /// Create a receiver writing into `download_dir`.
    #[must_use]
    pub fn new(download_dir: impl Into<PathBuf>, config: &TransferConfig) -> Self {
        Self::build(download_dir.into(), config, None)
    }

    /// Create a receiver that also records into `history`.
    #[must_use]
    pub fn with_history(
        download_dir: impl Into<PathBuf>,
        config: &TransferConfig,
        history: Arc<TransferHistory>,
    ) -> Self {
        Self::build(download_dir.into(), config, Some(history))
    }

    fn build(
        download_dir: PathBuf,
        config: &TransferConfig,
        history: Option<Arc<TransferHistory>>,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            worker: Arc::new(Worker {
                download_dir,
                chunk_size: config.chunk_size.max(1),
                header_timeout: config.header_timeout,
                events_tx,
                history,
            }),
            max_concurrent: config.max_concurrent_receives,
            shutdown_tx,
            running: Mutex::new(None),
        }
    }

    /// Directory received files are written to.
    #[must_use]
    pub fn download_dir(&self) -> &Path {
        &self.worker.download_dir
    }

    /// Subscribe to finished-connection records.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ReceivedFile> {
        self.worker.events_tx.subscribe()
    }

    /// Address the receiver is bound to, while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Start listening and spawn the accept loop.
    ///
    /// Port `0` binds an ephemeral port; the bound address is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the receiver is already running or the listening
    /// socket cannot be bound.
    pub async fn start(&self, bind_address: IpAddr, port: u16) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            return Err(Error::AlreadyRunning("transfer receiver"));
        }

        let listener = socket::stream_server(bind_address, port)?;
        let local_addr = listener.local_addr()?;

        let semaphore = (self.max_concurrent > 0).then(|| Arc::new(Semaphore::new(self.max_concurrent)));
        let worker = Arc::clone(&self.worker);
        let shutdown_rx = self.shutdown_tx.subscribe();

        tracing::info!("Receiver listening on {}", local_addr);
        let task = tokio::spawn(accept_loop(listener, worker, semaphore, shutdown_rx));

        *running = Some(Running { local_addr, task });
        Ok(local_addr)
    }

    /// Stop accepting connections.
    ///
    /// In-flight transfers are left to finish on their own.
    pub async fn stop(&self) {
        let Some(Running { mut task, .. }) = self.running.lock().await.take() else {
            return;
        };

        let _ = self.shutdown_tx.send(());
        if tokio::time::timeout(STOP_TIMEOUT, &mut task).await.is_err() {
            task.abort();
        }
    }

    /// Check if the accept loop is running.
    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.try_lock() {
            if let Some(running) = running.take() {
                running.task.abort();
            }
        }
    }
}

async fn acquire(semaphore: Option<&Arc<Semaphore>>) -> Option<OwnedSemaphorePermit> {
    match semaphore {
        Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
        None => None,
    }
}

async fn accept_loop(
    listener: TcpListener,
    worker: Arc<Worker>,
    semaphore: Option<Arc<Semaphore>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        let permit = tokio::select! {
            permit = acquire(semaphore.as_ref()) => permit,
            _ = shutdown_rx.recv() => break,
        };

        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown_rx.recv() => break,
        };

        match accepted {
            Ok((stream, peer)) => {
                tracing::debug!("Connection from {}", peer);
                stream.set_nodelay(true).ok();
                if let Err(e) = socket::configure_tcp_keepalive(&stream) {
                    tracing::debug!("Failed to enable TCP keep-alive for {}: {}", peer, e);
                }
                let worker = Arc::clone(&worker);
                tokio::spawn(async move {
                    worker.serve(stream, peer).await;
                    drop(permit);
                });
            }
            Err(e) => {
                tracing::warn!("Failed to accept connection: {}", e);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }

    tracing::debug!("Receiver accept loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use tempfile::TempDir;
    use tokio::io::duplex;

    const CHUNK: usize = 16;
    const HEADER_WAIT: Duration = Duration::from_secs(10);

    fn frame(name: &str, size: u64, payload: &[u8]) -> Vec<u8> {
        let mut bytes = TransferHeader::new(name, size).encode().unwrap();
        bytes.extend_from_slice(payload);
        bytes
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_receive_complete_file_and_ack() {
        let dir = TempDir::new().unwrap();
        let payload: Vec<u8> = (0..40u8).collect();
        let (mut client, mut server) = duplex(1024);

        client.write_all(&frame("data.bin", 40, &payload)).await.unwrap();
        let record = receive_connection(&mut server, peer(), dir.path(), CHUNK, HEADER_WAIT).await;

        assert!(record.status.is_completed());
        assert_eq!(record.bytes_written, 40);
        assert_eq!(std::fs::read(dir.path().join("data.bin")).unwrap(), payload);

        let mut ack = [0u8; 2];
        client.read_exact(&mut ack).await.unwrap();
        assert_eq!(&ack, b"OK");
    }

    #[tokio::test]
    async fn test_extra_bytes_after_payload_not_written() {
        let dir = TempDir::new().unwrap();
        let (mut client, mut server) = duplex(1024);

        client.write_all(&frame("a.txt", 3, b"abcdef")).await.unwrap();
        let record = receive_connection(&mut server, peer(), dir.path(), CHUNK, HEADER_WAIT).await;

        assert!(record.status.is_completed());
        assert_eq!(std::fs::read(dir.path().join("a.txt")).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_early_close_keeps_partial_file() {
        let dir = TempDir::new().unwrap();
        let (mut client, mut server) = duplex(1024);

        client.write_all(&frame("big.bin", 100, &[7u8; 30])).await.unwrap();
        drop(client);

        let record = receive_connection(&mut server, peer(), dir.path(), CHUNK, HEADER_WAIT).await;
        assert!(matches!(
            record.status,
            ReceiveStatus::Failed(TransferError::Truncated {
                received: 30,
                expected: 100
            })
        ));
        assert_eq!(std::fs::read(dir.path().join("big.bin")).unwrap().len(), 30);
    }

    #[tokio::test]
    async fn test_path_components_stripped() {
        let dir = TempDir::new().unwrap();
        let (mut client, mut server) = duplex(1024);

        client
            .write_all(&frame("../../escape.txt", 2, b"hi"))
            .await
            .unwrap();
        let record = receive_connection(&mut server, peer(), dir.path(), CHUNK, HEADER_WAIT).await;

        assert!(record.status.is_completed());
        assert_eq!(record.path.unwrap(), dir.path().join("escape.txt"));
    }

    #[tokio::test]
    async fn test_malformed_header_creates_nothing() {
        let dir = TempDir::new().unwrap();
        let (mut client, mut server) = duplex(1024);

        let body = b"{\"name\": 5}";
        let mut bytes = (body.len() as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(body);
        client.write_all(&bytes).await.unwrap();

        let record = receive_connection(&mut server, peer(), dir.path(), CHUNK, HEADER_WAIT).await;
        assert_eq!(
            record.status.error().map(TransferError::kind),
            Some(FailureKind::Malformed)
        );
        assert!(record.path.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_dot_dot_name_is_malformed() {
        let dir = TempDir::new().unwrap();
        let (mut client, mut server) = duplex(1024);

        client.write_all(&frame("..", 0, b"")).await.unwrap();
        let record = receive_connection(&mut server, peer(), dir.path(), CHUNK, HEADER_WAIT).await;

        assert_eq!(
            record.status.error().map(TransferError::kind),
            Some(FailureKind::Malformed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_times_out_before_header() {
        let dir = TempDir::new().unwrap();
        let (_client, mut server) = duplex(1024);

        let record = receive_connection(&mut server, peer(), dir.path(), CHUNK, HEADER_WAIT).await;
        assert!(matches!(
            record.status,
            ReceiveStatus::Failed(TransferError::Timeout {
                operation: "header",
                secs: 10
            })
        ));
        assert!(record.path.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let dir = TempDir::new().unwrap();
        let receiver = Receiver::new(dir.path(), &TransferConfig::default());

        receiver
            .start(IpAddr::from([127, 0, 0, 1]), 0)
            .await
            .expect("start");
        assert!(matches!(
            receiver.start(IpAddr::from([127, 0, 0, 1]), 0).await,
            Err(Error::AlreadyRunning(_))
        ));

        receiver.stop().await;
        assert!(!receiver.is_running().await);
        assert!(receiver.local_addr().await.is_none());
    }
}
