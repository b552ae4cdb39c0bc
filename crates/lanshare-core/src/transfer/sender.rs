//! Outbound transfers.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use super::{ProgressFn, TransferSession};
use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::protocol::{self, TransferHeader};
use crate::socket;

/// Summary of a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReport {
    /// Name announced to the receiver
    pub file_name: String,
    /// Destination
    pub target: SocketAddr,
    /// Payload bytes sent
    pub bytes: u64,
    /// Time from connect to acknowledgment
    pub elapsed: Duration,
}

impl SendReport {
    /// Average throughput in bytes per second.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn speed_bps(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.bytes as f64 / secs) as u64
        } else {
            0
        }
    }
}

/// Outcome of one file in a batch send.
#[derive(Debug, Clone)]
pub struct BatchItem {
    /// The file as given
    pub path: PathBuf,
    /// Its send result
    pub result: Result<SendReport, TransferError>,
}

/// Streams single files to peers.
#[derive(Debug, Clone)]
pub struct FileSender {
    chunk_size: usize,
    connect_timeout: Duration,
    ack_timeout: Duration,
}

impl Default for FileSender {
    fn default() -> Self {
        Self::new(&TransferConfig::default())
    }
}

impl FileSender {
    /// Create a sender from transfer settings.
    #[must_use]
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            connect_timeout: config.connect_timeout,
            ack_timeout: config.ack_timeout,
        }
    }

    /// Send `path` to `target`.
    ///
    /// Succeeds only once every declared byte has been written and the
    /// receiver has acknowledged. `progress` is called after each chunk with
    /// `(bytes_sent, total)`. `cancel` is checked before each chunk; once it
    /// fires the connection is dropped without waiting for an
    /// acknowledgment.
    ///
    /// # Errors
    ///
    /// - [`TransferError::NotFound`] before any network activity if the file
    ///   cannot be opened
    /// - [`TransferError::Unreachable`] or [`TransferError::Timeout`] if the
    ///   connection cannot be opened
    /// - [`TransferError::Interrupted`] on cancellation
    /// - [`TransferError::Timeout`] if no acknowledgment arrives in time
    pub async fn send(
        &self,
        path: &Path,
        target: SocketAddr,
        progress: Option<&ProgressFn>,
        cancel: Option<&CancellationToken>,
    ) -> Result<SendReport, TransferError> {
        let (file, header) = open_source(path).await?;
        self.send_opened(file, &header, target, progress, cancel).await
    }

    /// Connect to `target` and send a file already opened with
    /// [`open_source`].
    ///
    /// # Errors
    ///
    /// As [`FileSender::send`], minus [`TransferError::NotFound`].
    pub async fn send_opened(
        &self,
        file: File,
        header: &TransferHeader,
        target: SocketAddr,
        progress: Option<&ProgressFn>,
        cancel: Option<&CancellationToken>,
    ) -> Result<SendReport, TransferError> {
        let mut stream = socket::stream_client(target, self.connect_timeout).await?;
        tracing::debug!("Connected to {} for {}", target, header.name);

        let result = self
            .send_over(&mut stream, target, file, header, progress, cancel)
            .await;

        if result.is_ok() {
            let _ = stream.shutdown().await;
        }
        result
    }

    /// Run the send protocol over an already open stream.
    pub async fn send_over<S>(
        &self,
        stream: &mut S,
        target: SocketAddr,
        mut file: File,
        header: &TransferHeader,
        progress: Option<&ProgressFn>,
        cancel: Option<&CancellationToken>,
    ) -> Result<SendReport, TransferError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut session = TransferSession::new(header.size);

        protocol::write_header(stream, header).await?;

        let capacity = usize::try_from(header.size).map_or(self.chunk_size, |s| s.min(self.chunk_size));
        let mut buf = vec![0u8; capacity];

        while !session.is_complete() {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                tracing::info!(
                    "Send of {} to {} cancelled after {} bytes",
                    header.name,
                    target,
                    session.bytes_transferred
                );
                return Err(TransferError::Interrupted {
                    bytes_sent: session.bytes_transferred,
                });
            }

            let want = usize::try_from(session.remaining()).map_or(buf.len(), |r| r.min(buf.len()));
            let n = fill_chunk(&mut file, &mut buf[..want])
                .await
                .map_err(|e| TransferError::Unknown(format!("reading source file: {e}")))?;
            if n == 0 {
                return Err(TransferError::Unknown(format!(
                    "source file shrank to {} of {} bytes during send",
                    session.bytes_transferred, header.size
                )));
            }

            stream
                .write_all(&buf[..n])
                .await
                .map_err(|e| TransferError::from_io(&e, target, "write", 0))?;
            session.advance(n as u64);

            if let Some(progress) = progress {
                progress(session.bytes_transferred, session.total_bytes);
            }
        }

        stream
            .flush()
            .await
            .map_err(|e| TransferError::from_io(&e, target, "write", 0))?;

        tokio::time::timeout(self.ack_timeout, protocol::read_ack(stream))
            .await
            .map_err(|_| TransferError::Timeout {
                operation: "acknowledgment",
                secs: self.ack_timeout.as_secs(),
            })??;

        let report = SendReport {
            file_name: header.name.clone(),
            target,
            bytes: session.bytes_transferred,
            elapsed: session.elapsed(),
        };
        tracing::info!(
            "Sent {} ({} bytes) to {} in {:?}",
            report.file_name,
            report.bytes,
            target,
            report.elapsed
        );
        Ok(report)
    }
}

/// Open the source file and build its header.
pub async fn open_source(path: &Path) -> Result<(File, TransferHeader), TransferError> {
    let not_found = || TransferError::NotFound(PathBuf::from(path));

    let metadata = tokio::fs::metadata(path).await.map_err(|_| not_found())?;
    if !metadata.is_file() {
        return Err(not_found());
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(not_found)?;
    let file = File::open(path).await.map_err(|_| not_found())?;

    Ok((file, TransferHeader::new(name, metadata.len())))
}

/// Read until `buf` is full or the file ends.
async fn fill_chunk(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
