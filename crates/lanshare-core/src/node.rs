//! A single LanShare node: discovery, receiver and sender behind one handle.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::config::Config;
use crate::discovery::{DiscoveryService, Peer, PeerRegistry};
use crate::error::{Result, TransferError};
use crate::history::{TransferDirection, TransferHistory, TransferHistoryEntry};
use crate::transfer::{
    sender, BatchItem, BatchProgressFn, CancellationToken, FileSender, ProgressFn, ReceivedFile,
    Receiver, SendReport,
};

/// Everything a front end needs to discover peers and move files.
#[derive(Debug)]
pub struct Node {
    config: Config,
    registry: Arc<PeerRegistry>,
    discovery: DiscoveryService,
    receiver: Receiver,
    sender: FileSender,
    history: Arc<TransferHistory>,
}

impl Node {
    /// Build a node from configuration. Nothing is started.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(PeerRegistry::new(config.discovery.peer_expiry));
        let history = Arc::new(TransferHistory::new(&config.history));
        let discovery = DiscoveryService::new(&config, Arc::clone(&registry));
        let receiver = Receiver::with_history(
            config.general.download_dir.clone(),
            &config.transfer,
            Arc::clone(&history),
        );
        let sender = FileSender::new(&config.transfer);

        Ok(Self {
            config,
            registry,
            discovery,
            receiver,
            sender,
            history,
        })
    }

    /// The configuration this node was built with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared peer registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    /// Transfer history.
    #[must_use]
    pub fn history(&self) -> &Arc<TransferHistory> {
        &self.history
    }

    /// Start the periodic discovery loop.
    pub async fn start_discovery_background(&self) -> Result<()> {
        self.discovery.start_background().await
    }

    /// Stop the periodic discovery loop.
    pub async fn stop_discovery_background(&self) {
        self.discovery.stop_background().await;
    }

    /// Broadcast once and collect answers for `timeout`.
    pub async fn discover_now(&self, timeout: Duration) -> Result<Vec<Peer>> {
        self.discovery.discover_now(timeout).await
    }

    /// Snapshot of live peers.
    #[must_use]
    pub fn list_known_peers(&self) -> Vec<Peer> {
        self.discovery.list_known_peers()
    }

    /// Send one file to `address:port` and record the outcome in history.
    ///
    /// The history entry carries the file's size as its total whether or
    /// not the send succeeds.
    pub async fn send_file(
        &self,
        path: impl AsRef<Path>,
        address: IpAddr,
        port: u16,
        progress: Option<&ProgressFn>,
        cancel: Option<&CancellationToken>,
    ) -> std::result::Result<SendReport, TransferError> {
        let path = path.as_ref();
        let target = SocketAddr::new(address, port);
        let started = Instant::now();

        let (result, total) = match sender::open_source(path).await {
            Ok((file, header)) => {
                let result = self
                    .sender
                    .send_opened(file, &header, target, progress, cancel)
                    .await;
                (result, header.size)
            }
            Err(e) => (Err(e), 0),
        };

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let entry = TransferHistoryEntry::new(TransferDirection::Sent, name, target);
        let entry = match &result {
            Ok(report) => entry.with_stats(report.bytes, total, report.elapsed),
            Err(e) => {
                let sent = match e {
                    TransferError::Interrupted { bytes_sent } => *bytes_sent,
                    _ => 0,
                };
                entry
                    .with_stats(sent, total, started.elapsed())
                    .with_error(e)
            }
        };
        self.history.add(entry);

        result
    }

    /// Send several files to `address:port`, one connection each, in order.
    ///
    /// A failed file does not stop the batch; cancellation does. Files after
    /// the cancellation point are not attempted and have no entry in the
    /// result. Every attempted file is recorded in history.
    pub async fn send_files<P: AsRef<Path>>(
        &self,
        paths: &[P],
        address: IpAddr,
        port: u16,
        progress: Option<Arc<BatchProgressFn>>,
        cancel: Option<&CancellationToken>,
    ) -> Vec<BatchItem> {
        let count = paths.len();
        let mut items = Vec::with_capacity(count);

        for (i, path) in paths.iter().enumerate() {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                tracing::info!("Batch send cancelled after {} of {} files", i, count);
                break;
            }

            let index = i + 1;
            let per_file = progress.clone().map(|f| {
                move |done: u64, total: u64| f(index, count, done, total)
            });
            let result = self
                .send_file(
                    path,
                    address,
                    port,
                    per_file.as_ref().map(|f| f as &ProgressFn),
                    cancel,
                )
                .await;

            let interrupted = matches!(result, Err(TransferError::Interrupted { .. }));
            items.push(BatchItem {
                path: path.as_ref().to_path_buf(),
                result,
            });
            if interrupted {
                break;
            }
        }

        items
    }

    /// Start accepting transfers.
    ///
    /// `None` falls back to the configured bind address and transfer port.
    pub async fn start_receiver(
        &self,
        bind_address: Option<IpAddr>,
        port: Option<u16>,
    ) -> Result<SocketAddr> {
        self.receiver
            .start(
                bind_address.unwrap_or(self.config.network.bind_address),
                port.unwrap_or(self.config.network.transfer_port),
            )
            .await
    }

    /// Stop accepting transfers. In-flight ones finish on their own.
    pub async fn stop_receiver(&self) {
        self.receiver.stop().await;
    }

    /// Subscribe to finished inbound transfers.
    #[must_use]
    pub fn subscribe_received(&self) -> broadcast::Receiver<ReceivedFile> {
        self.receiver.subscribe()
    }

    /// Stop discovery and the receiver.
    pub async fn shutdown(&self) {
        self.discovery.stop_background().await;
        self.receiver.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::TransferState;
    use crate::FailureKind;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.general.download_dir = dir.path().join("inbox");
        config.network.bind_address = IpAddr::from([127, 0, 0, 1]);
        config.network.advertise_address = Some(IpAddr::from([127, 0, 0, 1]));
        config
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.transfer.chunk_size = 0;
        assert!(Node::new(config).is_err());
    }

    #[tokio::test]
    async fn test_failed_send_recorded() {
        let dir = TempDir::new().unwrap();
        let node = Node::new(test_config(&dir)).unwrap();

        let err = node
            .send_file(
                dir.path().join("absent.txt"),
                IpAddr::from([127, 0, 0, 1]),
                1,
                None,
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::NotFound);

        let entries = node.history().list();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].direction, TransferDirection::Sent);
        assert_eq!(entries[0].state, TransferState::Failed(FailureKind::NotFound));
    }

    #[tokio::test]
    async fn test_send_to_own_receiver() {
        let dir = TempDir::new().unwrap();
        let node = Node::new(test_config(&dir)).unwrap();
        let addr = node.start_receiver(None, Some(0)).await.unwrap();
        let mut events = node.subscribe_received();

        let source = dir.path().join("hello.txt");
        std::fs::write(&source, b"hello over loopback").unwrap();

        let report = node
            .send_file(&source, addr.ip(), addr.port(), None, None)
            .await
            .unwrap();
        assert_eq!(report.bytes, 19);

        let received = events.recv().await.unwrap();
        assert!(received.status.is_completed());
        assert_eq!(
            std::fs::read(dir.path().join("inbox").join("hello.txt")).unwrap(),
            b"hello over loopback"
        );

        node.shutdown().await;
        assert_eq!(node.history().len(), 2);
    }

    #[tokio::test]
    async fn test_batch_continues_past_failed_file() {
        let dir = TempDir::new().unwrap();
        let node = Node::new(test_config(&dir)).unwrap();
        let addr = node.start_receiver(None, Some(0)).await.unwrap();

        let first = dir.path().join("one.txt");
        let third = dir.path().join("three.txt");
        std::fs::write(&first, b"first").unwrap();
        std::fs::write(&third, b"third file").unwrap();
        let paths = [first, dir.path().join("missing.txt"), third];

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorded = Arc::clone(&seen);
        let progress: Arc<BatchProgressFn> =
            Arc::new(move |index: usize, count: usize, done: u64, total: u64| {
                recorded.lock().unwrap().push((index, count, done, total));
            });

        let items = node
            .send_files(&paths, addr.ip(), addr.port(), Some(progress), None)
            .await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].result.as_ref().unwrap().bytes, 5);
        assert_eq!(
            items[1].result.as_ref().unwrap_err().kind(),
            FailureKind::NotFound
        );
        assert_eq!(items[2].result.as_ref().unwrap().bytes, 10);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 3, 5, 5), (3, 3, 10, 10)]);

        let sent: Vec<_> = node
            .history()
            .list()
            .into_iter()
            .filter(|e| e.direction == TransferDirection::Sent)
            .collect();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1].state, TransferState::Failed(FailureKind::NotFound));

        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_batch_stops_on_cancel_and_records_size() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.transfer.chunk_size = 64 * 1024;
        let node = Node::new(config).unwrap();
        let addr = node.start_receiver(None, Some(0)).await.unwrap();

        let big = dir.path().join("big.bin");
        let small = dir.path().join("small.txt");
        std::fs::write(&big, vec![7u8; 1024 * 1024]).unwrap();
        std::fs::write(&small, b"never sent").unwrap();

        let token = CancellationToken::new();
        let trigger = token.clone();
        let progress: Arc<BatchProgressFn> =
            Arc::new(move |index: usize, _: usize, _: u64, _: u64| {
                if index == 1 {
                    trigger.cancel();
                }
            });

        let items = node
            .send_files(&[big, small], addr.ip(), addr.port(), Some(progress), Some(&token))
            .await;

        assert_eq!(items.len(), 1);
        assert!(matches!(
            items[0].result,
            Err(TransferError::Interrupted { bytes_sent: 65_536 })
        ));

        let sent: Vec<_> = node
            .history()
            .list()
            .into_iter()
            .filter(|e| e.direction == TransferDirection::Sent)
            .collect();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].total_bytes, 1_048_576);
        assert_eq!(sent[0].bytes_transferred, 65_536);
        assert_eq!(sent[0].state, TransferState::Failed(FailureKind::Interrupted));

        node.shutdown().await;
    }
}
