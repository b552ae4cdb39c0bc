//! End-to-end transfer tests over loopback TCP.

mod common;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use lanshare_core::config::TransferConfig;
use lanshare_core::transfer::{
    CancellationToken, FileSender, ReceiveStatus, ReceivedFile, Receiver,
};
use lanshare_core::{FailureKind, TransferError, DEFAULT_CHUNK_SIZE};

use common::{assert_files_equal, create_temp_dir, create_test_file, random_bytes, LOOPBACK};

async fn start_receiver(dir: &std::path::Path, config: &TransferConfig) -> (Receiver, SocketAddr) {
    let receiver = Receiver::new(dir, config);
    let addr = receiver.start(LOOPBACK, 0).await.expect("start receiver");
    (receiver, addr)
}

async fn next_event(events: &mut tokio::sync::broadcast::Receiver<ReceivedFile>) -> ReceivedFile {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("receiver event in time")
        .expect("event channel open")
}

/// Files at and around the chunk boundary arrive byte-identical.
#[tokio::test]
async fn test_roundtrip_chunk_boundaries() {
    let src = create_temp_dir();
    let dst = create_temp_dir();
    let config = TransferConfig::default();
    let (receiver, addr) = start_receiver(dst.path(), &config).await;
    let mut events = receiver.subscribe();
    let sender = FileSender::new(&config);

    for size in [
        0,
        DEFAULT_CHUNK_SIZE - 1,
        DEFAULT_CHUNK_SIZE,
        DEFAULT_CHUNK_SIZE + 1,
        3 * DEFAULT_CHUNK_SIZE + 17,
    ] {
        let name = format!("file_{size}.bin");
        let source = create_test_file(src.path(), &name, &random_bytes(size));

        let report = sender
            .send(&source, addr, None, None)
            .await
            .unwrap_or_else(|e| panic!("send of {size} bytes failed: {e}"));
        assert_eq!(report.bytes, size as u64);

        let event = next_event(&mut events).await;
        assert!(event.status.is_completed(), "{size} bytes: {:?}", event.status);
        assert_eq!(event.bytes_written, size as u64);
        assert_files_equal(&source, &dst.path().join(&name));
    }

    receiver.stop().await;
}

/// A 2 MiB file with 1 MiB chunks reports progress exactly twice.
#[tokio::test]
async fn test_progress_two_chunks() {
    let src = create_temp_dir();
    let dst = create_temp_dir();
    let config = TransferConfig::default();
    let (receiver, addr) = start_receiver(dst.path(), &config).await;

    let source = create_test_file(src.path(), "two_mib.bin", &random_bytes(2 * 1024 * 1024));
    let calls = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&calls);
    let progress = move |done: u64, total: u64| recorded.lock().unwrap().push((done, total));

    let report = FileSender::new(&config)
        .send(&source, addr, Some(&progress), None)
        .await
        .expect("send");

    assert_eq!(report.bytes, 2_097_152);
    assert_eq!(
        *calls.lock().unwrap(),
        vec![(1_048_576, 2_097_152), (2_097_152, 2_097_152)]
    );

    receiver.stop().await;
}

/// A second file with the same name gets a suffix; the first is untouched.
#[tokio::test]
async fn test_duplicate_name_gets_suffix() {
    let src = create_temp_dir();
    let dst = create_temp_dir();
    let config = TransferConfig::default();
    let (receiver, addr) = start_receiver(dst.path(), &config).await;
    let mut events = receiver.subscribe();
    let sender = FileSender::new(&config);

    let first = create_test_file(src.path(), "a/report.txt", b"first version");
    let second = create_test_file(src.path(), "b/report.txt", b"second version");

    sender.send(&first, addr, None, None).await.expect("first send");
    next_event(&mut events).await;
    sender.send(&second, addr, None, None).await.expect("second send");
    let event = next_event(&mut events).await;

    assert_eq!(event.path.as_deref(), Some(dst.path().join("report_1.txt").as_path()));
    assert_files_equal(&first, &dst.path().join("report.txt"));
    assert_files_equal(&second, &dst.path().join("report_1.txt"));

    receiver.stop().await;
}

/// Cancelling mid-transfer interrupts the sender and truncates the receive.
#[tokio::test]
async fn test_cancel_mid_transfer() {
    let src = create_temp_dir();
    let dst = create_temp_dir();
    let config = TransferConfig {
        chunk_size: 64 * 1024,
        ..TransferConfig::default()
    };
    let (receiver, addr) = start_receiver(dst.path(), &config).await;
    let mut events = receiver.subscribe();

    let source = create_test_file(src.path(), "big.bin", &random_bytes(1024 * 1024));
    let token = CancellationToken::new();
    let trigger = token.clone();
    let progress = move |done: u64, _total: u64| {
        if done >= 64 * 1024 {
            trigger.cancel();
        }
    };

    let err = FileSender::new(&config)
        .send(&source, addr, Some(&progress), Some(&token))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Interrupted { bytes_sent: 65_536 }));
    assert!(!err.is_recoverable());

    let event = next_event(&mut events).await;
    assert!(matches!(
        event.status,
        ReceiveStatus::Failed(TransferError::Truncated {
            received: 65_536,
            expected: 1_048_576
        })
    ));
    let partial = std::fs::metadata(dst.path().join("big.bin")).expect("partial file kept");
    assert_eq!(partial.len(), 65_536);

    receiver.stop().await;
}

/// Nothing listening on the target port is reported as unreachable.
#[tokio::test]
async fn test_unreachable_peer() {
    let src = create_temp_dir();
    let source = create_test_file(src.path(), "x.txt", b"x");

    let listener = std::net::TcpListener::bind((LOOPBACK, 0)).unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = FileSender::default()
        .send(&source, addr, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), FailureKind::Unreachable);
    assert!(err.is_recoverable());
}

/// A garbage connection is isolated; the receiver keeps serving.
#[tokio::test]
async fn test_malformed_connection_isolated() {
    let src = create_temp_dir();
    let dst = create_temp_dir();
    let config = TransferConfig::default();
    let (receiver, addr) = start_receiver(dst.path(), &config).await;
    let mut events = receiver.subscribe();

    let mut raw = TcpStream::connect(addr).await.unwrap();
    raw.write_all(&[0, 0, 0, 5, b'{', b'b', b'a', b'd', b'!']).await.unwrap();
    drop(raw);

    let event = next_event(&mut events).await;
    assert_eq!(
        event.status.error().map(TransferError::kind),
        Some(FailureKind::Malformed)
    );

    let source = create_test_file(src.path(), "ok.txt", b"still working");
    FileSender::new(&config)
        .send(&source, addr, None, None)
        .await
        .expect("receiver still serving");

    receiver.stop().await;
}

/// Concurrent sends with a cap of one are served one at a time, all succeed.
#[tokio::test]
async fn test_concurrent_sends_with_cap() {
    let src = create_temp_dir();
    let dst = create_temp_dir();
    let config = TransferConfig {
        max_concurrent_receives: 1,
        ..TransferConfig::default()
    };
    let (receiver, addr) = start_receiver(dst.path(), &config).await;

    let mut tasks = Vec::new();
    for i in 0..4 {
        let source = create_test_file(src.path(), &format!("f{i}.bin"), &random_bytes(300_000));
        let sender = FileSender::new(&config);
        tasks.push(tokio::spawn(async move {
            sender.send(&source, addr, None, None).await
        }));
    }

    for task in tasks {
        task.await.unwrap().expect("send under cap");
    }
    for i in 0..4 {
        assert_files_equal(
            &src.path().join(format!("f{i}.bin")),
            &dst.path().join(format!("f{i}.bin")),
        );
    }

    receiver.stop().await;
}

/// A connection that never sends a header releases its slot after the header timeout.
#[tokio::test]
async fn test_silent_connection_does_not_starve_cap() {
    let src = create_temp_dir();
    let dst = create_temp_dir();
    let config = TransferConfig {
        max_concurrent_receives: 1,
        header_timeout: Duration::from_millis(300),
        ..TransferConfig::default()
    };
    let (receiver, addr) = start_receiver(dst.path(), &config).await;
    let mut events = receiver.subscribe();

    let _silent = TcpStream::connect(addr).await.expect("silent connect");
    let source = create_test_file(src.path(), "after.txt", b"hello");
    let report = FileSender::new(&config)
        .send(&source, addr, None, None)
        .await
        .expect("send after silent peer");
    assert_eq!(report.bytes, 5);

    let first = next_event(&mut events).await;
    assert!(matches!(
        first.status.error(),
        Some(TransferError::Timeout { operation: "header", .. })
    ));
    let second = next_event(&mut events).await;
    assert!(second.status.is_completed());
    assert_files_equal(&source, &dst.path().join("after.txt"));

    receiver.stop().await;
}

/// After stop, new connections are refused.
#[tokio::test]
async fn test_stop_closes_listener() {
    let dst = create_temp_dir();
    let (receiver, addr) = start_receiver(dst.path(), &TransferConfig::default()).await;

    receiver.stop().await;

    assert!(TcpStream::connect(addr).await.is_err());
}
