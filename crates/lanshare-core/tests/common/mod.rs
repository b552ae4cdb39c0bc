//! Common test utilities for `LanShare` integration tests.
//!
//! This module provides shared functionality for integration tests.

#![allow(dead_code)]

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use lanshare_core::config::Config;

/// Base port for tests, incremented for each test to avoid conflicts.
static TEST_PORT_COUNTER: AtomicU16 = AtomicU16::new(51600);

/// Loopback address used by every test endpoint.
pub const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Assert that two files have identical content.
pub fn assert_files_equal(path1: &Path, path2: &Path) {
    let content1 = std::fs::read(path1).expect("Failed to read first file");
    let content2 = std::fs::read(path2).expect("Failed to read second file");
    assert_eq!(content1, content2, "File contents differ");
}

/// Get a unique discovery port so parallel tests never share a listener.
pub fn get_test_port() -> u16 {
    TEST_PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Configuration confined to loopback.
///
/// Announcements are "broadcast" to 127.0.0.1 on a unique port, so a node
/// hears itself and any datagram a test unicasts to that port.
pub fn loopback_config(download_dir: &Path) -> Config {
    let mut config = Config::default();
    config.general.device_name = "test-node".to_string();
    config.general.download_dir = download_dir.to_path_buf();
    config.network.discovery_port = get_test_port();
    config.network.transfer_port = 0;
    config.network.bind_address = LOOPBACK;
    config.network.broadcast_address = Ipv4Addr::LOCALHOST;
    config.network.advertise_address = Some(LOOPBACK);
    config.discovery.interval = Duration::from_millis(200);
    config.discovery.listen_window = Duration::from_millis(100);
    config
}
