//! Receive command implementation.
//!
//! Runs the transfer receiver and, unless disabled, the discovery loop so
//! other nodes can find this one. Stops on Ctrl-C.

use anyhow::{Context, Result};
use tokio::sync::broadcast::error::RecvError;

use lanshare_core::file::format_size;
use lanshare_core::history::{TransferDirection, TransferHistoryEntry};
use lanshare_core::transfer::{ReceiveStatus, ReceivedFile};
use lanshare_core::Node;

use super::ReceiveArgs;

/// Run the receive command.
pub async fn run(args: ReceiveArgs) -> Result<()> {
    let mut config = super::load_config();
    if let Some(dir) = args.dir {
        config.general.download_dir = dir;
    }
    if let Some(port) = args.port {
        config.network.transfer_port = port;
    }

    let download_dir = config.general.download_dir.clone();
    let node = Node::new(config).context("Invalid configuration")?;

    let mut events = node.subscribe_received();
    let addr = node
        .start_receiver(None, None)
        .await
        .context("Failed to start receiver")?;

    if !args.no_discovery {
        node.start_discovery_background()
            .await
            .context("Failed to start discovery")?;
    }

    println!();
    println!("LanShare v{}", lanshare_core::VERSION);
    println!("{}", "-".repeat(37));
    println!();
    println!("  Device:    {}", node.config().general.device_name);
    println!("  Listening: {}", addr);
    println!("  Saving to: {}", download_dir.display());
    println!();
    println!("  Waiting for files. Press Ctrl-C to stop.");
    println!();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(record) => display_received(&record),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!("Missed {} receive notifications", missed);
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    node.shutdown().await;

    let received: Vec<_> = node
        .history()
        .list()
        .into_iter()
        .filter(|e| e.direction == TransferDirection::Received)
        .collect();
    println!();
    println!("  Stopped. {} transfer(s) this session.", received.len());
    for entry in &received {
        println!("{}", summary_line(entry));
    }
    Ok(())
}

fn summary_line(entry: &TransferHistoryEntry) -> String {
    format!(
        "  {}  {}  {} / {}  {}",
        entry.formatted_timestamp(),
        entry.file_name,
        format_size(entry.bytes_transferred),
        format_size(entry.total_bytes),
        entry.state
    )
}

fn display_received(record: &ReceivedFile) {
    let name = record
        .path
        .as_deref()
        .map(|p| p.display().to_string())
        .or_else(|| record.header.as_ref().map(|h| h.name.clone()))
        .unwrap_or_else(|| "(no header)".to_string());

    match &record.status {
        ReceiveStatus::Completed => println!(
            "  ✓ {} ({}) from {}",
            name,
            format_size(record.bytes_written),
            record.peer.ip()
        ),
        ReceiveStatus::Failed(e) => println!("  ✗ {} from {}: {}", name, record.peer.ip(), e),
    }
}
