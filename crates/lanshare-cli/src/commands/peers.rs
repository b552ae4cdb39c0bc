//! Peers command implementation.

use anyhow::{Context, Result};

use lanshare_core::discovery::Peer;
use lanshare_core::Node;

use super::PeersArgs;
use crate::ui::{parse_duration, truncate_string};

/// Run the peers command.
pub async fn run(args: PeersArgs) -> Result<()> {
    let config = super::load_config();

    let timeout = parse_duration(&args.timeout)
        .context("Invalid timeout format. Use formats like '3s', '500ms', '1m'")?;

    if !args.json {
        println!();
        println!("Searching for peers ({})...", args.timeout);
        println!();
    }

    let node = Node::new(config).context("Invalid configuration")?;
    let peers = node
        .discover_now(timeout)
        .await
        .context("Failed to open discovery sockets")?;

    if args.json {
        output_json_peers(&peers)?;
    } else {
        display_peers(&peers);
    }

    Ok(())
}

/// Output peers as JSON.
fn output_json_peers(peers: &[Peer]) -> Result<()> {
    let output = serde_json::json!({
        "peers": peers.iter().map(|p| serde_json::json!({
            "address": p.address.to_string(),
            "name": p.display_name,
            "listen_port": p.listen_port,
            "last_seen": p.last_seen_at.to_rfc3339(),
        })).collect::<Vec<_>>(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Display peers as text table.
fn display_peers(peers: &[Peer]) {
    println!("Peers on Network:");
    println!("{}", "─".repeat(60));
    println!(
        "  {:15}  {:20}  {:6}  {:10}",
        "Address", "Name", "Port", "Last seen"
    );
    println!("{}", "─".repeat(60));

    if peers.is_empty() {
        println!("  (no peers found)");
        println!("{}", "─".repeat(60));
        return;
    }

    for peer in peers {
        let port = peer
            .listen_port
            .map_or_else(|| "-".to_string(), |p| p.to_string());
        let last_seen = peer
            .last_seen_at
            .with_timezone(&chrono::Local)
            .format("%H:%M:%S")
            .to_string();

        println!(
            "  {:15}  {:20}  {:6}  {:10}",
            peer.address.to_string(),
            truncate_string(&peer.display_name, 20),
            port,
            last_seen
        );
    }

    println!("{}", "─".repeat(60));
}
