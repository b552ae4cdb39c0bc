//! Send command implementation.
//!
//! Sends one or more files to a peer given by address or by discovered
//! name, one connection per file. Ctrl-C cancels at the next chunk
//! boundary and skips the remaining files.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;

use lanshare_core::connection::parse_host_address_with_port;
use lanshare_core::file::format_size;
use lanshare_core::transfer::BatchProgressFn;
use lanshare_core::{FailureKind, Node, TransferError};

use super::SendArgs;
use crate::ui::{parse_duration, progress_line};

/// Run the send command.
pub async fn run(args: SendArgs) -> Result<()> {
    let config = super::load_config();
    let default_port = config.network.transfer_port;
    let node = Node::new(config).context("Invalid configuration")?;

    let target = resolve_target(&node, &args, default_port).await?;
    let quiet = args.quiet;
    let count = args.files.len();

    if !quiet {
        println!();
        println!("LanShare v{}", lanshare_core::VERSION);
        println!("{}", "-".repeat(37));
        println!();
        if count == 1 {
            println!("  Sending {} to {}", file_label(&args.files[0]), target);
        } else {
            println!("  Sending {} files to {}", count, target);
        }
        println!();
    }

    let token = CancellationToken::new();
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel();
        }
    });

    let labels: Vec<String> = args.files.iter().map(|f| file_label(f)).collect();
    let started = Mutex::new((0usize, Instant::now()));
    let show = move |index: usize, count: usize, done: u64, total: u64| {
        if quiet {
            return;
        }
        let mut current = started.lock().unwrap_or_else(PoisonError::into_inner);
        if current.0 != index {
            if current.0 != 0 {
                println!();
            }
            *current = (index, Instant::now());
        }
        let name = labels.get(index - 1).map_or("", String::as_str);
        let line = progress_line(name, done, total, current.1.elapsed());
        if count > 1 {
            print!("\r  ({}/{}) {}    ", index, count, line);
        } else {
            print!("\r  {}    ", line);
        }
        let _ = io::stdout().flush();
    };
    let progress: Arc<BatchProgressFn> = Arc::new(show);

    let items = node
        .send_files(&args.files, target.ip(), target.port(), Some(progress), Some(&token))
        .await;

    if !quiet {
        println!();
        println!();
    }

    let mut failures = 0;
    for item in &items {
        match &item.result {
            Ok(report) => {
                if !quiet {
                    println!(
                        "  Sent {} ({}) in {:.1}s - {}/s",
                        report.file_name,
                        format_size(report.bytes),
                        report.elapsed.as_secs_f64(),
                        format_size(report.speed_bps())
                    );
                }
            }
            Err(e) => {
                failures += 1;
                eprintln!("  {}: {}", item.path.display(), describe_failure(e));
            }
        }
    }
    let skipped = count - items.len();

    if count > 1 && !quiet {
        println!();
        println!(
            "  {} sent, {} failed, {} not attempted",
            items.len() - failures,
            failures,
            skipped
        );
    }

    if failures > 0 || skipped > 0 {
        bail!("{} of {} file(s) were not delivered", failures + skipped, count);
    }
    Ok(())
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Resolve the target argument to a transfer address.
///
/// Addresses are used as given; anything else is looked up by peer name.
async fn resolve_target(node: &Node, args: &SendArgs, default_port: u16) -> Result<SocketAddr> {
    if let Ok(addr) = parse_host_address_with_port(&args.target, default_port) {
        return Ok(addr);
    }

    let timeout = parse_duration(&args.timeout)
        .context("Invalid timeout format. Use formats like '3s', '500ms', '1m'")?;

    if !args.quiet {
        println!("  Looking for '{}' ({})...", args.target, args.timeout);
    }

    let peers = node
        .discover_now(timeout)
        .await
        .context("Failed to open discovery sockets")?;

    let Some(peer) = peers
        .iter()
        .find(|p| p.display_name.eq_ignore_ascii_case(&args.target))
    else {
        bail!(
            "No peer named '{}' found. Use an address (IP or IP:PORT) or run 'lanshare peers'",
            args.target
        );
    };

    Ok(peer
        .transfer_addr()
        .unwrap_or_else(|| SocketAddr::new(peer.address, default_port)))
}

/// User-facing message for each failure kind.
fn describe_failure(error: &TransferError) -> String {
    let hint = match error.kind() {
        FailureKind::NotFound => "Check the file path.",
        FailureKind::Unreachable => "Is 'lanshare receive' running on the peer?",
        FailureKind::Timeout => "The peer did not answer in time. Try again.",
        FailureKind::Interrupted => "Transfer cancelled.",
        FailureKind::Malformed => "The peer replied with unexpected data.",
        FailureKind::Truncated | FailureKind::Unknown => "The connection was lost.",
    };
    format!("{error}. {hint}")
}
