//! Config command implementation.

use std::time::Duration;

use anyhow::Result;

use lanshare_core::config::Config;

use super::{ConfigAction, ConfigArgs};
use crate::ui::parse_duration;

/// Run the config command.
pub async fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Show => show(&super::load_config()),

        ConfigAction::Path => println!("{}", Config::config_path().display()),

        ConfigAction::Get { key } => {
            let config = super::load_config();
            match get_config_value(&config, &key) {
                Some(v) => println!("{}: {}", key, v),
                None => println!("Unknown configuration key: {}", key),
            }
        }

        ConfigAction::Set { key, value } => {
            let mut config = super::load_config();
            if set_config_value(&mut config, &key, &value)? {
                config.validate()?;
                config.save()?;
                println!("Set {} = {}", key, value);
            } else {
                println!("Unknown configuration key: {}", key);
            }
        }

        ConfigAction::Reset => {
            Config::default().save()?;
            println!("Configuration reset to defaults.");
        }
    }

    Ok(())
}

fn show(config: &Config) {
    println!();
    println!("LanShare Configuration");
    println!("{}", "─".repeat(50));
    println!();
    println!("[general]");
    println!("  device_name = \"{}\"", config.general.device_name);
    println!("  download_dir = \"{}\"", config.general.download_dir.display());
    println!();
    println!("[network]");
    println!("  discovery_port = {}", config.network.discovery_port);
    println!("  transfer_port = {}", config.network.transfer_port);
    println!("  bind_address = \"{}\"", config.network.bind_address);
    println!("  broadcast_address = \"{}\"", config.network.broadcast_address);
    if let Some(addr) = config.network.advertise_address {
        println!("  advertise_address = \"{}\"", addr);
    }
    println!();
    println!("[discovery]");
    println!("  interval = \"{}\"", format_duration(config.discovery.interval));
    println!("  listen_window = \"{}\"", format_duration(config.discovery.listen_window));
    println!("  peer_expiry = \"{}\"", format_duration(config.discovery.peer_expiry));
    println!("  suppress_self = {}", config.discovery.suppress_self);
    println!("  respond_to_discovery = {}", config.discovery.respond_to_discovery);
    println!();
    println!("[transfer]");
    println!("  chunk_size = {}", config.transfer.chunk_size);
    println!("  ack_timeout = \"{}\"", format_duration(config.transfer.ack_timeout));
    println!("  header_timeout = \"{}\"", format_duration(config.transfer.header_timeout));
    println!("  connect_timeout = \"{}\"", format_duration(config.transfer.connect_timeout));
    println!(
        "  max_concurrent_receives = {}",
        config.transfer.max_concurrent_receives
    );
    println!();
}

fn format_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

fn parse_duration_value(value: &str) -> Result<Duration> {
    parse_duration(value)
        .ok_or_else(|| anyhow::anyhow!("Invalid duration '{}'. Use formats like '5s', '500ms'", value))
}

fn get_config_value(config: &Config, key: &str) -> Option<String> {
    match key {
        "device_name" => Some(config.general.device_name.clone()),
        "download_dir" => Some(config.general.download_dir.display().to_string()),
        "discovery_port" => Some(config.network.discovery_port.to_string()),
        "transfer_port" => Some(config.network.transfer_port.to_string()),
        "interval" => Some(format_duration(config.discovery.interval)),
        "peer_expiry" => Some(format_duration(config.discovery.peer_expiry)),
        "suppress_self" => Some(config.discovery.suppress_self.to_string()),
        "chunk_size" => Some(config.transfer.chunk_size.to_string()),
        "ack_timeout" => Some(format_duration(config.transfer.ack_timeout)),
        "header_timeout" => Some(format_duration(config.transfer.header_timeout)),
        "max_concurrent_receives" => Some(config.transfer.max_concurrent_receives.to_string()),
        _ => None,
    }
}

fn set_config_value(config: &mut Config, key: &str, value: &str) -> Result<bool> {
    match key {
        "device_name" => config.general.device_name = value.to_string(),
        "download_dir" => config.general.download_dir = value.into(),
        "discovery_port" => config.network.discovery_port = value.parse()?,
        "transfer_port" => config.network.transfer_port = value.parse()?,
        "interval" => config.discovery.interval = parse_duration_value(value)?,
        "peer_expiry" => config.discovery.peer_expiry = parse_duration_value(value)?,
        "suppress_self" => config.discovery.suppress_self = value.parse()?,
        "chunk_size" => config.transfer.chunk_size = value.parse()?,
        "ack_timeout" => config.transfer.ack_timeout = parse_duration_value(value)?,
        "header_timeout" => config.transfer.header_timeout = parse_duration_value(value)?,
        "max_concurrent_receives" => config.transfer.max_concurrent_receives = value.parse()?,
        _ => return Ok(false),
    }
    Ok(true)
}
