//! virtual-usbip server
//!
//! Emulates a USB printer in software and exports it over USB/IP.

use anyhow::{Context, Result};
use clap::Parser;
use common::setup_logging;
use server::config::ServerConfig;
use server::{Device, Server, ippusb, printer};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "virtual-usbip")]
#[command(
    author,
    version,
    about = "Virtual USB/IP printer - Emulated USB device over the network"
)]
#[command(long_about = "
Emulates a USB printer (IPP over USB and legacy IEEE 1284 interfaces) and
exports it with the USB/IP protocol. Attach it from a Linux host with:

    usbip list -r <server>
    usbip attach -r <server> -b 1-1

EXAMPLES:
    # Run with default config
    virtual-usbip

    # Run with custom config
    virtual-usbip --config /path/to/config.toml

    # Listen on a different address
    virtual-usbip --bind 127.0.0.1:3240

    # Run with debug logging
    virtual-usbip --log-level debug

CONFIGURATION:
    The server looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/virtual-usbip/server.toml
    3. /etc/virtual-usbip/server.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// USB/IP listen address, overrides the configuration
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = ServerConfig::default();
        let path = ServerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    // Load configuration first (to get log level from config if not specified)
    let config = if let Some(ref path) = args.config {
        ServerConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        ServerConfig::load_or_default()
    };

    // Use CLI log level if specified, otherwise use config value
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.server.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("virtual-usbip v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let bind_addr = match args.bind {
        Some(addr) => addr,
        None => config.bind_addr()?,
    };

    let dev = Device::new(config.device.build_descriptor()).context("Invalid device descriptor")?;
    let dev = Arc::new(dev);

    let server = Arc::new(Server::new());
    let location = server
        .add_device(dev.clone())
        .context("Failed to attach device")?;
    info!("Virtual printer available as bus-id {}", location.bus_id());

    // IPP over USB on the 7/1/4 interfaces
    let ipp = Arc::new(ippusb::listener(&dev));
    let ipp_task = tokio::spawn(ippusb::serve(ipp.clone()));

    // Legacy print data on the 7/1/1 and 7/1/2 interfaces
    let mut pipes = Vec::new();
    for ep in printer::legacy_endpoints(&dev) {
        pipes.push(spawn_spool(ep, &config).await?);
    }

    let mut changes = dev.configuration_changes();
    let watcher = tokio::spawn(async move {
        while changes.changed().await.is_ok() {
            let value = *changes.borrow_and_update();
            info!("Host selected configuration {}", value);
        }
    });

    info!("Press Ctrl+C to shutdown");

    tokio::select! {
        result = server.run(bind_addr) => {
            if let Err(e) = result {
                error!("Server error: {:#}", e);
            }
        }
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
                Err(e) => error!("Error waiting for Ctrl+C: {}", e),
            }
        }
    }

    ipp.close();
    dev.shutdown();
    for pipe in pipes {
        pipe.abort();
    }
    watcher.abort();
    if let Err(e) = ipp_task.await {
        warn!("IPP over USB task failed: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Connect a legacy printer endpoint to the spool file, or to nothing
async fn spawn_spool(
    ep: Arc<server::Endpoint>,
    config: &ServerConfig,
) -> Result<tokio::task::JoinHandle<std::io::Result<(u64, u64)>>> {
    let Some(path) = config.device.spool_path() else {
        let sink = tokio::io::join(tokio::io::empty(), tokio::io::sink());
        return Ok(printer::spawn_legacy_pipe(ep, sink));
    };

    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .with_context(|| format!("Failed to open spool file: {}", path.display()))?;

    info!("Spooling legacy print data to {}", path.display());
    let spool = tokio::io::join(tokio::io::empty(), file);
    Ok(printer::spawn_legacy_pipe(ep, spool))
}
