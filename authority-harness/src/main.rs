//! Authority harness
//!
//! Runs the zonesync relay authority on a TCP port for local testing.
//! `--no-ack` and `--no-pong` make it misbehave so client resends and
//! heartbeat timeouts can be exercised by hand.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use zonesync_core::core_transport::{serve_relay, RelayOptions};
use zonesync_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use zonesync_core::shutdown::{install_signal_handlers, ShutdownCoordinator};

#[derive(Parser, Debug)]
#[command(name = "zonesync-authority")]
#[command(about = "Relay authority for zonesync clients", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "7878")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Do not acknowledge deltas, to exercise client resends
    #[arg(long)]
    no_ack: bool,

    /// Do not answer pings, to exercise heartbeat timeouts
    #[arg(long)]
    no_pong: bool,

    #[arg(short, long, default_value = "info")]
    log_level: LogLevel,
}

impl Args {
    fn relay_options(&self) -> RelayOptions {
        RelayOptions { ack: !self.no_ack, pong: !self.no_pong }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging_with_config(LogConfig::new(args.log_level))?;

    let coordinator = Arc::new(ShutdownCoordinator::new(Duration::from_secs(2)));
    install_signal_handlers(coordinator.clone());

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    let options = args.relay_options();
    let relay = serve_relay(listener, options)?;
    info!(addr = %relay.local_addr(), ack = options.ack, pong = options.pong, "Authority listening");

    coordinator.wait_for_shutdown().await;
    drop(relay);
    info!("Authority stopped");
    Ok(())
}
