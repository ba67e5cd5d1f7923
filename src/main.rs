//! mini-fileserver: a small file-serving daemon
//!
//! Serves GET, POST and DELETE requests against a directory over a simple
//! text protocol, one request per connection.
//!
//! Features:
//! - Per-host fixed-window rate limiting
//! - Bounded header framing with a per-read timeout
//! - A line-oriented console to start, stop and reconfigure the listener
//! - Configuration via CLI arguments or TOML file

mod config;
mod console;
mod dispatch;
mod error;
mod protocol;
mod rate_limit;
mod runtime;
mod server;
mod storage;

use config::Config;
use runtime::{ControlCommand, ControlPlane};
use std::sync::Arc;
use storage::DiskStore;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.server.host,
        port = config.server.port,
        root = %config.root.display(),
        max_header_size = config.limits.max_header_size,
        requests_per_window = config.rate_limit.requests_per_window,
        window_secs = config.rate_limit.window.as_secs(),
        "Starting mini-fileserver"
    );

    let store = Arc::new(DiskStore::new(&config.root));
    let control = ControlPlane::new(&config, store);

    if config.autostart {
        let reply = control.execute(ControlCommand::Start).await?;
        println!("{reply}");
    }

    console::run_console(&control, console::spawn_stdin_reader(), console::ctrl_c()).await;
    Ok(())
}
