use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use sshmd::config::{Cli, ServerConfig};
use sshmd::logging::{self, fatal};
use sshmd::server::{Server, ShutdownReport};
use sshmd::signals::spawn_signal_handler;

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init();

    let config = fatal(ServerConfig::from_cli(cli), "invalid configuration")?;

    let runtime = fatal(
        tokio::runtime::Builder::new_multi_thread().enable_all().build(),
        "failed to start the async runtime",
    )?;
    let result = runtime.block_on(run(config));

    // A remote fetch stuck on the blocking pool must not hold up exit.
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn run(config: ServerConfig) -> Result<()> {
    info!(host = %config.host, port = config.port, "Starting SSH server");
    if let Some(url) = &config.content.remote_url {
        info!(url, "Remote README specified");
    }

    let server = fatal(Server::load(config), "failed to load server identity")?;
    let listener = fatal(server.bind().await, "failed to start listener")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signals = spawn_signal_handler(shutdown_tx);

    let report = fatal(server.serve(listener, shutdown_rx).await, "server failed")?;
    signals.abort();

    match report {
        ShutdownReport::Graceful => info!("Stopped SSH server"),
        ShutdownReport::Forced { closed } => {
            warn!(closed, "Stopped SSH server after forcing connections closed")
        }
    }
    Ok(())
}
