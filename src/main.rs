//! OpenKMS daemon binary.
//!
//! Loads the configuration, installs the signal listener and runs the daemon
//! root until shutdown. Exit code 0 on graceful shutdown, 1 on any fatal error.

use std::process::ExitCode;

use openkmsd::config::{config_path, DaemonConfig};
use openkmsd::{shutdown, Daemon, DaemonError};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    info!(version = env!("CARGO_PKG_VERSION"), "Starting OpenKMS Daemon");

    match run().await {
        Ok(()) => {
            info!("OpenKMS Daemon exited");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, label = e.as_label(), "OpenKMS Daemon failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), DaemonError> {
    let path = config_path();
    info!(path = %path.display(), "loading configuration");
    let config = DaemonConfig::load(&path)?;

    let daemon = Daemon::new(config)?;
    tokio::spawn(shutdown::cancel_on_signal(daemon.shutdown_token()));
    daemon.run().await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
