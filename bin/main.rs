#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(unix))]
compile_error!("Only unix is currently supported");

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use lmtp_bridge::{
    client::LmtpForwarderFactory, config, internal, listener::Listener, logging,
    resolver::StaticResolver, server::Server,
};

/// Resolve LMTP recipients and relay them to a downstream LMTP server
#[derive(Parser, Debug)]
#[command(name = "lmtp-bridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate signal received, shutting down");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = config::find(cli.config)?;
    let config = config::Config::load(&config_path).await?;

    logging::init();
    internal!(level = INFO, "Loaded configuration from {}", config_path.display());

    let listener = Listener::bind(&config.listen).await?;
    let resolver = StaticResolver::new(config.recipients.clone());
    if resolver.is_empty() {
        internal!(level = WARN, "No recipients configured, every RCPT will be rejected");
    }

    let server = Server::new(
        &config,
        Arc::new(resolver),
        Arc::new(LmtpForwarderFactory::from(&config)),
    );

    let serving = server.serve(listener);
    tokio::pin!(serving);

    tokio::select! {
        result = &mut serving => result?,
        result = shutdown() => {
            result?;
            server.close();
            serving.await?;
        }
    }

    Ok(())
}
