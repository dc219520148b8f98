use anyhow::Result;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod agent;
mod communication;
mod executor;
mod utils;

use agent::{AgentCore, ShutdownReason};
use utils::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ogent_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Ogent agent v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load().await?;
    info!(controller_url = %config.controller_url, "configuration loaded");

    let agent = std::sync::Arc::new(AgentCore::new(config)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let run_handle = {
        let agent = std::sync::Arc::clone(&agent);
        tokio::spawn(async move { agent.run(shutdown_rx).await })
    };
    tokio::pin!(run_handle);

    let result = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("received CTRL+C, shutting down gracefully");
            let _ = shutdown_tx.send(true);
            (&mut run_handle).await
        }
        result = &mut run_handle => result,
    };

    match result {
        Ok(Ok(ShutdownReason::Requested)) => info!("agent stopped"),
        Ok(Ok(ShutdownReason::ReconnectAttemptsExhausted)) => {
            error!("agent giving up after exhausting reconnect attempts");
            std::process::exit(1);
        }
        Ok(Err(e)) => {
            error!(error = %e, "agent exited with a fatal error");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "agent task panicked");
            std::process::exit(1);
        }
    }

    Ok(())
}
