use ogent_controller::{config::Config, create_app, telemetry, AppState};
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    telemetry::init_tracing();

    let config = Config::from_env()?;
    let listen_host = config.listen_host.clone();
    let port = config.port;
    let state = AppState::new(config);

    let app = create_app(state);

    let addr: SocketAddr = format!("{listen_host}:{port}").parse()?;
    tracing::info!("Ogent controller starting on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    tracing::info!("received shutdown signal");
}
