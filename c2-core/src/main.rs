mod api;
mod broadcast;
mod config;
mod drivers;
mod engagement;
mod fusion;
mod orchestration;
mod persistence;
mod threat;

use std::path::PathBuf;

use tracing::info;

use config::Config;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "c2_core=info".into()),
        )
        .init();

    let config_path = std::env::var("C2_CONFIG_PATH").unwrap_or_else(|_| "config.json".to_string());
    let config = Config::load(&config_path).await;

    let radar_config_path = PathBuf::from(persistence::default_radar_config_path());
    let handle = orchestration::spawn(config.clone(), radar_config_path);

    let app = api::router(handle);

    let addr = config.api_bind_addr.clone().unwrap_or_else(|| "0.0.0.0:8080".to_string());
    info!(target: "c2_core", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    info!(target: "c2_core", "shutdown signal received");
}
