use std::path::PathBuf;

use autha_ldap::config::Configuration;
use autha_ldap::{app, initialize_state, telemetry};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::setup_logging();

    let path = std::env::var("CONFIG_PATH").map(PathBuf::from).unwrap_or_default();
    let config = Configuration::default().path(path).read();

    let metrics = match telemetry::setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(err) => {
            tracing::warn!(error = %err, "prometheus recorder not installed");
            None
        },
    };

    let state = match initialize_state(config.clone(), metrics) {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(error = %err, "cannot start authentication provider");
            std::process::exit(1);
        },
    };

    let listener = TcpListener::bind(&config.address).await?;
    tracing::info!(address = %config.address, version = config.version(), "server started");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
