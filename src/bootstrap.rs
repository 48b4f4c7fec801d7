use anyhow::{Context, Result};
use axum::Router;

pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}

pub fn init_env() {
    // Missing .env is fine in deployed environments; variables come from the host.
    dotenvy::dotenv().ok();
}

/// Binds the listener and serves the app until shutdown is requested.
pub async fn serve(service_name: &str, app: Router, port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;

    tracing::info!(
        "{} listening on {}",
        service_name,
        listener.local_addr().context("Failed to read local addr")?
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("{} shut down", service_name);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {err}");
    }
}
