mod error;
mod middleware;
mod observability;
mod routes;
mod state;
mod validation;

use std::net::SocketAddr;

use govfeed_infra::change_signal::spawn_change_listener;
use govfeed_infra::config::AppConfig;
use govfeed_infra::logging::init_tracing;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config, "govfeed-api")?;
    observability::init_metrics()?;

    let state = state::AppState::new(config.clone()).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener_task = spawn_change_listener(
        config.redis_url.clone(),
        config.change_channel.clone(),
        state.notifier.clone(),
        state.queries.clone(),
        shutdown_rx,
    );
    let notifier = state.notifier.clone();
    let app = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "starting api");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
            // Watch sessions end once their wake-up channel closes.
            notifier.close();
        })
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "server exited");
            err
        })?;

    if let Err(err) = listener_task.await {
        tracing::error!(error = %err, "change listener task failed");
    }
    info!("api shutdown");
    Ok(())
}

#[cfg(test)]
mod tests;
