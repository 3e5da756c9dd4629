use crate::config::AppConfig;
use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

/// Installs the global subscriber. `RUST_LOG` wins over `log_level` when set.
pub fn init_tracing(config: &AppConfig, service: &'static str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = fmt().with_env_filter(filter).with_target(false);
    if config.is_production() {
        builder
            .json()
            .flatten_event(true)
            .try_init()
            .map_err(|err| anyhow::anyhow!("tracing init failed: {err}"))?;
    } else {
        builder
            .compact()
            .try_init()
            .map_err(|err| anyhow::anyhow!("tracing init failed: {err}"))?;
    }

    tracing::info!(
        service,
        app_env = %config.app_env,
        data_backend = %config.data_backend,
        "tracing initialised"
    );
    Ok(())
}
