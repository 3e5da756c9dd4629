use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub metrics_port: u16,
    pub log_level: String,
    pub data_backend: String,
    pub surreal_endpoint: String,
    pub surreal_ns: String,
    pub surreal_db: String,
    pub surreal_user: String,
    pub surreal_pass: String,
    pub redis_url: String,
    pub bus_stream_prefix: String,
    pub bus_group_prefix: String,
    pub bus_consumer_name: String,
    pub bus_block_ms: u64,
    pub bus_batch_size: usize,
    pub bus_retry_interval_ms: u64,
    pub change_channel: String,
    pub notifier_buffer: usize,
    pub watch_page_limit: usize,
    pub watch_forced_refresh_ms: u64,
    pub query_cache_enabled: bool,
    pub cache_population_queue: usize,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 3000)?
            .set_default("metrics_port", 9100)?
            .set_default("log_level", "info")?
            .set_default("data_backend", "memory")?
            .set_default("surreal_endpoint", "ws://127.0.0.1:8000")?
            .set_default("surreal_ns", "govfeed")?
            .set_default("surreal_db", "feed")?
            .set_default("surreal_user", "root")?
            .set_default("surreal_pass", "root")?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("bus_stream_prefix", "govfeed:bus")?
            .set_default("bus_group_prefix", "govfeed")?
            .set_default("bus_consumer_name", "worker-1")?
            .set_default("bus_block_ms", 5000)?
            .set_default("bus_batch_size", 100)?
            .set_default("bus_retry_interval_ms", 60000)?
            .set_default("change_channel", "govfeed:feed-events")?
            .set_default("notifier_buffer", 1000)?
            .set_default("watch_page_limit", 1000)?
            .set_default("watch_forced_refresh_ms", 60000)?
            .set_default("query_cache_enabled", true)?
            .set_default("cache_population_queue", 256)?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn uses_surreal(&self) -> bool {
        self.data_backend.eq_ignore_ascii_case("surreal")
    }

    pub fn bus_block(&self) -> Duration {
        Duration::from_millis(self.bus_block_ms)
    }

    pub fn bus_retry_interval(&self) -> Duration {
        Duration::from_millis(self.bus_retry_interval_ms)
    }

    pub fn watch_forced_refresh(&self) -> Duration {
        Duration::from_millis(self.watch_forced_refresh_ms)
    }

    /// Consumer group name for a consumer family, e.g. `govfeed:item_dao`.
    pub fn consumer_group(&self, family: &str) -> String {
        format!("{}:{family}", self.bus_group_prefix)
    }
}
