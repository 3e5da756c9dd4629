use std::sync::OnceLock;
use std::time::Duration;

use axum::http::StatusCode;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const HTTP_REQUESTS_TOTAL: &str = "govfeed_api_http_requests_total";
const HTTP_REQUEST_DURATION_SECONDS: &str = "govfeed_api_http_request_duration_seconds";
const HTTP_ERRORS_TOTAL: &str = "govfeed_api_http_errors_total";
const WATCH_SESSIONS_ACTIVE: &str = "govfeed_api_watch_sessions_active";

static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS.set(handle);
    Ok(())
}

pub fn render_metrics() -> Option<String> {
    PROMETHEUS.get().map(PrometheusHandle::render)
}

pub fn record_http_request(method: &str, route: &str, status: StatusCode, elapsed: Duration) {
    let status_label = status.as_u16().to_string();
    let failed = status.is_server_error();

    counter!(
        HTTP_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status_label.clone(),
        "result" => if failed { "error" } else { "success" }
    )
    .increment(1);

    histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "route" => route.to_string(),
        "status" => status_label.clone()
    )
    .record(elapsed.as_secs_f64());

    if failed {
        counter!(
            HTTP_ERRORS_TOTAL,
            "method" => method.to_string(),
            "route" => route.to_string(),
            "status" => status_label
        )
        .increment(1);
    }
}

/// Tracks open changelog streams; call with `1.0` on open and `-1.0` on close.
pub fn adjust_watch_sessions(delta: f64) {
    gauge!(WATCH_SESSIONS_ACTIVE).increment(delta);
}
