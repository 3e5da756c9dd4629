use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use govfeed_domain::fanout::FanOutReport;
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

const FEED_ITEM_HANDLE_DURATION_SECONDS: &str = "govfeed_worker_feed_item_handle_duration_seconds";
const FEED_ITEM_HANDLED_TOTAL: &str = "govfeed_worker_feed_item_handled_total";
const CALLBACKS_PUBLISHED_TOTAL: &str = "govfeed_worker_callbacks_published_total";

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

/// One handled bus message for an item type, labelled by whether it failed.
pub fn record_handled(item_type: &'static str, failed: bool, elapsed: Duration) {
    let error = if failed { "true" } else { "false" };
    counter!(
        FEED_ITEM_HANDLED_TOTAL,
        "type" => item_type,
        "error" => error
    )
    .increment(1);
    histogram!(
        FEED_ITEM_HANDLE_DURATION_SECONDS,
        "type" => item_type,
        "error" => error
    )
    .record(elapsed.as_secs_f64());
}

pub fn record_fanout(report: &FanOutReport) {
    counter!(CALLBACKS_PUBLISHED_TOTAL, "result" => "published")
        .increment(report.callbacks_published as u64);
    counter!(CALLBACKS_PUBLISHED_TOTAL, "result" => "failed")
        .increment(report.callbacks_failed as u64);
    counter!(CALLBACKS_PUBLISHED_TOTAL, "result" => "skipped")
        .increment(report.subscribers_skipped as u64);
}
