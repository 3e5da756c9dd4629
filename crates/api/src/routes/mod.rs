mod feed;
mod subscribers;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router, middleware};
use serde::Serialize;

use crate::middleware as app_middleware;
use crate::observability;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/v1/feed/events", get(feed::stream_feed_events))
        .route("/v1/subscribers/me", put(subscribers::update_webhook))
        .route("/v1/subscriptions", post(subscribers::subscribe))
        .route("/v1/subscriptions/:dao_id", delete(subscribers::unsubscribe))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::subscriber_auth,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/v1/feed", get(feed::get_feed))
        .route("/v1/subscribers", post(subscribers::create_subscriber))
        .merge(protected)
        .layer(middleware::from_fn(app_middleware::metrics_layer))
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
    store: &'static str,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (status_code, status) = match state.db.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(err) => {
            tracing::warn!(store = state.db.name(), error = %err, "store health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded")
        }
    };
    (
        status_code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            environment: state.config.app_env.clone(),
            store: state.db.name(),
        }),
    )
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => (StatusCode::OK, body).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed",
        )
            .into_response(),
    }
}
