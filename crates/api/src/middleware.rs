use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{MatchedPath, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use govfeed_domain::error::DomainError;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::{Span, info_span};
use uuid::Uuid;

use crate::error::ApiError;
use crate::observability;
use crate::state::AppState;

pub const SUBSCRIBER_ID_HEADER: &str = "x-subscriber-id";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Authenticated caller, inserted by [`subscriber_auth`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriberContext(pub Uuid);

#[derive(Clone)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let value = HeaderValue::from_str(&Uuid::now_v7().to_string()).ok()?;
        Some(RequestId::new(value))
    }
}

pub fn trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>, RequestSpan> {
    TraceLayer::new_for_http().make_span_with(RequestSpan)
}

#[derive(Clone, Default)]
pub struct RequestSpan;

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, req: &Request<B>) -> Span {
        let request_id = req
            .headers()
            .get(HeaderName::from_static("x-request-id"))
            .and_then(|value| value.to_str().ok())
            .unwrap_or("-");
        info_span!(
            "http_request",
            method = %req.method(),
            uri = %req.uri(),
            request_id = %request_id,
        )
    }
}

pub fn set_request_id_layer() -> SetRequestIdLayer<UuidRequestId> {
    SetRequestIdLayer::x_request_id(UuidRequestId)
}

pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}

/// Bounds the time to response headers; an open SSE body is not cut off.
pub fn timeout_layer() -> TimeoutLayer {
    TimeoutLayer::new(REQUEST_TIMEOUT)
}

/// Resolves `x-subscriber-id` to a known subscriber or rejects the request.
pub async fn subscriber_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let subscriber_id = match subscriber_header(req.headers()) {
        Ok(id) => id,
        Err(err) => return err.into_response(),
    };

    match state.subscribers.get_by_id(subscriber_id).await {
        Ok(subscriber) => {
            req.extensions_mut()
                .insert(SubscriberContext(subscriber.id));
            next.run(req).await
        }
        Err(DomainError::NotFound) => {
            tracing::debug!(subscriber = %subscriber_id, "unknown subscriber");
            ApiError::Unauthorized.into_response()
        }
        Err(err) => ApiError::from(err).into_response(),
    }
}

fn subscriber_header(headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let value = headers
        .get(SUBSCRIBER_ID_HEADER)
        .ok_or(ApiError::Unauthorized)?;
    let value = value
        .to_str()
        .map_err(|_| ApiError::Validation("invalid subscriber id".to_string()))?;
    Uuid::parse_str(value.trim())
        .map_err(|_| ApiError::Validation(format!("subscriber id is not a uuid: {value}")))
}

pub async fn metrics_layer(req: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let method = req.method().as_str().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let response = next.run(req).await;
    observability::record_http_request(&method, &route, response.status(), started.elapsed());
    response
}
