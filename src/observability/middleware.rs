//! Request instrumentation middleware.
//!
//! Wraps every request in an `http_request` span and, once the inner
//! handler has produced its response, records:
//! - `http_request_duration_seconds` labelled by method, path and status
//! - `http_requests_total` with the same labels
//! - `http_requests_<method>_<path>` labelled by status
//!
//! The response is returned untouched. The handler runs inside the span's
//! OpenTelemetry context, so `Context::current()` inside a handler carries
//! the request span.

use axum::extract::{Request, State};
use axum::http::header::{HOST, USER_AGENT};
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use opentelemetry::trace::FutureExt as _;
use opentelemetry::{Context, KeyValue};
use tokio::time::Instant;

use super::instruments::{route_counter_name, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};
use super::Telemetry;

/// Span name used for every inbound request.
pub const REQUEST_SPAN_NAME: &str = "http_request";

/// Add request instrumentation to every route of `router`.
pub fn instrument<S>(router: Router<S>, telemetry: Telemetry) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(telemetry, track_request))
}

/// Middleware body; use with `axum::middleware::from_fn_with_state`.
pub async fn track_request(
    State(telemetry): State<Telemetry>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().as_str().to_owned();
    let path = req.uri().path().to_owned();

    let (cx, mut span) = telemetry
        .spans()
        .start_span(&Context::current(), REQUEST_SPAN_NAME);
    span.set_attributes([
        KeyValue::new("http.method", method.clone()),
        KeyValue::new("http.url", req.uri().to_string()),
        KeyValue::new("http.path", path.clone()),
        KeyValue::new("http.host", host(&req)),
        KeyValue::new("http.user_agent", header_str(req.headers(), USER_AGENT.as_str())),
    ]);

    let started = Instant::now();
    let response = next.run(req).with_context(cx).await;
    let elapsed = started.elapsed();

    let status = response.status();
    span.set_attributes([KeyValue::new("http.status_code", i64::from(status.as_u16()))]);
    if status.is_server_error() {
        span.set_error(format!("HTTP {}", status.as_u16()));
    }

    let labels = [
        KeyValue::new("method", method.clone()),
        KeyValue::new("path", path.clone()),
        KeyValue::new("status", i64::from(status.as_u16())),
    ];
    let registry = telemetry.registry();
    registry.record_histogram(HTTP_REQUEST_DURATION_SECONDS, elapsed.as_secs_f64(), &labels);
    registry.increment(HTTP_REQUESTS_TOTAL, 1, &labels);
    registry.increment(
        &route_counter_name(&method, &path),
        1,
        &[KeyValue::new("status", i64::from(status.as_u16()))],
    );

    span.end();
    response
}

fn host(req: &Request) -> String {
    let from_header = header_str(req.headers(), HOST.as_str());
    if !from_header.is_empty() {
        return from_header;
    }
    req.uri().host().unwrap_or_default().to_owned()
}

fn header_str(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}
