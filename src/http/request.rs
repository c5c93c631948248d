//! Request logging and metrics.
//!
//! # Responsibilities
//! - Log every request with its request ID, method, path, status and latency
//! - Record `http.count`, `http.time` and `http.size` per request
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing; this middleware runs
//!   inside the request-id layer and only reads the header
//! - Health probes are neither logged nor measured

use std::time::Instant;

use axum::body::HttpBody;
use axum::extract::{Request, State};
use axum::http::HeaderName;
use axum::middleware::Next;
use axum::response::Response;

use crate::http::server::AppState;
use crate::observability::Tag;

/// Header carrying the request ID.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Path excluded from request logging.
pub const HEALTH_PATH: &str = "/health";

/// Read the request ID set by the outer layer, if any.
pub fn request_id(request: &Request) -> String {
    request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Middleware wrapping every route with logging and metrics.
pub async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if path == HEALTH_PATH {
        return next.run(request).await;
    }

    let start = Instant::now();
    let method = request.method().to_string();
    let request_id = request_id(&request);

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status();
    let size = response.body().size_hint().exact().unwrap_or(0);

    state.logger.in_scope(|| {
        if status.is_server_error() {
            tracing::error!(
                request_id = %request_id,
                method = %method,
                path = %path,
                status = status.as_u16(),
                latency_ms = elapsed.as_millis() as u64,
                size,
                "Request failed"
            );
        } else {
            tracing::info!(
                request_id = %request_id,
                method = %method,
                path = %path,
                status = status.as_u16(),
                latency_ms = elapsed.as_millis() as u64,
                size,
                "Request handled"
            );
        }
    });

    let tags: [Tag; 3] = [
        ("method", method.to_lowercase()),
        ("url", path),
        ("status", status.as_u16().to_string()),
    ];
    state.metrics.incr("http.count", &tags, 1);
    state.metrics.timing("http.time", elapsed, &tags);
    state.metrics.gauge("http.size", size as f64, &tags);

    response
}
