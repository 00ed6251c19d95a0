//! Request logging middleware.
//!
//! One line per request with method, path, status and latency. Health
//! probes are skipped to keep the log readable.

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{info, warn};

pub async fn request_logging(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if path == "/health" {
        return next.run(request).await;
    }

    let start = Instant::now();
    let response = next.run(request).await;
    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as u64;

    if status >= 500 {
        warn!(%method, %path, status, latency_ms, "Request failed");
    } else {
        info!(%method, %path, status, latency_ms, "Request completed");
    }

    response
}
