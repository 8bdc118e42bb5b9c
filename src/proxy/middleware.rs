//! Middleware for the proxy router

use crate::interaction::record::InteractionId;
use crate::proxy::headers::{X_INTERACTION_ID, X_REQUEST_ID};
use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use std::time::Instant;
use tracing::{info, warn};

/// Assign every request a fresh interaction ID.
///
/// The ID travels in request extensions and comes back to the client in
/// [`X_INTERACTION_ID`]. Headers on both legs, `x-request-id` included, are
/// left exactly as the client and the upstream sent them.
pub async fn interaction_id_middleware(mut request: Request, next: Next) -> Response {
    let id = InteractionId::new();
    request.extensions_mut().insert(id);

    let mut response = next.run(request).await;

    // Hyphenated UUIDs are plain ASCII
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        response.headers_mut().insert(X_INTERACTION_ID, value);
    }

    response
}

/// Log request/response details with timing
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let uri = request.uri().clone();
    let interaction_id = request
        .extensions()
        .get::<InteractionId>()
        .map_or_else(|| "unknown".to_string(), ToString::to_string);
    let client_request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    info!(
        interaction_id = %interaction_id,
        client_request_id = ?client_request_id,
        method = %method,
        path = %uri.path(),
        "Incoming request"
    );

    let response = next.run(request).await;
    let duration = start.elapsed();
    let status = response.status();

    // For streamed responses this covers the head only; the record has the rest
    if status.is_server_error() {
        warn!(
            interaction_id = %interaction_id,
            method = %method,
            path = %uri.path(),
            status = status.as_u16(),
            duration_ms = duration.as_millis(),
            "Request failed"
        );
    } else {
        info!(
            interaction_id = %interaction_id,
            method = %method,
            path = %uri.path(),
            status = status.as_u16(),
            duration_ms = duration.as_millis(),
            "Request completed"
        );
    }

    response
}
