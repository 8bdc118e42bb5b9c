//! Error envelope returned when the proxy itself fails a request
//!
//! Upstream error statuses are relayed untouched. Only failures that leave the
//! proxy without a response to relay produce this envelope, always with 500.

use crate::interaction::pending::PendingInteraction;
use crate::proxy::headers::X_INTERACTION_ID;
use crate::proxy::types::ProxyError;
use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Standard error response format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Interaction ID for correlation with the interaction log
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Convert to HTTP response with proper headers
    pub fn into_response_with_status(self, status: StatusCode) -> Response {
        let request_id = self.request_id.clone();
        let mut response = (status, Json(self)).into_response();

        if let Some(id) = request_id {
            if let Ok(header_value) = HeaderValue::from_str(&id) {
                response.headers_mut().insert(X_INTERACTION_ID, header_value);
            }
        }

        response
    }
}

impl From<&ProxyError> for ErrorResponse {
    fn from(error: &ProxyError) -> Self {
        Self::new(error.code(), error.to_string())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        ErrorResponse::from(&self).into_response_with_status(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// Record `error` for the pending interaction and build the client envelope.
pub fn fail(pending: PendingInteraction, error: ProxyError) -> Response {
    let request_id = pending.id().to_string();
    warn!(
        interaction_id = %request_id,
        code = error.code(),
        error = %error,
        elapsed_ms = pending.elapsed().as_millis(),
        "Proxy request failed"
    );

    pending.fail(&error);

    ErrorResponse::from(&error)
        .with_request_id(request_id)
        .into_response_with_status(StatusCode::INTERNAL_SERVER_ERROR)
}
