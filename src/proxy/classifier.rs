//! Buffered vs. streaming decision for an upstream response
//!
//! The decision is made once the upstream response head is available. A
//! content-type sent by the upstream always wins; the request's own `stream`
//! flag only matters when the upstream did not say what it is sending.

use crate::proxy::headers::{content_types, CONTENT_TYPE};
use http::HeaderMap;
use serde::Deserialize;

/// How the relay delivers an upstream response to the client
#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::Display)]
pub enum DeliveryMode {
    #[display("buffered")]
    Buffered,
    #[display("streaming")]
    Streaming,
}

#[derive(Deserialize)]
struct StreamFlag {
    stream: Option<bool>,
}

/// The boolean `stream` field of a JSON object request body, if there is one.
pub fn requested_stream(body: &[u8]) -> Option<bool> {
    serde_json::from_slice::<StreamFlag>(body).ok()?.stream
}

/// Decide how to relay a response given the request flag and upstream headers.
pub fn classify(requested: Option<bool>, upstream_headers: &HeaderMap) -> DeliveryMode {
    let content_type = upstream_headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());

    match content_type {
        Some(content_type) if is_event_stream(content_type) => DeliveryMode::Streaming,
        Some(_) => DeliveryMode::Buffered,
        None if requested == Some(true) => DeliveryMode::Streaming,
        None => DeliveryMode::Buffered,
    }
}

fn is_event_stream(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|media| media.trim().eq_ignore_ascii_case(content_types::EVENT_STREAM))
}
