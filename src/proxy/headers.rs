//! HTTP header constants and hop-by-hop handling for the proxy service
//!
//! Headers that only describe a single connection leg must never cross the
//! proxy boundary in either direction. Hyper recomputes framing headers
//! (`host`, `content-length`, `transfer-encoding`) for each leg itself.

use ::http::header::{self, HeaderMap, HeaderName};

/// Client or upstream correlation header; relayed like any other header
pub const X_REQUEST_ID: &str = "x-request-id";

/// Proxy-owned response header carrying the interaction record ID
pub const X_INTERACTION_ID: &str = "x-tapline-interaction-id";

/// Standard header re-exports for convenience
pub use header::{CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING};

/// Well-known paths
pub mod paths {
    /// Health check endpoint path, never forwarded upstream
    pub const HEALTH: &str = "/health";
}

/// Content types the proxy reacts to
pub mod content_types {
    pub const EVENT_STREAM: &str = "text/event-stream";
}

/// Headers that are meaningful only for a single connection
pub static HOP_BY_HOP: [HeaderName; 11] = [
    header::HOST,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
];

/// Returns true for headers that must not be copied to the other leg.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.iter().any(|hop| hop == name)
}

/// Remove hop-by-hop headers, including any extra names listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let nominated: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in nominated.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}
