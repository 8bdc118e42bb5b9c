//! Forwarding pipeline for proxied requests
//!
//! - capture: inbound request snapshot, bounded body read, target URL
//! - dispatcher: upstream call, returns the response head with an unread body
//! - classifier: buffered vs. streaming, decided from the upstream head
//! - buffered / streaming: the two relays, each producing the response snapshot
//! - error_response: the 500 envelope for failures the proxy owns

pub mod buffered;
pub mod capture;
pub mod classifier;
pub mod dispatcher;
pub mod error_response;
pub mod headers;
pub mod middleware;
pub mod service;
pub mod streaming;
pub mod types;

pub use classifier::DeliveryMode;
pub use dispatcher::{UpstreamDispatcher, UpstreamRequest};
pub use error_response::ErrorResponse;
pub use service::ProxyService;
pub use streaming::StreamAccumulator;
pub use types::{ProxyConfig, ProxyError, ProxyResult};
