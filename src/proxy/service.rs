//! Main proxy service implementation
//!
//! `ProxyService` ties the pipeline together for each inbound request:
//! capture, dispatch, classify, then relay buffered or streamed. Every path
//! through it ends with exactly one interaction record, either from the relay
//! that finished the response or from the error path.
//!
//! ```rust,ignore
//! let (logger, writer) = InteractionLogger::spawn(Arc::new(NullSink));
//! let router = ProxyService::new(config, logger).into_router();
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//! axum::serve(
//!     listener,
//!     router.into_make_service_with_connect_info::<SocketAddr>(),
//! )
//! .await?;
//! ```

use crate::interaction::logger::InteractionLogger;
use crate::interaction::pending::PendingInteraction;
use crate::interaction::record::{CapturedBody, InteractionId};
use crate::proxy::capture::{parse_target, read_body, request_snapshot, upstream_url};
use crate::proxy::classifier::{classify, requested_stream, DeliveryMode};
use crate::proxy::dispatcher::{UpstreamDispatcher, UpstreamRequest};
use crate::proxy::headers::paths;
use crate::proxy::middleware::{interaction_id_middleware, logging_middleware};
use crate::proxy::types::{ProxyConfig, ProxyResult};
use crate::proxy::{buffered, error_response, streaming};
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::from_fn,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use http::request::Parts;
use http::Extensions;
use hyper::body::Incoming;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Capabilities reported by the health endpoint
pub const FEATURES: [&str; 3] = ["http", "sse", "streaming"];

/// The transparent logging proxy
pub struct ProxyService {
    config: ProxyConfig,
    dispatcher: UpstreamDispatcher,
    logger: InteractionLogger,
}

enum Relay {
    Buffered(buffered::BufferedResponse),
    Streaming {
        response: http::Response<Incoming>,
        dispatched_at: Instant,
    },
}

impl ProxyService {
    pub fn new(config: ProxyConfig, logger: InteractionLogger) -> Self {
        let dispatcher = UpstreamDispatcher::new(&config);
        Self {
            config,
            dispatcher,
            logger,
        }
    }

    /// Build the router: `/health` plus a catch-all that forwards upstream.
    pub fn into_router(self) -> Router {
        Router::new()
            .route(paths::HEALTH, get(health_handler))
            .fallback(proxy_handler)
            .with_state(Arc::new(self))
            .layer(from_fn(logging_middleware))
            .layer(from_fn(interaction_id_middleware))
    }

    /// Forward one request and relay the upstream answer.
    ///
    /// Never fails: proxy-side errors become the 500 envelope, and the
    /// interaction is recorded on every path.
    pub async fn handle(&self, request: Request) -> Response {
        let id = interaction_id(request.extensions());
        let client_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let (parts, body) = request.into_parts();

        let url = upstream_url(&self.config.upstream, &parts.uri);
        let mut pending = PendingInteraction::begin(
            self.logger.clone(),
            id,
            request_snapshot(&parts, &url, client_addr),
        );

        match self.forward(&mut pending, parts, body, &url).await {
            Ok(Relay::Buffered(relayed)) => {
                pending.complete(relayed.snapshot);
                relayed.response
            }
            Ok(Relay::Streaming {
                response,
                dispatched_at,
            }) => streaming::relay(
                pending,
                response,
                dispatched_at,
                self.config.read_timeout.duration(),
                self.config.max_stream_capture,
            ),
            Err(error) => error_response::fail(pending, error),
        }
    }

    async fn forward(
        &self,
        pending: &mut PendingInteraction,
        parts: Parts,
        body: Body,
        url: &str,
    ) -> ProxyResult<Relay> {
        let bytes = read_body(body, self.config.max_request_size).await?;
        pending.set_request_body(CapturedBody::from_bytes(&bytes));
        let requested = requested_stream(&bytes);

        let uri = parse_target(url)?;
        let dispatched_at = Instant::now();
        let response = self
            .dispatcher
            .dispatch(UpstreamRequest {
                method: parts.method,
                uri,
                headers: parts.headers,
                body: bytes,
            })
            .await?;

        let mode = classify(requested, response.headers());
        debug!(
            interaction_id = %pending.id(),
            status = response.status().as_u16(),
            mode = %mode,
            "Upstream responded"
        );

        match mode {
            DeliveryMode::Buffered => {
                let relayed = buffered::relay(
                    response,
                    dispatched_at,
                    self.config.read_timeout.duration(),
                )
                .await?;
                Ok(Relay::Buffered(relayed))
            }
            DeliveryMode::Streaming => Ok(Relay::Streaming {
                response,
                dispatched_at,
            }),
        }
    }
}

/// The ID assigned by the middleware, or a fresh one when it did not run.
fn interaction_id(extensions: &Extensions) -> InteractionId {
    extensions
        .get::<InteractionId>()
        .copied()
        .unwrap_or_default()
}

async fn proxy_handler(State(proxy): State<Arc<ProxyService>>, request: Request) -> Response {
    proxy.handle(request).await
}

async fn health_handler(State(proxy): State<Arc<ProxyService>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "target": proxy.config.upstream.to_string(),
        "features": FEATURES,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
