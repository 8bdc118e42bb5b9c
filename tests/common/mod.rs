//! Shared harness for integration tests
//!
//! Spins up a mock upstream and a real proxy, both on ephemeral ports, so tests
//! exercise the same socket-level behavior a deployed proxy sees.

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::stream;
use http_body_util::Full;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tapline::interaction::{InteractionLogger, InteractionRecord, InteractionSink, MemorySink};
use tapline::proxy::types::{UpstreamBaseUrl, UpstreamTimeout};
use tapline::proxy::{ProxyConfig, ProxyService};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub const SSE_EVENTS: [&str; 3] = [
    "data: {\"delta\":\"Hel\"}\n\n",
    "data: {\"delta\":\"lo\"}\n\n",
    "data: [DONE]\n\n",
];

/// `x-request-id` the mock `/headers` route answers with
pub const UPSTREAM_REQUEST_ID: &str = "req_upstream_abc123";

/// Delay before the mock `/slow` route answers
pub const SLOW_DELAY: Duration = Duration::from_secs(3);

#[derive(Clone)]
struct MockState {
    stream_closed: mpsc::UnboundedSender<()>,
}

/// Signals the test when the upstream side of an endless stream is dropped
struct CloseSignal(mpsc::UnboundedSender<()>);

impl Drop for CloseSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

pub struct MockUpstream {
    pub addr: SocketAddr,
    pub stream_closed: mpsc::UnboundedReceiver<()>,
}

impl MockUpstream {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

/// Start the mock upstream:
///
/// - `POST /v1/chat`: JSON answer, or three SSE events when the body asks to stream
/// - `GET /v1/events`: SSE regardless of what the request asked for
/// - `POST /echo`: returns the request body verbatim as octet-stream
/// - `GET /headers`: returns the received headers as JSON, with its own `x-request-id`
/// - `GET /status/429`: an upstream error status with a plain body
/// - `GET /slow`: answers after [`SLOW_DELAY`]
/// - `GET /endless`: SSE that never ends; reports on `stream_closed` when dropped
pub async fn spawn_upstream() -> MockUpstream {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = MockState { stream_closed: tx };

    let router = Router::new()
        .route("/v1/chat", post(chat_handler))
        .route("/v1/events", get(|| async { sse_response(&SSE_EVENTS) }))
        .route("/echo", post(echo_handler))
        .route("/headers", get(headers_handler))
        .route(
            "/status/429",
            get(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(SLOW_DELAY).await;
                "finally"
            }),
        )
        .route("/endless", get(endless_handler))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    MockUpstream {
        addr,
        stream_closed: rx,
    }
}

async fn chat_handler(Json(body): Json<serde_json::Value>) -> Response {
    if body["stream"].as_bool() == Some(true) {
        sse_response(&SSE_EVENTS)
    } else {
        Json(serde_json::json!({"choices": [{"text": "hi"}]})).into_response()
    }
}

fn sse_response(events: &'static [&'static str]) -> Response {
    let chunks = stream::unfold(0usize, move |n| async move {
        let event = events.get(n)?;
        tokio::time::sleep(Duration::from_millis(20)).await;
        Some((Ok::<_, Infallible>(Bytes::from_static(event.as_bytes())), n + 1))
    });

    Response::builder()
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .body(Body::from_stream(chunks))
        .unwrap()
}

async fn echo_handler(request: Request) -> Response {
    let bytes = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .unwrap();
    Response::builder()
        .header("content-type", "application/octet-stream")
        .body(Body::from(bytes))
        .unwrap()
}

async fn headers_handler(headers: HeaderMap) -> Response {
    let received: serde_json::Map<String, serde_json::Value> = headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                serde_json::Value::String(value.to_str().unwrap_or("<binary>").to_string()),
            )
        })
        .collect();

    Response::builder()
        .header("content-type", "application/json")
        .header("x-upstream", "mock")
        .header("x-request-id", UPSTREAM_REQUEST_ID)
        .header("keep-alive", "timeout=5")
        .body(Body::from(serde_json::to_vec(&received).unwrap()))
        .unwrap()
}

async fn endless_handler(
    axum::extract::State(state): axum::extract::State<MockState>,
) -> Response {
    let guard = CloseSignal(state.stream_closed.clone());
    let chunks = stream::unfold((guard, 0u64), |(guard, n)| async move {
        tokio::time::sleep(Duration::from_millis(25)).await;
        let event = Bytes::from(format!("data: tick {n}\n\n"));
        Some((Ok::<_, Infallible>(event), (guard, n + 1)))
    });

    Response::builder()
        .header("content-type", "text/event-stream")
        .body(Body::from_stream(chunks))
        .unwrap()
}

/// A running proxy plus the sink its records land in
pub struct TestProxy {
    pub addr: SocketAddr,
    pub logger: InteractionLogger,
    pub sink: Arc<MemorySink>,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Records persisted so far, after draining the writer queue.
    pub async fn records(&self) -> Vec<InteractionRecord> {
        self.logger.flush().await;
        self.sink.records()
    }

    /// Wait until at least `count` records exist, failing after five seconds.
    pub async fn wait_for_records(&self, count: usize) -> Vec<InteractionRecord> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let records = self.records().await;
                if records.len() >= count {
                    return records;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("records were not persisted in time")
    }
}

/// Proxy configuration pointed at `upstream` with test-sized timeouts.
pub fn proxy_config(upstream: &str, read_timeout_ms: u64) -> ProxyConfig {
    let upstream = UpstreamBaseUrl::try_new(upstream.to_string()).unwrap();
    let mut config = ProxyConfig::for_upstream(upstream);
    config.read_timeout = UpstreamTimeout::from_millis(read_timeout_ms).unwrap();
    config.connect_timeout = UpstreamTimeout::from_millis(1_000).unwrap();
    config
}

pub async fn spawn_proxy(config: ProxyConfig) -> TestProxy {
    let sink = Arc::new(MemorySink::new());
    let (addr, logger) = serve_proxy(config, sink.clone()).await;
    TestProxy { addr, logger, sink }
}

/// Serve a proxy that writes its records to `sink`.
pub async fn serve_proxy(
    config: ProxyConfig,
    sink: Arc<dyn InteractionSink>,
) -> (SocketAddr, InteractionLogger) {
    let (logger, _writer) = InteractionLogger::spawn(sink);
    let router = ProxyService::new(config, logger.clone()).into_router();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (addr, logger)
}

pub type TestClient = Client<HttpConnector, Full<Bytes>>;

pub fn client() -> TestClient {
    Client::builder(TokioExecutor::new()).build_http()
}

pub fn json_request(uri: &str, body: serde_json::Value) -> http::Request<Full<Bytes>> {
    http::Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(serde_json::to_vec(&body).unwrap())))
        .unwrap()
}

pub fn get_request(uri: &str) -> http::Request<Full<Bytes>> {
    http::Request::builder()
        .uri(uri)
        .body(Full::new(Bytes::new()))
        .unwrap()
}
