//! Upstream dispatch over a pooled HTTP/1.1 client
//!
//! The dispatcher only waits for the response head. The body is handed back
//! unread so the relays can choose their own buffering strategy.

use crate::proxy::headers::strip_hop_by_hop;
use crate::proxy::types::{error_chain, ProxyConfig, ProxyError, ProxyResult};
use bytes::Bytes;
use http::{HeaderMap, Method, Request, Response, Uri};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::error::Error as StdError;
use std::time::Duration;
use tracing::{debug, warn};

type UpstreamClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// A fully materialized request ready to be sent upstream
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Sends forwarded requests upstream with connect and read timeouts
#[derive(Clone)]
pub struct UpstreamDispatcher {
    client: UpstreamClient,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl UpstreamDispatcher {
    pub fn new(config: &ProxyConfig) -> Self {
        let connect_timeout = config.connect_timeout.duration();

        let mut http_connector = HttpConnector::new();
        http_connector.set_connect_timeout(Some(connect_timeout));
        http_connector.enforce_http(false);

        let https_connector = match hyper_rustls::HttpsConnectorBuilder::new().with_native_roots()
        {
            Ok(builder) => builder
                .https_or_http()
                .enable_http1()
                .wrap_connector(http_connector),
            Err(e) => {
                warn!(error = %e, "Native root certificates unavailable, using bundled webpki roots");
                hyper_rustls::HttpsConnectorBuilder::new()
                    .with_webpki_roots()
                    .https_or_http()
                    .enable_http1()
                    .wrap_connector(http_connector)
            }
        };

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .build(https_connector);

        Self {
            client,
            connect_timeout,
            read_timeout: config.read_timeout.duration(),
        }
    }

    /// Send `request` and wait for the response head.
    pub async fn dispatch(&self, request: UpstreamRequest) -> ProxyResult<Response<Incoming>> {
        let UpstreamRequest {
            method,
            uri,
            mut headers,
            body,
        } = request;
        strip_hop_by_hop(&mut headers);

        debug!(method = %method, uri = %uri, "Dispatching upstream request");

        let mut outgoing = Request::new(Full::new(body));
        *outgoing.method_mut() = method;
        *outgoing.uri_mut() = uri;
        *outgoing.headers_mut() = headers;

        tokio::time::timeout(self.read_timeout, self.client.request(outgoing))
            .await
            .map_err(|_| ProxyError::UpstreamTimeout(self.read_timeout))?
            .map_err(|e| self.classify_error(&e))
    }

    fn classify_error(&self, error: &hyper_util::client::legacy::Error) -> ProxyError {
        if caused_by_timeout(error) {
            ProxyError::UpstreamTimeout(self.connect_timeout)
        } else if error.is_connect() {
            ProxyError::UpstreamConnect(error_chain(error))
        } else {
            ProxyError::UpstreamProtocol(error_chain(error))
        }
    }
}

fn caused_by_timeout(error: &(dyn StdError + 'static)) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::TimedOut {
                return true;
            }
        }
        source = cause.source();
    }
    false
}
