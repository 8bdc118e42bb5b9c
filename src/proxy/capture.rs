//! Inbound request capture: target resolution, snapshot and bounded body read

use crate::interaction::record::{snapshot_headers, CapturedBody, RequestSnapshot};
use crate::proxy::types::{error_chain, ProxyError, ProxyResult, RequestSizeLimit, UpstreamBaseUrl};
use axum::body::Body;
use bytes::Bytes;
use http::request::Parts;
use http::Uri;
use http_body_util::BodyExt;
use std::net::SocketAddr;

/// Append the inbound path and query, unchanged, to the upstream base.
pub fn upstream_url(base: &UpstreamBaseUrl, inbound: &Uri) -> String {
    let path_and_query = inbound
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    base.join(path_and_query)
}

pub fn parse_target(url: &str) -> ProxyResult<Uri> {
    url.parse::<Uri>()
        .map_err(|e| ProxyError::InvalidTargetUrl(format!("{url}: {e}")))
}

/// Snapshot the request head. The body is filled in once it has been read.
pub fn request_snapshot(parts: &Parts, url: &str, client_addr: Option<SocketAddr>) -> RequestSnapshot {
    RequestSnapshot {
        method: parts.method.to_string(),
        url: url.to_string(),
        headers: snapshot_headers(&parts.headers),
        body: CapturedBody::Empty,
        client_addr: client_addr.map(|addr| addr.to_string()),
    }
}

/// Read the whole request body, refusing anything larger than `limit`.
pub async fn read_body(body: Body, limit: RequestSizeLimit) -> ProxyResult<Bytes> {
    let collected = http_body_util::Limited::new(body, *limit.as_ref())
        .collect()
        .await
        .map_err(|e| {
            if e.is::<http_body_util::LengthLimitError>() {
                ProxyError::BodyTooLarge { max_size: limit }
            } else {
                ProxyError::RequestBody(error_chain(&*e))
            }
        })?;
    Ok(collected.to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn base(url: &str) -> UpstreamBaseUrl {
        UpstreamBaseUrl::try_new(url.to_string()).unwrap()
    }

    #[test]
    fn test_upstream_url_appends_path_and_query() {
        let inbound: Uri = "/v1/chat/completions?stream=true".parse().unwrap();
        let url = upstream_url(&base("http://127.0.0.1:9000"), &inbound);
        assert_eq!(url, "http://127.0.0.1:9000/v1/chat/completions?stream=true");
        assert_eq!(parse_target(&url).unwrap().path(), "/v1/chat/completions");
    }

    #[test]
    fn test_upstream_url_defaults_to_root() {
        let inbound = Uri::from_static("http://client.example");
        let url = upstream_url(&base("https://api.example.com/"), &inbound);
        assert_eq!(url, "https://api.example.com/");
    }

    #[test]
    fn test_parse_target_rejects_malformed_url() {
        let result = parse_target("http://upstream.test/has space");
        assert!(matches!(result, Err(ProxyError::InvalidTargetUrl(_))));
    }

    #[test]
    fn test_request_snapshot_records_head() {
        let request = Request::builder()
            .method("POST")
            .uri("/v1/embeddings")
            .header("authorization", "Bearer sk-test")
            .body(())
            .unwrap();
        let (parts, ()) = request.into_parts();
        let addr: SocketAddr = "10.0.0.7:51234".parse().unwrap();

        let snapshot = request_snapshot(&parts, "http://upstream.test/v1/embeddings", Some(addr));

        assert_eq!(snapshot.method, "POST");
        assert_eq!(snapshot.url, "http://upstream.test/v1/embeddings");
        assert_eq!(snapshot.headers["authorization"], "Bearer sk-test");
        assert_eq!(snapshot.client_addr.as_deref(), Some("10.0.0.7:51234"));
        assert_eq!(snapshot.body, CapturedBody::Empty);
    }

    #[tokio::test]
    async fn test_read_body_within_limit() {
        let limit = RequestSizeLimit::try_new(16).unwrap();
        let bytes = read_body(Body::from("hello"), limit).await.unwrap();
        assert_eq!(&bytes[..], b"hello");
    }

    #[tokio::test]
    async fn test_read_body_over_limit() {
        let limit = RequestSizeLimit::try_new(4).unwrap();
        let result = read_body(Body::from("too large"), limit).await;
        assert!(matches!(result, Err(ProxyError::BodyTooLarge { .. })));
    }
}
