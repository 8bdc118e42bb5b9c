//! Buffered relay: read the whole upstream body, then answer the client

use crate::interaction::record::{snapshot_headers, CapturedBody, ResponseBody, ResponseSnapshot};
use crate::proxy::headers::strip_hop_by_hop;
use crate::proxy::types::{error_chain, ProxyError, ProxyResult};
use axum::body::Body;
use bytes::{Bytes, BytesMut};
use http::Response;
use http_body_util::BodyExt;
use std::time::{Duration, Instant};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Response for the client plus the snapshot that goes into the log
pub struct BufferedResponse {
    pub snapshot: ResponseSnapshot,
    pub response: Response<Body>,
}

/// Read `response` to the end, waiting at most `read_timeout` for each frame.
///
/// `dispatched_at` is when the upstream call started; the snapshot's elapsed
/// time runs from there to the last byte.
pub async fn relay<B>(
    response: Response<B>,
    dispatched_at: Instant,
    read_timeout: Duration,
) -> ProxyResult<BufferedResponse>
where
    B: http_body::Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    let (mut parts, mut body) = response.into_parts();
    let mut collected = BytesMut::new();

    loop {
        let frame = tokio::time::timeout(read_timeout, body.frame())
            .await
            .map_err(|_| ProxyError::UpstreamTimeout(read_timeout))?;
        match frame {
            Some(Ok(frame)) => {
                if let Ok(data) = frame.into_data() {
                    collected.extend_from_slice(&data);
                }
            }
            Some(Err(e)) => {
                let e: BoxError = e.into();
                return Err(ProxyError::UpstreamProtocol(error_chain(&*e)));
            }
            None => break,
        }
    }

    strip_hop_by_hop(&mut parts.headers);
    let bytes = collected.freeze();

    let snapshot = ResponseSnapshot {
        status: parts.status.as_u16(),
        headers: snapshot_headers(&parts.headers),
        body: ResponseBody::Buffered {
            content: CapturedBody::from_bytes(&bytes),
        },
        elapsed: dispatched_at.elapsed(),
    };

    Ok(BufferedResponse {
        snapshot,
        response: Response::from_parts(parts, Body::from(bytes)),
    })
}
