//! Streaming relay: forward upstream chunks as they arrive while recording them
//!
//! [`RelayBody`] wraps the upstream body and is handed to hyper as the client
//! response body. Hyper pulls one frame at a time, so a slow client stops the
//! upstream reads instead of growing a buffer. Every data frame is copied into
//! a [`StreamAccumulator`] before it is yielded.
//!
//! The interaction record is finalized by whichever happens first:
//!
//! - the upstream body ends (completed)
//! - the upstream body errors or stalls past the read timeout (failed)
//! - hyper drops the body because the client went away (interrupted)
//!
//! Dropping the body also drops the upstream body, which closes the upstream
//! connection instead of returning it to the pool half-read.

use crate::interaction::pending::PendingInteraction;
use crate::interaction::record::{
    snapshot_headers, CapturedBody, HeaderSnapshot, ResponseBody, ResponseSnapshot, StreamCapture,
    StreamStatus,
};
use crate::proxy::headers::strip_hop_by_hop;
use crate::proxy::types::{error_chain, CaptureLimit, ProxyError};
use axum::body::Body;
use bytes::{Bytes, BytesMut};
use http::Response;
use http_body::Frame;
use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::time::Sleep;
use tracing::{debug, warn};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Running totals and retained content for one relayed stream
#[derive(Debug)]
pub struct StreamAccumulator {
    limit: usize,
    content: BytesMut,
    chunk_count: u64,
    total_bytes: u64,
    truncated: bool,
}

impl StreamAccumulator {
    pub fn new(limit: CaptureLimit) -> Self {
        Self {
            limit: *limit.as_ref(),
            content: BytesMut::new(),
            chunk_count: 0,
            total_bytes: 0,
            truncated: false,
        }
    }

    /// Count a chunk written to the client and keep as much of it as fits.
    pub fn record_chunk(&mut self, chunk: &[u8]) {
        self.chunk_count += 1;
        self.total_bytes += chunk.len() as u64;

        let room = self.limit.saturating_sub(self.content.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.content.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Build the streaming descriptor, leaving the accumulator empty.
    pub fn take_capture(&mut self, status: StreamStatus) -> StreamCapture {
        let content = std::mem::take(&mut self.content);
        StreamCapture {
            chunk_count: self.chunk_count,
            total_bytes: self.total_bytes,
            content: CapturedBody::raw(&content),
            truncated: self.truncated,
            status,
        }
    }
}

/// Owns the pending interaction for the lifetime of a relayed stream
struct StreamRecorder {
    pending: Option<PendingInteraction>,
    status: u16,
    headers: HeaderSnapshot,
    dispatched_at: Instant,
    accumulator: StreamAccumulator,
}

impl StreamRecorder {
    fn finish(&mut self, status: StreamStatus) {
        let Some(pending) = self.pending.take() else {
            return;
        };

        match &status {
            StreamStatus::Completed => debug!(
                interaction_id = %pending.id(),
                chunks = self.accumulator.chunk_count(),
                bytes = self.accumulator.total_bytes(),
                "Stream relayed to completion"
            ),
            StreamStatus::Interrupted => warn!(
                interaction_id = %pending.id(),
                chunks = self.accumulator.chunk_count(),
                "Client disconnected mid-stream"
            ),
            StreamStatus::Failed { message } => warn!(
                interaction_id = %pending.id(),
                chunks = self.accumulator.chunk_count(),
                error = %message,
                "Upstream stream failed"
            ),
        }

        let capture = self.accumulator.take_capture(status);
        pending.complete(ResponseSnapshot {
            status: self.status,
            headers: std::mem::take(&mut self.headers),
            body: ResponseBody::Streamed(capture),
            elapsed: self.dispatched_at.elapsed(),
        });
    }
}

impl Drop for StreamRecorder {
    fn drop(&mut self) {
        self.finish(StreamStatus::Interrupted);
    }
}

pin_project! {
    /// Client response body that relays and records an upstream stream
    pub struct RelayBody<B> {
        #[pin]
        inner: B,
        recorder: StreamRecorder,
        read_timeout: Duration,
        deadline: Pin<Box<Sleep>>,
        waiting: bool,
        finished: bool,
    }
}

impl<B> http_body::Body for RelayBody<B>
where
    B: http_body::Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        if *this.finished {
            return Poll::Ready(None);
        }

        match this.inner.poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                *this.waiting = false;
                if let Some(data) = frame.data_ref() {
                    this.recorder.accumulator.record_chunk(data);
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                let e: BoxError = e.into();
                let message = error_chain(&*e);
                *this.finished = true;
                this.recorder.finish(StreamStatus::Failed {
                    message: message.clone(),
                });
                Poll::Ready(Some(Err(Box::new(ProxyError::UpstreamProtocol(message)))))
            }
            Poll::Ready(None) => {
                *this.finished = true;
                this.recorder.finish(StreamStatus::Completed);
                Poll::Ready(None)
            }
            Poll::Pending => {
                if !*this.waiting {
                    *this.waiting = true;
                    this.deadline
                        .as_mut()
                        .reset(tokio::time::Instant::now() + *this.read_timeout);
                }
                match this.deadline.as_mut().poll(cx) {
                    Poll::Ready(()) => {
                        let error = ProxyError::UpstreamTimeout(*this.read_timeout);
                        *this.finished = true;
                        this.recorder.finish(StreamStatus::Failed {
                            message: error.to_string(),
                        });
                        Poll::Ready(Some(Err(Box::new(error))))
                    }
                    Poll::Pending => Poll::Pending,
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.finished
    }
}

/// Turn an upstream streaming response into the client response.
///
/// `pending` is completed when the stream ends, fails, or is dropped.
pub fn relay<B>(
    pending: PendingInteraction,
    response: Response<B>,
    dispatched_at: Instant,
    read_timeout: Duration,
    capture_limit: CaptureLimit,
) -> Response<Body>
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    let (mut parts, inner) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);

    let recorder = StreamRecorder {
        pending: Some(pending),
        status: parts.status.as_u16(),
        headers: snapshot_headers(&parts.headers),
        dispatched_at,
        accumulator: StreamAccumulator::new(capture_limit),
    };

    let body = RelayBody {
        inner,
        recorder,
        read_timeout,
        deadline: Box::pin(tokio::time::sleep(read_timeout)),
        waiting: false,
        finished: false,
    };

    Response::from_parts(parts, Body::new(body))
}
