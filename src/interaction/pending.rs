//! Ownership of an interaction between arrival and persistence
//!
//! A [`PendingInteraction`] is created when a request arrives and is consumed
//! by exactly one terminal call (`complete` or `fail`). If the request flow is
//! dropped before either happens, which is what a client disconnect looks
//! like to a handler, the drop path persists an interrupted record instead.

use crate::interaction::logger::InteractionLogger;
use crate::interaction::record::*;
use crate::proxy::types::ProxyError;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::debug;

struct Draft {
    timestamp: DateTime<Utc>,
    request: RequestSnapshot,
}

pub struct PendingInteraction {
    logger: InteractionLogger,
    draft: Option<Draft>,
    id: InteractionId,
    started: Instant,
}

impl PendingInteraction {
    pub fn begin(logger: InteractionLogger, id: InteractionId, request: RequestSnapshot) -> Self {
        Self {
            logger,
            draft: Some(Draft {
                timestamp: Utc::now(),
                request,
            }),
            id,
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> InteractionId {
        self.id
    }

    /// Time since the request arrived
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn set_request_body(&mut self, body: CapturedBody) {
        if let Some(draft) = self.draft.as_mut() {
            draft.request.body = body;
        }
    }

    /// Persist the interaction with the response that was relayed.
    pub fn complete(mut self, response: ResponseSnapshot) {
        let (outcome, streaming) = match &response.body {
            ResponseBody::Buffered { .. } => (Outcome::Completed, false),
            ResponseBody::Streamed(capture) => match capture.status {
                StreamStatus::Completed => (Outcome::Completed, true),
                StreamStatus::Interrupted => (Outcome::Interrupted, true),
                StreamStatus::Failed { .. } => (Outcome::Failed, true),
            },
        };
        self.persist(Resolution::Response(response), outcome, streaming);
    }

    /// Persist the interaction as failed before any response was relayed.
    pub fn fail(mut self, error: &ProxyError) {
        let resolution = Resolution::Error(self.error_snapshot(error));
        self.persist(resolution, Outcome::Failed, false);
    }

    fn error_snapshot(&self, error: &ProxyError) -> ErrorSnapshot {
        ErrorSnapshot {
            code: error.code().to_string(),
            message: error.to_string(),
            elapsed: self.elapsed(),
        }
    }

    fn persist(&mut self, resolution: Resolution, outcome: Outcome, streaming: bool) {
        if let Some(draft) = self.draft.take() {
            self.logger.append(InteractionRecord {
                id: self.id,
                timestamp: draft.timestamp,
                request: draft.request,
                resolution,
                outcome,
                duration: self.started.elapsed(),
                streaming,
            });
        }
    }
}

impl Drop for PendingInteraction {
    fn drop(&mut self) {
        if self.draft.is_some() {
            debug!(interaction_id = %self.id, "Request dropped before a response was relayed");
            let resolution = Resolution::Error(self.error_snapshot(&ProxyError::ClientDisconnected));
            self.persist(resolution, Outcome::Interrupted, false);
        }
    }
}
