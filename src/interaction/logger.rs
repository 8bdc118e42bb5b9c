//! Single-writer interaction logger
//!
//! Request flows hand finished records to an [`InteractionLogger`]; one
//! background [`InteractionLogWriter`] owns the sink and appends records in
//! arrival order. Appends from concurrent requests are therefore serialized
//! without any request ever waiting on sink I/O.
//!
//! The queue is unbounded because a record may be handed over from a `Drop`
//! and must never be discarded. A slow sink shows up instead as a growing
//! [`InteractionLogger::backlog`] and a warning every [`BACKLOG_WARN_STEP`]
//! queued records.

use crate::interaction::record::InteractionRecord;
use crate::interaction::sink::{InteractionSink, LogWriteError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Backlog size at whose multiples the logger warns that the sink lags behind
pub const BACKLOG_WARN_STEP: usize = 1024;

enum LogCommand {
    Append(Box<InteractionRecord>),
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle used by request flows to persist records
#[derive(Clone)]
pub struct InteractionLogger {
    tx: mpsc::UnboundedSender<LogCommand>,
    backlog: Arc<AtomicUsize>,
}

impl InteractionLogger {
    /// Start a writer task for `sink` and return the handle feeding it.
    pub fn spawn(sink: Arc<dyn InteractionSink>) -> (Self, JoinHandle<()>) {
        let (writer, logger) = InteractionLogWriter::new(sink);
        let handle = tokio::spawn(writer.run());
        (logger, handle)
    }

    /// Queue a fully resolved record. Failures go to diagnostics only.
    pub fn append(&self, record: InteractionRecord) {
        let id = record.id;
        let queued = self.backlog.fetch_add(1, Ordering::Relaxed) + 1;

        if self.tx.send(LogCommand::Append(Box::new(record))).is_err() {
            self.backlog.fetch_sub(1, Ordering::Relaxed);
            error!(
                interaction_id = %id,
                error = %LogWriteError::WriterStopped,
                "Interaction record dropped"
            );
            return;
        }

        if queued % BACKLOG_WARN_STEP == 0 {
            warn!(queued, "Interaction log writer is falling behind");
        }
    }

    /// Records queued but not yet handed to the sink
    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Relaxed)
    }

    /// Wait until every record queued before this call has been handed to the sink.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(LogCommand::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Drain queued records and stop the writer.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(LogCommand::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}

/// Background task that owns the sink
pub struct InteractionLogWriter {
    sink: Arc<dyn InteractionSink>,
    rx: mpsc::UnboundedReceiver<LogCommand>,
    backlog: Arc<AtomicUsize>,
}

impl InteractionLogWriter {
    pub fn new(sink: Arc<dyn InteractionSink>) -> (Self, InteractionLogger) {
        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        (
            Self {
                sink,
                rx,
                backlog: backlog.clone(),
            },
            InteractionLogger { tx, backlog },
        )
    }

    /// Process commands until shutdown or until every logger handle is gone.
    pub async fn run(mut self) {
        info!("Interaction log writer started");

        while let Some(command) = self.rx.recv().await {
            match command {
                LogCommand::Append(record) => self.write(&record).await,
                LogCommand::Flush(ack) => {
                    let _ = ack.send(());
                }
                LogCommand::Shutdown(ack) => {
                    self.rx.close();
                    while let Ok(queued) = self.rx.try_recv() {
                        match queued {
                            LogCommand::Append(record) => self.write(&record).await,
                            LogCommand::Flush(waiter) | LogCommand::Shutdown(waiter) => {
                                let _ = waiter.send(());
                            }
                        }
                    }
                    let _ = ack.send(());
                    break;
                }
            }
        }

        info!("Interaction log writer stopped");
    }

    async fn write(&self, record: &InteractionRecord) {
        let result = self.sink.append(record).await;
        self.backlog.fetch_sub(1, Ordering::Relaxed);

        match result {
            Ok(()) => debug!(
                interaction_id = %record.id,
                outcome = %record.outcome,
                "Interaction record persisted"
            ),
            Err(e) => error!(
                interaction_id = %record.id,
                error = %e,
                "Failed to persist interaction record"
            ),
        }
    }
}
