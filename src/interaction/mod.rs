//! Interaction logging: the record model, its sinks and the writer task

pub mod logger;
pub mod pending;
pub mod record;
pub mod sink;

pub use logger::{InteractionLogWriter, InteractionLogger};
pub use pending::PendingInteraction;
pub use record::{
    CapturedBody, ErrorSnapshot, InteractionId, InteractionRecord, Outcome, RequestSnapshot,
    Resolution, ResponseBody, ResponseSnapshot, StreamCapture, StreamStatus,
};
pub use sink::{DirectorySink, InteractionSink, JsonlFileSink, LogWriteError, MemorySink, NullSink};
