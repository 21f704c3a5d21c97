//! Producer-side event delivery.
//!
//! This crate provides:
//! - EventRecord: the immutable telemetry record a hook invocation emits
//! - BatchQueue: pending batch, sealed batches and the bounded retry store
//! - EventBuffer: fire-and-forget `record()` with size and timer flushes
//! - HttpBatchTransport: `POST /api/events/batch` submission and session
//!   open/close through the SessionRegistry seam
//!
//! Delivery is at-least-once. A failed submission is kept in memory and
//! prepended to the next flush; nothing survives the process.

mod buffer;
mod error;
mod queue;
mod record;
mod sender;

pub use buffer::{BufferConfig, BufferStatus, EventBuffer, FlushOutcome, MIN_FLUSH_INTERVAL};
pub use error::{OutboxError, OutboxResult};
pub use queue::{BatchQueue, MAX_BATCH_SIZE, MAX_RETRY_BUFFER};
pub use record::{EventRecord, FlowEventType};
pub use sender::{
    BatchTransport, HttpBatchTransport, SessionClose, SessionRegistry, BATCH_PATH, SESSIONS_PATH,
};
