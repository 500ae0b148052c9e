//! Observation of dropped messages.
//!
//! Dispatch is fire-and-forget: when a producer or a handler fails, the worker
//! discards the message and moves on. Every such drop is described by a
//! [`DroppedMessage`] and passed to the bus [`FailureHook`], which logs by
//! default and can be replaced through [`crate::BusBuilder::on_failure`].

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::BoxError;

/// Why a message never reached (or failed inside) its consumer.
#[derive(Debug)]
pub enum DropReason {
    /// The producer function failed to materialize the message body.
    ProducerFailed(BoxError),
    /// The consumer handler returned an error.
    HandlerFailed(BoxError),
    /// The consumer handler panicked; holds the panic message.
    HandlerPanicked(String),
    /// No consumer was installed when the message was dequeued.
    NoConsumer,
}

impl DropReason {
    /// Short machine-friendly label, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            DropReason::ProducerFailed(_) => "producer_failed",
            DropReason::HandlerFailed(_) => "handler_failed",
            DropReason::HandlerPanicked(_) => "handler_panicked",
            DropReason::NoConsumer => "no_consumer",
        }
    }

    /// The error returned by the producer or handler, if there was one.
    pub fn error(&self) -> Option<&BoxError> {
        match self {
            DropReason::ProducerFailed(e) | DropReason::HandlerFailed(e) => Some(e),
            DropReason::HandlerPanicked(_) | DropReason::NoConsumer => None,
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::ProducerFailed(e) => write!(f, "producer failed: {e}"),
            DropReason::HandlerFailed(e) => write!(f, "handler failed: {e}"),
            DropReason::HandlerPanicked(msg) => write!(f, "handler panicked: {msg}"),
            DropReason::NoConsumer => f.write_str("no consumer registered"),
        }
    }
}

/// A message discarded by a dispatch worker.
#[derive(Debug)]
pub struct DroppedMessage {
    pub topic: String,
    /// Identity assigned at dequeue time.
    pub id: Uuid,
    pub reason: DropReason,
}

/// Callback invoked for every dropped message.
///
/// Runs on the dispatch worker that dropped the message, so it should return
/// quickly.
pub type FailureHook = Arc<dyn Fn(&DroppedMessage) + Send + Sync>;

/// Default hook: one structured warning per drop.
pub fn log_dropped(dropped: &DroppedMessage) {
    tracing::warn!(
        topic = %dropped.topic,
        message_id = %dropped.id,
        reason = dropped.reason.kind(),
        error = %dropped.reason,
        "message dropped"
    );
}

pub(crate) fn default_hook() -> FailureHook {
    Arc::new(log_dropped)
}
