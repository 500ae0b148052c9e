//! Dispatch worker loop.
//!
//! Each topic gets `worker_pool` [`DispatchWorker`]s draining its queue. A
//! worker alternates between two states, forever:
//!
//! 1. **Waiting**: blocked on the topic queue (or on the shutdown signal).
//! 2. **Processing**: assign a fresh message id, materialize the producer,
//!    hand the stream to the topic's current consumer.
//!
//! Failures in step 2 drop the message and go back to waiting. They are
//! reported to the failure hook; there is no retry and no dead-letter queue.
//! A panicking handler is caught and reported the same way.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::failure::{DropReason, DroppedMessage, FailureHook};
use crate::producer::Producer;
use crate::topic::Topic;

pub(crate) struct DispatchWorker {
    topic: Arc<Topic>,
    index: usize,
    failure_hook: FailureHook,
    shutdown: watch::Receiver<bool>,
}

impl DispatchWorker {
    pub(crate) fn new(
        topic: Arc<Topic>,
        index: usize,
        failure_hook: FailureHook,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            topic,
            index,
            failure_hook,
            shutdown,
        }
    }

    /// Spawn the loop on `runtime`.
    pub(crate) fn spawn(self, runtime: &Handle) -> JoinHandle<()> {
        runtime.spawn(self.run())
    }

    async fn run(mut self) {
        debug!(topic = %self.topic.name(), worker = self.index, "dispatch worker started");

        loop {
            let producer = tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut self.shutdown) => break,
                next = self.topic.recv() => match next {
                    Some(producer) => producer,
                    None => break,
                },
            };
            self.dispatch(producer).await;
        }

        debug!(topic = %self.topic.name(), worker = self.index, "dispatch worker stopped");
    }

    async fn dispatch(&self, producer: Producer) {
        let id = Uuid::new_v4();

        let message = match producer.produce() {
            Ok(message) => message,
            Err(e) => return self.drop_message(id, DropReason::ProducerFailed(e)),
        };

        // Publish refuses topics without a consumer and consumers are never
        // removed, so this only misses if the slot was never filled.
        let Some(consumer) = self.topic.consumer() else {
            return self.drop_message(id, DropReason::NoConsumer);
        };

        let outcome = AssertUnwindSafe(consumer.handle(id, message))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {
                self.topic.counters().record_delivered();
                debug!(
                    topic = %self.topic.name(),
                    worker = self.index,
                    message_id = %id,
                    "message delivered"
                );
            }
            Ok(Err(e)) => self.drop_message(id, DropReason::HandlerFailed(e)),
            Err(payload) => {
                let reason = DropReason::HandlerPanicked(panic_message(payload.as_ref()));
                self.drop_message(id, reason);
            }
        }
    }

    fn drop_message(&self, id: Uuid, reason: DropReason) {
        self.topic.counters().record_drop(&reason);
        let dropped = DroppedMessage {
            topic: self.topic.name().to_string(),
            id,
            reason,
        };
        (self.failure_hook)(&dropped);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Resolve once the shutdown flag is set or its sender is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}
