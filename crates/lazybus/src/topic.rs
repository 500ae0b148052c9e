use std::sync::{PoisonError, RwLock};

use tokio::sync::{mpsc, Mutex};

use crate::consumer::Consumer;
use crate::metrics::{TopicCounters, TopicStats};
use crate::producer::Producer;

/// One registry entry: the bounded queue of a topic plus its current consumer.
///
/// The queue is created together with the entry and never resized. The
/// receiving half is shared by every dispatch worker of the topic; whichever
/// worker holds the receiver lock takes the next producer.
#[derive(Debug)]
pub(crate) struct Topic {
    name: String,
    sender: mpsc::Sender<Producer>,
    receiver: Mutex<mpsc::Receiver<Producer>>,
    consumer: RwLock<Option<Consumer>>,
    counters: TopicCounters,
}

impl Topic {
    pub(crate) fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            name: name.into(),
            sender,
            receiver: Mutex::new(receiver),
            consumer: RwLock::new(None),
            counters: TopicCounters::default(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Install `consumer`, returning whether one was replaced.
    pub(crate) fn set_consumer(&self, consumer: Consumer) -> bool {
        let mut slot = self.consumer.write().unwrap_or_else(PoisonError::into_inner);
        slot.replace(consumer).is_some()
    }

    /// Current consumer. Read per message so replacements apply immediately.
    pub(crate) fn consumer(&self) -> Option<Consumer> {
        self.consumer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn has_consumer(&self) -> bool {
        self.consumer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Enqueue, waiting while the queue is full.
    pub(crate) async fn send(
        &self,
        producer: Producer,
    ) -> Result<(), mpsc::error::SendError<Producer>> {
        self.sender.send(producer).await
    }

    /// Dequeue, waiting while the queue is empty.
    ///
    /// Cancel-safe: dropping the future before it resolves loses nothing.
    pub(crate) async fn recv(&self) -> Option<Producer> {
        self.receiver.lock().await.recv().await
    }

    pub(crate) fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    pub(crate) fn counters(&self) -> &TopicCounters {
        &self.counters
    }

    pub(crate) fn stats(&self) -> TopicStats {
        self.counters.snapshot(self.len(), self.capacity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn length_tracks_queued_producers() {
        let topic = Topic::new("a", 3);
        assert_eq!(topic.capacity(), 3);
        assert_eq!(topic.len(), 0);

        topic.send(Producer::string("0")).await.unwrap();
        topic.send(Producer::string("1")).await.unwrap();
        assert_eq!(topic.len(), 2);

        topic.recv().await.unwrap();
        assert_eq!(topic.len(), 1);
        assert_eq!(topic.capacity(), 3);
    }

    #[tokio::test]
    async fn send_waits_when_full() {
        let topic = Topic::new("a", 1);
        topic.send(Producer::string("0")).await.unwrap();

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), topic.send(Producer::string("1")))
                .await;
        assert!(blocked.is_err(), "second send should wait for space");
        assert_eq!(topic.len(), 1);
    }

    #[test]
    fn consumer_slot_reports_replacement() {
        let topic = Topic::new("a", 1);
        assert!(!topic.has_consumer());

        let consumer = Consumer::from_fn(|_, _| async { Ok(()) });
        assert!(!topic.set_consumer(consumer.clone()));
        assert!(topic.set_consumer(consumer));
        assert!(topic.has_consumer());
    }
}
