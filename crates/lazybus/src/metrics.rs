//! Per-topic delivery counters.
//!
//! Each topic owns a [`TopicCounters`] updated lock-free by publishers and
//! dispatch workers. [`crate::Bus::snapshot`] collects them into a
//! serializable [`BusSnapshot`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::failure::DropReason;

/// Live counters for a single topic.
#[derive(Debug, Default)]
pub(crate) struct TopicCounters {
    published: AtomicU64,
    delivered: AtomicU64,
    producer_failures: AtomicU64,
    handler_failures: AtomicU64,
}

impl TopicCounters {
    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_drop(&self, reason: &DropReason) {
        let counter = match reason {
            DropReason::ProducerFailed(_) => &self.producer_failures,
            DropReason::HandlerFailed(_)
            | DropReason::HandlerPanicked(_)
            | DropReason::NoConsumer => &self.handler_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, queued: usize, capacity: usize) -> TopicStats {
        TopicStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            producer_failures: self.producer_failures.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            queued,
            capacity,
        }
    }
}

/// Point-in-time view of one topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TopicStats {
    /// Messages accepted by `publish`.
    pub published: u64,
    /// Messages whose handler returned `Ok`.
    pub delivered: u64,
    pub producer_failures: u64,
    /// Handler errors, handler panics and messages with no consumer.
    pub handler_failures: u64,
    /// Messages waiting in the queue.
    pub queued: usize,
    pub capacity: usize,
}

impl TopicStats {
    pub fn dropped(&self) -> u64 {
        self.producer_failures + self.handler_failures
    }
}

/// Point-in-time view of the whole bus, keyed by topic.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BusSnapshot {
    pub topics: BTreeMap<String, TopicStats>,
    pub total_published: u64,
    pub total_delivered: u64,
    pub total_dropped: u64,
}

impl FromIterator<(String, TopicStats)> for BusSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, TopicStats)>>(iter: I) -> Self {
        let mut snapshot = BusSnapshot::default();
        for (topic, stats) in iter {
            snapshot.total_published += stats.published;
            snapshot.total_delivered += stats.delivered;
            snapshot.total_dropped += stats.dropped();
            snapshot.topics.insert(topic, stats);
        }
        snapshot
    }
}
