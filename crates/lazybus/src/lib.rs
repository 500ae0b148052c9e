//! lazybus: an in-process publish/subscribe bus with lazy message bodies.
//!
//! Publishers enqueue [`Producer`]s on a topic. Each topic has a bounded FIFO
//! queue drained by a fixed pool of dispatch workers, which materialize the
//! message body and hand it to the topic's [`Consumer`].
//!
//! ```text
//! publish(topic, producer) ──► [ bounded queue ] ──► N workers ──► consumer(id, stream)
//!                                 (full = wait)          │
//!                                                        └─ failures ──► failure hook
//! ```

pub mod bus;
pub mod config;
pub mod consumer;
pub mod error;
pub mod failure;
pub mod metrics;
pub mod producer;
mod topic;
mod worker;

pub use bus::{Bus, BusBuilder};
pub use config::BusConfig;
pub use consumer::{Consumer, Handler};
pub use error::{BoxError, BusError};
pub use failure::{DropReason, DroppedMessage, FailureHook};
pub use metrics::{BusSnapshot, TopicStats};
pub use producer::{MessageStream, Producer};
