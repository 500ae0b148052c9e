use std::fmt;
use std::io::{Cursor, Read};

use serde::Serialize;

use crate::error::BoxError;

/// Readable byte stream handed to a consumer.
pub type MessageStream = Box<dyn Read + Send>;

type ProduceFn = Box<dyn FnOnce() -> Result<MessageStream, BoxError> + Send>;

/// Deferred message body.
///
/// Publishing a `Producer` only enqueues the closure. The body is materialized
/// by the dispatch worker that dequeues it, right before the consumer runs, so
/// serialization cost lands on the worker pool instead of the publisher.
pub struct Producer {
    produce: ProduceFn,
}

impl Producer {
    /// Wrap an arbitrary deferred computation.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<MessageStream, BoxError> + Send + 'static,
    {
        Self {
            produce: Box::new(f),
        }
    }

    /// Encode `value` as JSON when the message is dispatched.
    ///
    /// The encoded document is terminated by a newline, the way a streaming
    /// JSON encoder writes it. Encoding failures surface as a dropped message.
    pub fn json<T>(value: T) -> Self
    where
        T: Serialize + Send + 'static,
    {
        Self::from_fn(move || {
            let mut buf = serde_json::to_vec(&value)?;
            buf.push(b'\n');
            Ok(stream(Cursor::new(buf)))
        })
    }

    /// Deliver a literal string. Never fails.
    pub fn string(data: impl Into<String>) -> Self {
        let data = data.into();
        Self::from_fn(move || Ok(stream(Cursor::new(data.into_bytes()))))
    }

    /// Deliver raw bytes. Never fails.
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        Self::from_fn(move || Ok(stream(Cursor::new(data))))
    }

    /// Run the deferred computation, consuming the producer.
    pub(crate) fn produce(self) -> Result<MessageStream, BoxError> {
        (self.produce)()
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer").finish_non_exhaustive()
    }
}

fn stream<R: Read + Send + 'static>(reader: R) -> MessageStream {
    Box::new(reader)
}
