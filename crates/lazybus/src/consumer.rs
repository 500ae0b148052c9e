use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::BoxError;
use crate::producer::MessageStream;

/// Processes one delivered message per call.
///
/// `id` is generated by the dispatch worker when the message is dequeued and
/// is unique per delivery. A returned error is reported to the bus failure
/// hook; the message is not retried.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, id: Uuid, message: MessageStream) -> Result<(), BoxError>;
}

/// Blanket implementation so `Arc<dyn Handler>` can be registered directly.
#[async_trait]
impl<T: Handler + ?Sized> Handler for Arc<T> {
    async fn handle(&self, id: Uuid, message: MessageStream) -> Result<(), BoxError> {
        (**self).handle(id, message).await
    }
}

/// Adapts an async closure into a [`Handler`].
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Uuid, MessageStream) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn handle(&self, id: Uuid, message: MessageStream) -> Result<(), BoxError> {
        (self.0)(id, message).await
    }
}

/// The handler registered for a topic.
///
/// Cheap to clone; workers take a clone per dequeued message so a replacement
/// registered mid-flight applies from the next message on.
#[derive(Clone)]
pub struct Consumer {
    handler: Arc<dyn Handler>,
}

impl Consumer {
    pub fn new(handler: impl Handler + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }

    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Uuid, MessageStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        Self::new(FnHandler(f))
    }

    pub async fn handle(&self, id: Uuid, message: MessageStream) -> Result<(), BoxError> {
        self.handler.handle(id, message).await
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer").finish_non_exhaustive()
    }
}
