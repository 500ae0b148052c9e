use thiserror::Error;

/// Boxed error returned by producers and handlers.
///
/// The bus never inspects these beyond logging them and handing them to the
/// failure hook, so any error type will do.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced synchronously to callers of the bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("publishing message to unregistered consumer: topic '{0}'")]
    UnregisteredConsumer(String),

    #[error("bus has been shut down")]
    ShutDown,

    #[error("listen must be called from within a Tokio runtime")]
    NoRuntime,

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config I/O error: {0}")]
    ConfigIo(#[from] std::io::Error),
}
