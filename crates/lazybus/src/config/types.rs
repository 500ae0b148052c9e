use serde::{Deserialize, Serialize};

/// Default per-topic queue capacity.
pub const DEFAULT_MAX_MESSAGE: usize = 100;

/// Default number of dispatch workers per topic.
pub const DEFAULT_WORKER_POOL: usize = 5;

/// Sizing of the bus. Immutable once the bus is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Capacity of each topic queue. Publishing to a full queue waits.
    #[serde(default = "default_max_message")]
    pub max_message: usize,

    /// Dispatch workers started per topic.
    #[serde(default = "default_worker_pool")]
    pub worker_pool: usize,
}

fn default_max_message() -> usize {
    DEFAULT_MAX_MESSAGE
}

fn default_worker_pool() -> usize {
    DEFAULT_WORKER_POOL
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_message: DEFAULT_MAX_MESSAGE,
            worker_pool: DEFAULT_WORKER_POOL,
        }
    }
}
