//! Bus configuration.
//!
//! [`BusConfig`] can be built in code, parsed from TOML, or loaded from a
//! file. Environment variables override file values:
//!
//! | Variable              | Field         |
//! |-----------------------|---------------|
//! | `LAZYBUS_MAX_MESSAGE` | `max_message` |
//! | `LAZYBUS_WORKER_POOL` | `worker_pool` |

mod loading;
mod types;


pub use types::{BusConfig, DEFAULT_MAX_MESSAGE, DEFAULT_WORKER_POOL};
