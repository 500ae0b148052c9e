use std::path::Path;

use crate::error::BusError;

use super::types::BusConfig;

impl BusConfig {
    /// Create a config with explicit sizes, normalized.
    pub fn new(max_message: usize, worker_pool: usize) -> Self {
        Self {
            max_message,
            worker_pool,
        }
        .normalized()
    }

    /// Parse config from a TOML string, then apply env overrides.
    pub fn from_toml(toml_str: &str) -> Result<Self, BusError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides();
        Ok(config.normalized())
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BusError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus env overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.normalized()
    }

    /// Clamp both sizes to at least 1.
    ///
    /// A pool of zero workers would never drain, and the bounded channel
    /// backing each queue needs a non-zero capacity.
    pub fn normalized(mut self) -> Self {
        self.worker_pool = self.worker_pool.max(1);
        self.max_message = self.max_message.max(1);
        self
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply `LAZYBUS_*` environment variable overrides.
    ///
    /// Values that do not parse as an unsigned integer are ignored.
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("LAZYBUS_MAX_MESSAGE").and_then(|v| v.parse().ok()) {
            self.max_message = v;
        }
        if let Some(v) = lookup("LAZYBUS_WORKER_POOL").and_then(|v| v.parse().ok()) {
            self.worker_pool = v;
        }
    }
}
