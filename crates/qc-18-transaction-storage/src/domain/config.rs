//! # Storage Configuration
//!
//! Sizing and naming for the transaction cache.
//! Fixed at construction; nothing here is reconfigured at runtime.

use crate::ports::outbound::CacheSizingProvider;
use std::collections::HashMap;

/// Default name of the transaction cache.
pub const DEFAULT_CACHE_NAME: &str = "transaction_storage.transactions";

/// Default cache weight budget (8 MiB).
pub const DEFAULT_CACHE_WEIGHT_BUDGET: u64 = 8 * 1024 * 1024;

/// Environment variable overriding the cache weight budget.
pub const ENV_CACHE_BYTES: &str = "QC_TX_CACHE_BYTES";

/// Configuration for the transaction storage service.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Name under which the transaction cache is sized.
    pub cache_name: String,

    /// Budget applied to caches without an explicit entry in `cache_budgets`.
    pub cache_weight_budget: u64,

    /// Per-cache budgets, keyed by cache name.
    pub cache_budgets: HashMap<String, u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            cache_weight_budget: DEFAULT_CACHE_WEIGHT_BUDGET,
            cache_budgets: HashMap::new(),
        }
    }
}

impl StorageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from environment variables, falling back to defaults.
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(bytes) = read_env(ENV_CACHE_BYTES) {
            config.cache_weight_budget = bytes;
        }

        config
    }

    /// Set the default cache weight budget in bytes.
    pub fn with_cache_weight_budget(mut self, bytes: u64) -> Self {
        self.cache_weight_budget = bytes;
        self
    }

    /// Set a budget for one named cache.
    pub fn with_cache_budget(mut self, name: impl Into<String>, bytes: u64) -> Self {
        self.cache_budgets.insert(name.into(), bytes);
        self
    }

    pub fn with_cache_name(mut self, name: impl Into<String>) -> Self {
        self.cache_name = name.into();
        self
    }
}

impl CacheSizingProvider for StorageConfig {
    fn weight_budget(&self, cache_name: &str) -> u64 {
        self.cache_budgets
            .get(cache_name)
            .copied()
            .unwrap_or(self.cache_weight_budget)
    }
}

fn read_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable configuration value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.cache_name, DEFAULT_CACHE_NAME);
        assert_eq!(config.weight_budget(DEFAULT_CACHE_NAME), DEFAULT_CACHE_WEIGHT_BUDGET);
    }

    #[test]
    fn test_named_budget_overrides_default() {
        let config = StorageConfig::new()
            .with_cache_weight_budget(1_000)
            .with_cache_budget("hot", 50);

        assert_eq!(config.weight_budget("hot"), 50);
        assert_eq!(config.weight_budget("cold"), 1_000);
    }

    #[test]
    fn test_from_env() {
        std::env::set_var(ENV_CACHE_BYTES, "4096");
        assert_eq!(StorageConfig::from_env().cache_weight_budget, 4096);

        std::env::set_var(ENV_CACHE_BYTES, "not-a-number");
        assert_eq!(
            StorageConfig::from_env().cache_weight_budget,
            DEFAULT_CACHE_WEIGHT_BUDGET
        );

        std::env::remove_var(ENV_CACHE_BYTES);
    }
}
