//! Cache configuration.
//!
//! Configuration is built in code with the `with_*` methods or read from
//! `RASTERCACHE_*` environment variables.
//!
//! # Example
//!
//! ```
//! use rastercache::config::{CacheConfig, DirectoryStrategy};
//!
//! let config = CacheConfig::default()
//!     .with_budget_bytes(256 * 1024 * 1024)
//!     .with_directory_strategy(DirectoryStrategy::Hash);
//! assert_eq!(config.budget_bytes, 256 * 1024 * 1024);
//! ```

mod defaults;
mod size;

pub use crate::cache::DirectoryStrategy;
pub use defaults::*;
pub use size::{format_size, parse_size, SizeParseError};

use crate::cache::CacheError;
use std::time::Duration;

/// Block cache configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Memory ceiling for resident blocks, in bytes
    pub budget_bytes: usize,
    /// How band directories index their blocks
    pub directory_strategy: DirectoryStrategy,
    /// Deterministic delays for reproducing races
    pub debug: DebugHooksConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            budget_bytes: DEFAULT_CACHE_MAX,
            directory_strategy: DirectoryStrategy::Auto,
            debug: DebugHooksConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Set the memory ceiling.
    pub fn with_budget_bytes(mut self, budget_bytes: usize) -> Self {
        self.budget_bytes = budget_bytes;
        self
    }

    /// Set the directory strategy.
    pub fn with_directory_strategy(mut self, strategy: DirectoryStrategy) -> Self {
        self.directory_strategy = strategy;
        self
    }

    /// Set the debug delays.
    pub fn with_debug(mut self, debug: DebugHooksConfig) -> Self {
        self.debug = debug;
        self
    }

    /// Defaults overridden by any `RASTERCACHE_*` variables that are set.
    pub fn from_env() -> Result<Self, CacheError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CacheError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_CACHE_MAX) {
            config.budget_bytes = parse_size(&value)
                .map_err(|e| CacheError::InvalidConfig(format!("{ENV_CACHE_MAX}: {e}")))?;
        }
        if let Some(value) = lookup(ENV_DIRECTORY) {
            config.directory_strategy = value.parse().map_err(|e: String| {
                CacheError::InvalidConfig(format!("{ENV_DIRECTORY}: {e}"))
            })?;
        }
        config.debug.fill_unlocked_delay = parse_delay(&lookup, ENV_DEBUG_FILL_DELAY_MS)?;
        config.debug.evict_unlocked_delay = parse_delay(&lookup, ENV_DEBUG_WRITEBACK_DELAY_MS)?;

        Ok(config)
    }
}

fn parse_delay<F>(lookup: &F, name: &str) -> Result<Option<Duration>, CacheError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(name) else {
        return Ok(None);
    };
    let millis: u64 = value.trim().parse().map_err(|_| {
        CacheError::InvalidConfig(format!("{name}: '{value}' is not a millisecond count"))
    })?;
    Ok((millis > 0).then(|| Duration::from_millis(millis)))
}

/// Sleeps injected at the points where the cache runs without its global
/// lock. Only useful for widening race windows in tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugHooksConfig {
    /// Delay after a fill has dropped the global lock, before the driver read
    pub fill_unlocked_delay: Option<Duration>,
    /// Delay after a block is detached for eviction, before it is written back
    pub evict_unlocked_delay: Option<Duration>,
}

impl DebugHooksConfig {
    /// Whether any delay is configured.
    pub fn is_enabled(&self) -> bool {
        self.fill_unlocked_delay.is_some() || self.evict_unlocked_delay.is_some()
    }
}
