//! Instrumentation points for exercising race windows.
//!
//! The cache calls [`CacheHooks::at`] at the places where it has just dropped
//! its global lock and is about to talk to the driver. Production caches use
//! [`NoOpHooks`]; concurrency tests install hooks that sleep or rendezvous on
//! a barrier to force a specific interleaving.

use crate::cache::types::BlockKey;
use crate::config::DebugHooksConfig;
use std::thread;
use std::time::Duration;

/// Where in the cache's control flow a hook fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// Fill claim installed, global lock dropped, driver read not yet issued.
    FillUnlocked,
    /// Block detached from list and directory, global lock dropped, write-back
    /// (if dirty) not yet issued.
    EvictUnlocked,
}

/// Callback invoked at each [`HookPoint`].
///
/// Must be cheap when unused; it runs on every miss and every eviction.
pub trait CacheHooks: Send + Sync {
    /// Called with no cache lock held.
    fn at(&self, point: HookPoint, key: &BlockKey);
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpHooks;

impl CacheHooks for NoOpHooks {
    #[inline]
    fn at(&self, _point: HookPoint, _key: &BlockKey) {}
}

/// Hooks that sleep for a fixed time at each point.
///
/// Built from [`DebugHooksConfig`] so race windows can be widened without a
/// code change.
#[derive(Debug, Clone, Default)]
pub struct DelayHooks {
    fill_unlocked: Option<Duration>,
    evict_unlocked: Option<Duration>,
}

impl DelayHooks {
    /// Create delay hooks from the debug configuration.
    pub fn from_config(config: &DebugHooksConfig) -> Self {
        Self {
            fill_unlocked: config.fill_unlocked_delay,
            evict_unlocked: config.evict_unlocked_delay,
        }
    }

    /// Delay applied at `point`, if any.
    pub fn delay(&self, point: HookPoint) -> Option<Duration> {
        match point {
            HookPoint::FillUnlocked => self.fill_unlocked,
            HookPoint::EvictUnlocked => self.evict_unlocked,
        }
    }
}

impl CacheHooks for DelayHooks {
    fn at(&self, point: HookPoint, key: &BlockKey) {
        if let Some(delay) = self.delay(point) {
            tracing::trace!(?point, block = %key, ?delay, "debug delay");
            thread::sleep(delay);
        }
    }
}
