//! Bounded, thread-safe block cache.
//!
//! Blocks are filled from a [`BlockDriver`](crate::driver::BlockDriver) on
//! first use, handed out as [`BlockGuard`]s and evicted least-recently-used
//! first once the cache exceeds its memory budget. Dirty blocks are written
//! back before their memory is released.

mod block;
mod claim;
mod directory;
mod eviction;
mod guard;
mod hooks;
mod manager;
mod stats;
mod types;

pub use block::Block;
pub use directory::{BlockDirectory, DirectoryStrategy};
pub use eviction::EvictionList;
pub use guard::BlockGuard;
pub use hooks::{CacheHooks, DelayHooks, HookPoint, NoOpHooks};
pub use manager::BlockCache;
pub use stats::CacheStats;
pub use types::{AccessMode, BandId, BlockKey, CacheError, DatasetId, WriteBackError};
