//! Default values and environment variable names.

/// Default memory ceiling for cached blocks.
pub const DEFAULT_CACHE_MAX: usize = 64 * 1024 * 1024;

/// Largest block grid that gets a dense array directory under
/// [`DirectoryStrategy::Auto`](super::DirectoryStrategy::Auto).
pub const ARRAY_DIRECTORY_MAX_BLOCKS: u64 = 1024 * 1024;

// =============================================================================
// Environment variables
// =============================================================================

/// Memory ceiling, as a size string ("512MB").
pub const ENV_CACHE_MAX: &str = "RASTERCACHE_MAX";

/// Directory strategy: `auto`, `array` or `hash`.
pub const ENV_DIRECTORY: &str = "RASTERCACHE_DIRECTORY";

/// Delay in milliseconds after a fill drops the global lock.
pub const ENV_DEBUG_FILL_DELAY_MS: &str = "RASTERCACHE_DEBUG_FILL_DELAY_MS";

/// Delay in milliseconds after a block is detached for eviction.
pub const ENV_DEBUG_WRITEBACK_DELAY_MS: &str = "RASTERCACHE_DEBUG_WRITEBACK_DELAY_MS";
