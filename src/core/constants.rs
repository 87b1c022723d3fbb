//! Process-wide tuning constants for the synchronization engine.

use std::time::Duration;

/// Highest zoom level representable by a [`crate::TileIndex`].
pub const MAX_ZOOM: u8 = 30;

/// Native zoom level at which the tile-oriented live API serves data. Bulk
/// query completions record freshness at this granularity as well.
pub const LIVE_SOURCE_ZOOM: u8 = 14;

/// Cached data older than this is considered stale and triggers a re-fetch.
pub const STALENESS_THRESHOLD: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Quiet window after the last registration before the derived-attribute
/// pass re-runs over all loaded tiles.
pub const DERIVE_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Hard cap on the number of tiles a single request may fan out to. Ranges
/// exceeding it are trimmed to empty, never truncated to a partial batch.
pub const MAX_TILE_FAN_OUT: u64 = 100;

/// Viewport freshness checks never look at zoom levels finer than this.
pub const FRESHNESS_CHECK_MAX_ZOOM: u8 = 16;

/// Viewports zoomed out past this level are checked two levels finer, since
/// bulk fetches at wide zooms already cover large areas and a coarse check
/// would re-trigger them while panning slowly.
pub const FRESHNESS_CHECK_WIDE_ZOOM: u8 = 8;

/// Above this zoom the tile-granular live API path takes over from bulk
/// queries.
pub const BULK_MAX_ZOOM: u8 = 12;

/// Default timeout handed to the bulk query service.
pub const BULK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default capacity of the in-memory persisted-store implementation, in tiles.
pub const MEMORY_STORE_CAPACITY: usize = 2048;
