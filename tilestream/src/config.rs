//! Engine configuration.

use crate::pool::RetryPolicy;

/// Default number of settled tiles kept in the cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

/// Default bound on pending jobs in the queue.
pub const DEFAULT_MAX_PENDING_JOBS: usize = 128;

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE_PX: u32 = 256;

/// Default number of fetch attempts per job.
pub const DEFAULT_FETCH_ATTEMPTS: u32 = 3;

/// Tunables for a [`TileEngine`](crate::engine::TileEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of settled (ready or failed) tiles kept cached.
    pub cache_capacity: usize,

    /// Number of load workers. Defaults to the available parallelism.
    pub workers: usize,

    /// Maximum number of jobs waiting in the queue; beyond this, worse
    /// jobs are shed in favor of better ones.
    pub max_pending_jobs: usize,

    /// Tile edge length in pixels, used for viewport coverage.
    pub tile_size_px: u32,

    /// Retry behavior for transient fetch failures.
    pub retry: RetryPolicy,

    /// Whether to prefetch the parent tiles of the visible grid, giving
    /// the renderer a coarser fallback while children load.
    pub prefetch_parents: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            workers,
            max_pending_jobs: DEFAULT_MAX_PENDING_JOBS,
            tile_size_px: DEFAULT_TILE_SIZE_PX,
            retry: RetryPolicy::exponential(DEFAULT_FETCH_ATTEMPTS),
            prefetch_parents: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_max_pending_jobs(mut self, max_pending: usize) -> Self {
        self.max_pending_jobs = max_pending;
        self
    }

    pub fn with_tile_size_px(mut self, tile_size_px: u32) -> Self {
        self.tile_size_px = tile_size_px;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_prefetch_parents(mut self, prefetch: bool) -> Self {
        self.prefetch_parents = prefetch;
        self
    }
}
