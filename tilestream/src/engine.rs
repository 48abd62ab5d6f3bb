//! Engine assembly: queue, worker pool and manager wired together.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::config::EngineConfig;
use crate::coord::{TileKey, Viewport};
use crate::decode::TileDecoder;
use crate::element::TilePayload;
use crate::manager::{ManagerStats, MapTile, TileManager};
use crate::pool::WorkerPool;
use crate::scheduler::{JobQueue, QueueStats};
use crate::source::{SourceError, SourceFactory};

/// Combined engine counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStats {
    pub manager: ManagerStats,
    pub queue: QueueStats,
}

/// A running tile streaming engine.
///
/// Owns the job queue, the worker pool and the tile manager. The owner
/// drives it from its map loop: [`update_viewport`](Self::update_viewport)
/// on viewport changes, [`drain_completions`](Self::drain_completions)
/// before rendering, lookups during rendering.
///
/// Workers run on the ambient tokio runtime; `start` must be called from
/// within one.
pub struct TileEngine {
    manager: TileManager,
    queue: Arc<JobQueue>,
    pool: WorkerPool,
}

impl TileEngine {
    /// Starts workers and assembles the engine.
    ///
    /// One [`TileSource`](crate::source::TileSource) is created per worker
    /// through the factory; failure to create any of them fails the start.
    pub fn start(
        config: EngineConfig,
        sources: &dyn SourceFactory,
        decoder: Arc<dyn TileDecoder>,
    ) -> Result<Self, SourceError> {
        let queue = Arc::new(JobQueue::new(config.max_pending_jobs));
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        let pool = WorkerPool::spawn(
            config.workers,
            Arc::clone(&queue),
            sources,
            decoder,
            config.retry.clone(),
            completion_tx,
        )?;
        let manager = TileManager::new(&config, Arc::clone(&queue), completion_rx);

        info!(
            workers = config.workers,
            cache_capacity = config.cache_capacity,
            "engine started"
        );
        Ok(Self {
            manager,
            queue,
            pool,
        })
    }

    /// See [`TileManager::update_viewport`].
    pub fn update_viewport(&mut self, viewport: Viewport) -> Vec<TileKey> {
        self.manager.update_viewport(viewport)
    }

    /// See [`TileManager::drain_completions`].
    pub fn drain_completions(&mut self) -> usize {
        self.manager.drain_completions()
    }

    /// See [`TileManager::lookup`].
    pub fn lookup(&self, key: TileKey) -> Option<Arc<TilePayload>> {
        self.manager.lookup(key)
    }

    /// See [`TileManager::fallback_for`].
    pub fn fallback_for(&self, key: TileKey) -> Option<(TileKey, Arc<TilePayload>)> {
        self.manager.fallback_for(key)
    }

    /// See [`TileManager::child_fallbacks_for`].
    pub fn child_fallbacks_for(&self, key: TileKey) -> Vec<(TileKey, Arc<TilePayload>)> {
        self.manager.child_fallbacks_for(key)
    }

    /// See [`TileManager::tile`].
    pub fn tile(&self, key: TileKey) -> Option<&MapTile> {
        self.manager.tile(key)
    }

    /// Content-version receiver; bumped on every commit.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.manager.subscribe()
    }

    /// Current viewport generation.
    pub fn generation(&self) -> u64 {
        self.manager.generation()
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            manager: self.manager.stats(),
            queue: self.queue.stats(),
        }
    }

    /// Cancels outstanding work and waits for the workers to exit.
    pub async fn shutdown(self) {
        self.queue.close();
        self.pool.join().await;
        info!("engine stopped");
    }
}
