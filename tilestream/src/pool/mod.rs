//! Fixed worker pool executing tile load jobs.
//!
//! A fixed number of async workers pop jobs from the shared
//! [`JobQueue`](crate::scheduler::JobQueue), fetch tile bytes through a
//! per-worker [`TileSource`], decode them, and push a [`Completion`] onto an
//! unbounded channel the manager drains. Workers never touch the tile table;
//! all cache writes happen on the manager side.
//!
//! Cancellation is cooperative: fetches and backoff sleeps race the job's
//! cancellation token, and a job observed cancelled after decode still
//! reports `Cancelled` rather than delivering content nobody wants.

mod retry;

pub use retry::{
    RetryPolicy, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_DELAY_SECS,
};

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::coord::TileKey;
use crate::decode::TileDecoder;
use crate::element::{MapElement, RasterTile, TilePayload, TileSink};
use crate::scheduler::{JobHandle, JobQueue};
use crate::source::{SourceError, SourceFactory, TileSource};

// =============================================================================
// Completions
// =============================================================================

/// Which stage of a load failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Fetch failed after exhausting retries, or failed permanently. The
    /// tile is marked failed for the session.
    Network,
    /// The payload was malformed. The tile stays eligible for a fresh
    /// fetch on a later viewport cycle.
    Decode,
}

/// Terminal result of one load job.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// Decoded content ready to commit.
    Ready(TilePayload),
    /// The job failed at the named stage.
    Failed(FailureKind),
    /// The job was cancelled before delivering content.
    Cancelled,
}

/// One finished job as reported to the manager.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub key: TileKey,
    /// Viewport generation the job belonged to when it finished.
    pub generation: u64,
    pub outcome: CompletionOutcome,
}

// =============================================================================
// Payload Collector
// =============================================================================

/// Sink that accumulates decoded content into an owned [`TilePayload`].
///
/// Elements are cloned out of the decoder's reusable buffer here, on the
/// worker, so the manager commits owned data without further copying.
#[derive(Default)]
struct PayloadCollector {
    elements: Vec<MapElement>,
    raster: Option<RasterTile>,
    success: Option<bool>,
}

impl PayloadCollector {
    fn new() -> Self {
        Self::default()
    }

    fn into_payload(self) -> Option<TilePayload> {
        if self.success != Some(true) {
            return None;
        }
        match self.raster {
            Some(raster) => Some(TilePayload::Raster(raster)),
            // An empty element list is a valid tile (ocean, desert).
            None => Some(TilePayload::Vector(self.elements)),
        }
    }
}

impl TileSink for PayloadCollector {
    fn process(&mut self, element: &MapElement) {
        self.elements.push(element.clone());
    }

    fn set_raster(&mut self, raster: RasterTile) {
        self.raster = Some(raster);
    }

    fn completed(&mut self, success: bool) {
        self.success = Some(success);
    }
}

// =============================================================================
// Worker Pool
// =============================================================================

/// Fixed pool of async workers draining the job queue.
///
/// Each worker owns its own [`TileSource`] instance, so sources need no
/// internal synchronization. The pool stops when the queue is closed and
/// all workers have drained.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `workers` workers onto the current tokio runtime.
    ///
    /// Fails if the source factory cannot create a source per worker.
    pub fn spawn(
        workers: usize,
        queue: Arc<JobQueue>,
        factory: &dyn SourceFactory,
        decoder: Arc<dyn TileDecoder>,
        retry: RetryPolicy,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Result<Self, SourceError> {
        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let source = factory.create()?;
            let worker = Worker {
                id: worker_id,
                queue: Arc::clone(&queue),
                source,
                decoder: Arc::clone(&decoder),
                retry: retry.clone(),
                completions: completions.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }
        info!(workers, "worker pool started");
        Ok(Self { workers: handles })
    }

    /// Number of workers in the pool.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Waits for all workers to drain and exit.
    ///
    /// The queue must have been closed first, otherwise this waits forever.
    pub async fn join(self) {
        for handle in self.workers {
            // A worker that panicked already logged through the panic hook.
            let _ = handle.await;
        }
        info!("worker pool stopped");
    }
}

struct Worker {
    id: usize,
    queue: Arc<JobQueue>,
    source: Box<dyn TileSource>,
    decoder: Arc<dyn TileDecoder>,
    retry: RetryPolicy,
    completions: mpsc::UnboundedSender<Completion>,
}

impl Worker {
    async fn run(mut self) {
        debug!(worker = self.id, "worker started");
        while let Some(job) = self.queue.pop().await {
            let outcome = self.execute(&job).await;
            let completion = Completion {
                key: job.key(),
                generation: job.generation(),
                outcome,
            };
            self.queue.finish(&job);
            if self.completions.send(completion).is_err() {
                // Manager is gone; nothing left to work for.
                break;
            }
        }
        self.source.close();
        debug!(worker = self.id, "worker stopped");
    }

    async fn execute(&mut self, job: &Arc<JobHandle>) -> CompletionOutcome {
        let key = job.key();
        let cancel = job.cancellation().clone();
        trace!(worker = self.id, tile = %key, score = job.score(), "job started");

        let mut attempt = 0u32;
        let data = loop {
            attempt += 1;
            let fetched = tokio::select! {
                _ = cancel.cancelled() => return CompletionOutcome::Cancelled,
                result = self.source.fetch(key) => result,
            };

            match fetched {
                Ok(data) => break data,
                Err(e) => {
                    let Some(delay) = self.retry.next_delay(&e, attempt) else {
                        warn!(tile = %key, attempt, error = %e, "fetch failed, not retrying");
                        return CompletionOutcome::Failed(FailureKind::Network);
                    };
                    debug!(tile = %key, attempt, delay_ms = delay.as_millis() as u64,
                           error = %e, "fetch failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return CompletionOutcome::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        };

        if cancel.is_cancelled() {
            return CompletionOutcome::Cancelled;
        }

        let mut collector = PayloadCollector::new();
        match self.decoder.decode(&data, &mut collector) {
            Ok(()) => match collector.into_payload() {
                Some(payload) => {
                    trace!(worker = self.id, tile = %key,
                           elements = payload.element_count(), "job decoded");
                    if cancel.is_cancelled() {
                        CompletionOutcome::Cancelled
                    } else {
                        CompletionOutcome::Ready(payload)
                    }
                }
                None => CompletionOutcome::Failed(FailureKind::Decode),
            },
            Err(e) => {
                warn!(tile = %key, error = %e, "decode failed");
                CompletionOutcome::Failed(FailureKind::Decode)
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
