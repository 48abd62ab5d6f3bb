//! Priority job queue for tile loading.
//!
//! Jobs are ordered by score (lower values first), then by enqueue time
//! (FIFO within the same score). The queue guarantees:
//!
//! 1. At most one live job per tile key, covering pending and running jobs
//! 2. Visible-zoom tiles are served before prefetch tiles (score dominance)
//! 3. Scores and generations can be refreshed in place when the viewport
//!    moves, without losing queue positions for unaffected jobs
//!
//! Cancellation is cooperative: cancelling a running job signals its token
//! and the worker abandons the fetch at the next await point.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::coord::TileKey;

// =============================================================================
// Job Handle
// =============================================================================

const STATE_PENDING: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_DONE: u8 = 2;

/// Shared handle for one live load job.
///
/// The queue, the worker executing the job and the manager all hold the same
/// `Arc<JobHandle>`. Score and generation are refreshed in place on viewport
/// changes, so a job enqueued under an old viewport completes under the
/// current generation as long as its tile is still required.
pub struct JobHandle {
    key: TileKey,
    score: AtomicU64,
    generation: AtomicU64,
    state: AtomicU8,
    cancel: CancellationToken,
}

impl JobHandle {
    fn new(key: TileKey, score: u64, generation: u64) -> Self {
        Self {
            key,
            score: AtomicU64::new(score),
            generation: AtomicU64::new(generation),
            state: AtomicU8::new(STATE_PENDING),
            cancel: CancellationToken::new(),
        }
    }

    /// Tile this job loads.
    pub fn key(&self) -> TileKey {
        self.key
    }

    /// Current scheduling score (lower is served first).
    pub fn score(&self) -> u64 {
        self.score.load(AtomicOrdering::Acquire)
    }

    /// Viewport generation this job currently belongs to.
    pub fn generation(&self) -> u64 {
        self.generation.load(AtomicOrdering::Acquire)
    }

    /// Token a worker races its fetch against.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the job has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn refresh(&self, score: u64, generation: u64) {
        self.score.store(score, AtomicOrdering::Release);
        self.generation.store(generation, AtomicOrdering::Release);
    }

    fn state(&self) -> u8 {
        self.state.load(AtomicOrdering::Acquire)
    }

    fn set_state(&self, state: u8) {
        self.state.store(state, AtomicOrdering::Release);
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("key", &self.key.to_string())
            .field("score", &self.score())
            .field("generation", &self.generation())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// =============================================================================
// Heap Entry
// =============================================================================

/// Heap entry with a score snapshot taken at (re)insertion time.
///
/// Rescoring rebuilds the heap, so snapshots only go stale for cancelled
/// jobs; those are skipped on pop.
struct HeapEntry {
    score: u64,
    sequence: u64,
    handle: Arc<JobHandle>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.sequence == other.sequence
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the lowest score pops first,
        // with lower sequence (older) winning ties.
        match other.score.cmp(&self.score) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ordering => ordering,
        }
    }
}

// =============================================================================
// Job Queue
// =============================================================================

/// Outcome of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new job was queued.
    Queued,
    /// A live job for the key already existed; its score and generation
    /// were refreshed instead.
    Deduplicated,
    /// The pending set is full and the new job scored worse than every
    /// pending job.
    Rejected,
}

/// Snapshot of queue occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
}

struct QueueInner {
    heap: BinaryHeap<HeapEntry>,
    /// All live jobs by key, pending and running alike.
    live: HashMap<TileKey, Arc<JobHandle>>,
    pending: usize,
    running: usize,
}

/// Priority queue of tile load jobs, shared between the manager and the
/// worker pool.
///
/// The manager enqueues, rescopes and cancels; workers pop. `pop` is async
/// and parks until a job is available or the queue is closed.
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    sequence: AtomicU64,
    max_pending: usize,
    closed: AtomicBool,
}

impl JobQueue {
    /// Creates a queue holding at most `max_pending` pending jobs.
    pub fn new(max_pending: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                live: HashMap::new(),
                pending: 0,
                running: 0,
            }),
            notify: Notify::new(),
            sequence: AtomicU64::new(0),
            max_pending,
            closed: AtomicBool::new(false),
        }
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, AtomicOrdering::Relaxed)
    }

    /// Enqueues a load job for `key`, deduplicating against live jobs.
    ///
    /// If a live job for the key exists its score and generation are
    /// refreshed in place. When the pending set is full the worst pending
    /// job is shed to make room, unless the new job scores worse than all
    /// of them.
    pub fn enqueue(&self, key: TileKey, score: u64, generation: u64) -> EnqueueOutcome {
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.live.get(&key) {
            existing.refresh(score, generation);
            trace!(tile = %key, score, "refreshed live job");
            return EnqueueOutcome::Deduplicated;
        }

        if inner.pending >= self.max_pending {
            let worst = inner
                .heap
                .iter()
                .filter(|e| e.handle.state() == STATE_PENDING && !e.handle.is_cancelled())
                .max_by_key(|e| e.handle.score())
                .map(|e| Arc::clone(&e.handle));

            match worst {
                Some(worst) if worst.score() > score => {
                    debug!(tile = %worst.key(), "shedding worst pending job for better one");
                    Self::drop_pending(&mut inner, &worst);
                }
                _ => return EnqueueOutcome::Rejected,
            }
        }

        let handle = Arc::new(JobHandle::new(key, score, generation));
        inner.live.insert(key, Arc::clone(&handle));
        inner.heap.push(HeapEntry {
            score,
            sequence: self.next_sequence(),
            handle,
        });
        inner.pending += 1;
        drop(inner);

        self.notify.notify_one();
        EnqueueOutcome::Queued
    }

    /// Removes and returns the best pending job, parking until one exists.
    ///
    /// Returns `None` once the queue is closed and drained. The returned
    /// job is marked running and stays live until [`finish`](Self::finish).
    pub async fn pop(&self) -> Option<Arc<JobHandle>> {
        loop {
            // Register interest before checking, so a notify between the
            // check and the await is not lost.
            let notified = self.notify.notified();

            if let Some(handle) = self.try_pop() {
                return Some(handle);
            }
            if self.closed.load(AtomicOrdering::Acquire) {
                return None;
            }

            notified.await;
        }
    }

    fn try_pop(&self) -> Option<Arc<JobHandle>> {
        let mut inner = self.inner.lock();
        while let Some(entry) = inner.heap.pop() {
            // Cancelled jobs leave stale entries behind; skip them.
            if entry.handle.state() != STATE_PENDING || entry.handle.is_cancelled() {
                continue;
            }
            entry.handle.set_state(STATE_RUNNING);
            inner.pending -= 1;
            inner.running += 1;
            return Some(entry.handle);
        }
        None
    }

    /// Refreshes every live job against a new viewport.
    ///
    /// `score_for` returns the new score for a key, or `None` when the key
    /// is no longer required. Jobs that drop out are cancelled: pending ones
    /// leave the queue immediately, running ones get their token signalled
    /// and finish as cancelled. Surviving jobs keep their handle and adopt
    /// `generation`, so their completions are not treated as stale.
    pub fn rescore(&self, generation: u64, score_for: impl Fn(TileKey) -> Option<u64>) {
        let mut inner = self.inner.lock();

        let mut dropped = Vec::new();
        for (key, handle) in &inner.live {
            match score_for(*key) {
                Some(score) => handle.refresh(score, generation),
                None => dropped.push(Arc::clone(handle)),
            }
        }

        for handle in dropped {
            match handle.state() {
                STATE_PENDING => Self::drop_pending(&mut inner, &handle),
                STATE_RUNNING => {
                    debug!(tile = %handle.key(), "cancelling running job");
                    handle.cancel.cancel();
                }
                _ => {}
            }
        }

        // Snapshots in the heap are stale now; rebuild from live pending jobs.
        let sequence = &self.sequence;
        let entries: Vec<HeapEntry> = inner
            .live
            .values()
            .filter(|h| h.state() == STATE_PENDING && !h.is_cancelled())
            .map(|h| HeapEntry {
                score: h.score(),
                sequence: sequence.fetch_add(1, AtomicOrdering::Relaxed),
                handle: Arc::clone(h),
            })
            .collect();
        inner.heap = BinaryHeap::from(entries);
    }

    fn drop_pending(inner: &mut QueueInner, handle: &Arc<JobHandle>) {
        handle.cancel.cancel();
        handle.set_state(STATE_DONE);
        if let Some(live) = inner.live.get(&handle.key()) {
            if Arc::ptr_eq(live, handle) {
                inner.live.remove(&handle.key());
            }
        }
        inner.pending -= 1;
        // The heap entry stays behind and is skipped on pop.
    }

    /// Cancels the live job for `key`, if any. Safe to call for keys with
    /// no live job.
    pub fn cancel(&self, key: TileKey) {
        let mut inner = self.inner.lock();
        let Some(handle) = inner.live.get(&key).map(Arc::clone) else {
            return;
        };
        match handle.state() {
            STATE_PENDING => Self::drop_pending(&mut inner, &handle),
            STATE_RUNNING => handle.cancel.cancel(),
            _ => {}
        }
    }

    /// Retires a job a worker finished with, in any outcome.
    ///
    /// Only removes the live entry if it still refers to this exact job, so
    /// a slow completion cannot evict a newer job re-enqueued for the same
    /// key.
    pub fn finish(&self, handle: &Arc<JobHandle>) {
        let mut inner = self.inner.lock();
        if handle.state() == STATE_RUNNING {
            inner.running -= 1;
        }
        handle.set_state(STATE_DONE);
        if let Some(live) = inner.live.get(&handle.key()) {
            if Arc::ptr_eq(live, handle) {
                inner.live.remove(&handle.key());
            }
        }
    }

    /// Whether a live job (pending or running) exists for `key`.
    pub fn is_live(&self, key: TileKey) -> bool {
        self.inner.lock().live.contains_key(&key)
    }

    /// Current pending/running occupancy.
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock();
        QueueStats {
            pending: inner.pending,
            running: inner.running,
        }
    }

    /// Closes the queue: pending jobs are cancelled and blocked `pop`
    /// callers return `None`.
    pub fn close(&self) {
        self.closed.store(true, AtomicOrdering::Release);
        let mut inner = self.inner.lock();
        let pending: Vec<Arc<JobHandle>> = inner
            .live
            .values()
            .filter(|h| h.state() == STATE_PENDING)
            .map(Arc::clone)
            .collect();
        for handle in pending {
            Self::drop_pending(&mut inner, &handle);
        }
        for handle in inner.live.values() {
            handle.cancel.cancel();
        }
        drop(inner);
        self.notify.notify_waiters();
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("JobQueue")
            .field("pending", &stats.pending)
            .field("running", &stats.running)
            .field("max_pending", &self.max_pending)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
