//! Tile cache manager.
//!
//! The [`TileManager`] owns the tile table and is its only writer. It turns
//! viewport changes into load jobs, drains worker completions, commits
//! decoded payloads, and evicts tiles beyond capacity. Render-side readers
//! get payloads through [`lookup`](TileManager::lookup) /
//! [`fallback_for`](TileManager::fallback_for) and learn about new content
//! through a watch channel carrying a monotonically increasing version.
//!
//! # Lifecycle of a tile
//!
//! ```text
//!  (absent) ──enqueue──► Loading ──commit──► Ready ──evict──► (absent)
//!                           │
//!                           ├──network failure──► Failed   (kept for session)
//!                           ├──decode failure───► (absent) (refetch next cycle)
//!                           └──cancel/stale─────► (absent)
//! ```
//!
//! Completions carry the viewport generation their job last belonged to.
//! A completion whose generation is older than the current one is dropped;
//! re-applying it later is a no-op because the live-job table already moved
//! on.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace};

use crate::config::EngineConfig;
use crate::coord::{priority_score, TileKey, Viewport};
use crate::element::TilePayload;
use crate::pool::{Completion, CompletionOutcome, FailureKind};
use crate::scheduler::{EnqueueOutcome, JobQueue};

// =============================================================================
// Tile State
// =============================================================================

/// Weight of one generation of age in the eviction rank.
///
/// Strictly larger than the maximum priority score (`MAX_ZOOM` zoom levels
/// of mismatch plus the capped distance term, under 2^29), so a tile left
/// over from an older viewport always ranks above anything current and
/// distance only breaks ties within the same generation.
pub const GENERATION_AGE_WEIGHT: u64 = 1 << 30;

/// Lifecycle state of a cached tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileState {
    /// A load job is live for this tile.
    Loading,
    /// Decoded content is committed and renderable.
    Ready,
    /// The fetch failed permanently; not retried this session.
    Failed,
}

/// One entry in the tile table.
#[derive(Debug, Clone)]
pub struct MapTile {
    key: TileKey,
    state: TileState,
    payload: Option<Arc<TilePayload>>,
    /// Distance score under the viewport that last required this tile.
    score: u64,
    /// Viewport generation that last required this tile.
    generation: u64,
    /// Insertion order, breaks eviction ties.
    sequence: u64,
}

impl MapTile {
    pub fn key(&self) -> TileKey {
        self.key
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    /// Committed payload, present only in [`TileState::Ready`].
    pub fn payload(&self) -> Option<&Arc<TilePayload>> {
        self.payload.as_ref()
    }

    /// Eviction rank under the current generation; higher evicts first.
    fn eviction_rank(&self, current_generation: u64) -> u64 {
        let age = current_generation.saturating_sub(self.generation);
        age.saturating_mul(GENERATION_AGE_WEIGHT)
            .saturating_add(self.score)
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Counters exposed for logging and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Entries currently in the tile table, by state.
    pub loading: usize,
    pub ready: usize,
    pub failed: usize,
    /// Totals since startup.
    pub jobs_enqueued: u64,
    pub committed: u64,
    pub evicted: u64,
    pub stale_dropped: u64,
    pub cancelled: u64,
}

// =============================================================================
// Tile Manager
// =============================================================================

/// Owns the tile table; the single writer for all tile state.
///
/// All mutating methods take `&mut self`, so the owning component (engine,
/// map loop) serializes viewport updates, completion draining and eviction
/// by construction. Workers never touch the table; they only send
/// [`Completion`]s over the channel drained here.
pub struct TileManager {
    tiles: HashMap<TileKey, MapTile>,
    /// Visible keys of the current viewport; shielded from eviction.
    required: HashSet<TileKey>,
    queue: Arc<JobQueue>,
    completions: mpsc::UnboundedReceiver<Completion>,
    content_version: watch::Sender<u64>,

    capacity: usize,
    tile_size_px: u32,
    prefetch_parents: bool,

    generation: u64,
    sequence: u64,
    viewport: Option<Viewport>,

    jobs_enqueued: u64,
    committed: u64,
    evicted: u64,
    stale_dropped: u64,
    cancelled: u64,
}

impl TileManager {
    /// Creates a manager over a shared job queue and a completion channel.
    pub fn new(
        config: &EngineConfig,
        queue: Arc<JobQueue>,
        completions: mpsc::UnboundedReceiver<Completion>,
    ) -> Self {
        let (content_version, _) = watch::channel(0);
        Self {
            tiles: HashMap::new(),
            required: HashSet::new(),
            queue,
            completions,
            content_version,
            capacity: config.cache_capacity,
            tile_size_px: config.tile_size_px,
            prefetch_parents: config.prefetch_parents,
            generation: 0,
            sequence: 0,
            viewport: None,
            jobs_enqueued: 0,
            committed: 0,
            evicted: 0,
            stale_dropped: 0,
            cancelled: 0,
        }
    }

    /// Current viewport generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Subscribes to content-version bumps; the value increases on every
    /// commit, so a render loop can sleep on `changed()`.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.content_version.subscribe()
    }

    // -------------------------------------------------------------------------
    // Viewport updates
    // -------------------------------------------------------------------------

    /// Applies a viewport change: enqueues missing tiles, refreshes live
    /// jobs, cancels jobs for tiles that left the viewport, and evicts
    /// beyond capacity. Pending completions are applied first, so the diff
    /// runs against current state.
    ///
    /// Returns the set of tile keys the viewport requires, for the render
    /// layer to iterate.
    pub fn update_viewport(&mut self, viewport: Viewport) -> Vec<TileKey> {
        self.drain_completions();

        self.generation += 1;
        self.viewport = Some(viewport);
        let generation = self.generation;

        let required = viewport.required_keys(self.tile_size_px);
        self.required = required.iter().copied().collect();
        let scores = self.required_scores(&viewport, &required);
        debug!(
            generation,
            center = %viewport.center,
            required = required.len(),
            "viewport update"
        );

        // Decode failures became eligible again when their entry was
        // removed at completion time; they show up here as absent keys.
        for (&key, &score) in &scores {
            match self.tiles.get_mut(&key) {
                Some(tile) => {
                    // Ready and Loading tiles stay; refresh their ranking.
                    // Failed tiles stay failed for the session.
                    tile.score = score;
                    tile.generation = generation;
                    if tile.state == TileState::Loading {
                        self.queue.enqueue(key, score, generation);
                    }
                }
                None => match self.queue.enqueue(key, score, generation) {
                    EnqueueOutcome::Queued | EnqueueOutcome::Deduplicated => {
                        self.insert_tile(key, TileState::Loading, None, score, generation);
                        self.jobs_enqueued += 1;
                    }
                    EnqueueOutcome::Rejected => {
                        trace!(tile = %key, "enqueue rejected, queue full");
                    }
                },
            }
        }

        // Drop queued work for tiles that left the required set and drop
        // their Loading entries; running jobs get cancelled and resolve
        // through a Cancelled completion.
        self.queue
            .rescore(generation, |key| scores.get(&key).copied());
        self.tiles
            .retain(|key, tile| tile.state != TileState::Loading || scores.contains_key(key));

        self.enforce_capacity();
        required
    }

    /// Scores for every key to load: the visible grid, plus parent tiles
    /// one level up when prefetch is enabled.
    fn required_scores(
        &self,
        viewport: &Viewport,
        required: &[TileKey],
    ) -> HashMap<TileKey, u64> {
        let mut scores = HashMap::with_capacity(required.len() * 2);
        if self.prefetch_parents {
            let parents: HashSet<TileKey> = required.iter().filter_map(TileKey::parent).collect();
            for parent in parents {
                scores.insert(parent, priority_score(parent, viewport));
            }
        }
        // Visible keys overwrite any aliasing parent entry.
        for &key in required {
            scores.insert(key, priority_score(key, viewport));
        }
        scores
    }

    fn insert_tile(
        &mut self,
        key: TileKey,
        state: TileState,
        payload: Option<Arc<TilePayload>>,
        score: u64,
        generation: u64,
    ) {
        let sequence = self.sequence;
        self.sequence += 1;
        self.tiles.insert(
            key,
            MapTile {
                key,
                state,
                payload,
                score,
                generation,
                sequence,
            },
        );
    }

    // -------------------------------------------------------------------------
    // Completions
    // -------------------------------------------------------------------------

    /// Drains all queued completions and applies them to the table.
    ///
    /// Returns the number of payloads committed. The content version is
    /// bumped once per commit, after the commit is visible in the table.
    pub fn drain_completions(&mut self) -> usize {
        let mut committed = 0;
        while let Ok(completion) = self.completions.try_recv() {
            if self.apply_completion(completion) {
                committed += 1;
            }
        }
        if committed > 0 {
            self.enforce_capacity();
        }
        committed
    }

    fn apply_completion(&mut self, completion: Completion) -> bool {
        let key = completion.key;

        // A completion for a generation older than the current one belongs
        // to a viewport that no longer exists.
        if completion.generation < self.generation {
            trace!(tile = %key, generation = completion.generation, "dropping stale completion");
            self.stale_dropped += 1;
            if matches!(self.tiles.get(&key), Some(t) if t.state == TileState::Loading
                && t.generation <= completion.generation)
            {
                self.tiles.remove(&key);
            }
            return false;
        }

        let Some(tile) = self.tiles.get_mut(&key) else {
            // Evicted or never tracked; nothing to apply.
            self.stale_dropped += 1;
            return false;
        };
        if tile.state != TileState::Loading {
            self.stale_dropped += 1;
            return false;
        }

        match completion.outcome {
            CompletionOutcome::Ready(payload) => {
                tile.state = TileState::Ready;
                tile.payload = Some(Arc::new(payload));
                self.committed += 1;
                self.content_version.send_modify(|v| *v += 1);
                trace!(tile = %key, "committed");
                true
            }
            CompletionOutcome::Failed(FailureKind::Network) => {
                // Permanent for the session; renders fall back to ancestors.
                tile.state = TileState::Failed;
                info!(tile = %key, "tile failed permanently");
                false
            }
            CompletionOutcome::Failed(FailureKind::Decode) => {
                // Forget the tile so the next viewport cycle refetches it.
                self.tiles.remove(&key);
                false
            }
            CompletionOutcome::Cancelled => {
                self.cancelled += 1;
                self.tiles.remove(&key);
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    /// Committed payload for a tile, if it is [`TileState::Ready`].
    pub fn lookup(&self, key: TileKey) -> Option<Arc<TilePayload>> {
        self.tiles
            .get(&key)
            .filter(|t| t.state == TileState::Ready)
            .and_then(|t| t.payload.clone())
    }

    /// Tile table entry, any state.
    pub fn tile(&self, key: TileKey) -> Option<&MapTile> {
        self.tiles.get(&key)
    }

    /// Nearest ready ancestor payload, for rendering a coarser tile while
    /// `key` is loading or failed.
    pub fn fallback_for(&self, key: TileKey) -> Option<(TileKey, Arc<TilePayload>)> {
        let mut current = key.parent();
        while let Some(ancestor) = current {
            if let Some(payload) = self.lookup(ancestor) {
                return Some((ancestor, payload));
            }
            current = ancestor.parent();
        }
        None
    }

    /// Ready children of `key`, for rendering finer leftovers while zooming
    /// out. Returns between zero and four tiles.
    pub fn child_fallbacks_for(&self, key: TileKey) -> Vec<(TileKey, Arc<TilePayload>)> {
        let Some(children) = key.children() else {
            return Vec::new();
        };
        children
            .into_iter()
            .filter_map(|child| self.lookup(child).map(|payload| (child, payload)))
            .collect()
    }

    /// Current table occupancy and lifetime counters.
    pub fn stats(&self) -> ManagerStats {
        let mut stats = ManagerStats {
            jobs_enqueued: self.jobs_enqueued,
            committed: self.committed,
            evicted: self.evicted,
            stale_dropped: self.stale_dropped,
            cancelled: self.cancelled,
            ..Default::default()
        };
        for tile in self.tiles.values() {
            match tile.state {
                TileState::Loading => stats.loading += 1,
                TileState::Ready => stats.ready += 1,
                TileState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    // -------------------------------------------------------------------------
    // Eviction
    // -------------------------------------------------------------------------

    /// Evicts settled tiles until the settled count fits the capacity.
    ///
    /// Loading tiles are never evicted (their job is in flight); they are
    /// bounded separately by the queue's pending limit and the worker
    /// count. Tiles in the current required set are candidates only once no
    /// settled tile outside it remains, so leftovers always give way before
    /// anything visible. Among candidates the highest rank goes first:
    /// older generations before current ones, then farthest from the
    /// viewport center, with insertion order breaking exact ties.
    fn enforce_capacity(&mut self) {
        let generation = self.generation;
        loop {
            let settled = self
                .tiles
                .values()
                .filter(|t| t.state != TileState::Loading)
                .count();
            if settled <= self.capacity {
                return;
            }

            let rank = |t: &&MapTile| (t.eviction_rank(generation), std::cmp::Reverse(t.sequence));
            let victim = self
                .tiles
                .values()
                .filter(|t| t.state != TileState::Loading && !self.required.contains(&t.key))
                .max_by_key(rank)
                .or_else(|| {
                    self.tiles
                        .values()
                        .filter(|t| t.state != TileState::Loading)
                        .max_by_key(rank)
                })
                .map(|t| t.key);

            let Some(key) = victim else { return };
            trace!(tile = %key, "evicting");
            self.tiles.remove(&key);
            self.evicted += 1;
        }
    }
}

impl std::fmt::Debug for TileManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileManager")
            .field("tiles", &self.tiles.len())
            .field("generation", &self.generation)
            .field("capacity", &self.capacity)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
