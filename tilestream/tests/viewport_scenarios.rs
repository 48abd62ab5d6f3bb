//! End-to-end viewport scenarios against a seeded on-disk tile set.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use tilestream::config::EngineConfig;
use tilestream::coord::{TileKey, Viewport};
use tilestream::decode::{DecoderKind, VectorTileWriter};
use tilestream::element::{MapElement, Tag};
use tilestream::engine::TileEngine;
use tilestream::manager::TileState;
use tilestream::pool::RetryPolicy;
use tilestream::source::{
    FetchFuture, SourceConfig, SourceError, SourceFactory, TileSource,
};

fn tile_bytes(key: TileKey) -> Vec<u8> {
    let mut elem = MapElement::new();
    elem.start_line();
    elem.add_point(0.0, 0.0);
    elem.add_point(key.x() as f32 % 256.0, key.y() as f32 % 256.0);
    elem.tags.push(Tag::new("tile", key.to_string()));

    let mut writer = VectorTileWriter::new();
    writer.add(&elem);
    writer.finish()
}

/// Writes one encoded tile under `root/z/x/y.stv`.
async fn seed_tile(root: &Path, key: TileKey) {
    let dir = root
        .join(key.zoom().to_string())
        .join(key.x().to_string());
    tokio::fs::create_dir_all(&dir).await.unwrap();
    tokio::fs::write(dir.join(format!("{}.stv", key.y())), tile_bytes(key))
        .await
        .unwrap();
}

/// Drives drain until the predicate holds, failing after a few seconds.
async fn drive_until(engine: &mut TileEngine, mut done: impl FnMut(&TileEngine) -> bool) {
    for _ in 0..5000 {
        engine.drain_completions();
        if done(engine) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("engine did not settle: {:?}", engine.stats());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cold_cache_loads_and_serves_grid() {
    let dir = tempfile::tempdir().unwrap();
    let center = TileKey::new(100, 100, 14).unwrap();
    let viewport = Viewport::new(center, 768, 768);
    for key in viewport.required_keys(256) {
        seed_tile(dir.path(), key).await;
    }

    let config = EngineConfig::default()
        .with_workers(3)
        .with_prefetch_parents(false);
    let sources = SourceConfig::directory(dir.path(), "stv");
    let mut engine = TileEngine::start(config, &sources, DecoderKind::Vector.build()).unwrap();

    let required = engine.update_viewport(viewport);
    assert_eq!(required.len(), 9);
    assert_eq!(engine.stats().manager.jobs_enqueued, 9);
    drive_until(&mut engine, |e| e.stats().manager.ready == 9).await;

    for key in viewport.required_keys(256) {
        let payload = engine.lookup(key).unwrap();
        assert_eq!(payload.element_count(), 1);
    }

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_tiles_fail_and_fall_back_to_parent() {
    let dir = tempfile::tempdir().unwrap();
    let center = TileKey::new(100, 100, 14).unwrap();
    let viewport = Viewport::new(center, 256, 256);
    // Only the parent exists on disk.
    let parent = center.parent().unwrap();
    seed_tile(dir.path(), parent).await;

    let config = EngineConfig::default()
        .with_workers(1)
        .with_prefetch_parents(true)
        .with_retry(RetryPolicy::None);
    let sources = SourceConfig::directory(dir.path(), "stv");
    let mut engine = TileEngine::start(config, &sources, DecoderKind::Vector.build()).unwrap();

    engine.update_viewport(viewport);
    drive_until(&mut engine, |e| {
        let stats = e.stats().manager;
        stats.ready == 1 && stats.failed == 1
    })
    .await;

    // The visible tile failed for the session; the prefetched parent serves
    // as the fallback payload.
    assert_eq!(engine.tile(center).unwrap().state(), TileState::Failed);
    let (ancestor, payload) = engine.fallback_for(center).unwrap();
    assert_eq!(ancestor, parent);
    assert_eq!(payload.element_count(), 1);

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pan_loads_new_edge_and_keeps_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let first = Viewport::new(TileKey::new(100, 100, 14).unwrap(), 768, 768);
    let second = Viewport::new(TileKey::new(101, 100, 14).unwrap(), 768, 768);
    for key in first.required_keys(256) {
        seed_tile(dir.path(), key).await;
    }
    for key in second.required_keys(256) {
        seed_tile(dir.path(), key).await;
    }

    let config = EngineConfig::default()
        .with_workers(2)
        .with_prefetch_parents(false);
    let sources = SourceConfig::directory(dir.path(), "stv");
    let mut engine = TileEngine::start(config, &sources, DecoderKind::Vector.build()).unwrap();

    engine.update_viewport(first);
    drive_until(&mut engine, |e| e.stats().manager.ready == 9).await;

    // One-tile pan: six tiles overlap, three are new.
    engine.update_viewport(second);
    assert_eq!(engine.stats().manager.jobs_enqueued, 12);
    drive_until(&mut engine, |e| e.stats().manager.ready >= 12).await;

    for key in second.required_keys(256) {
        assert!(engine.lookup(key).is_some());
    }

    engine.shutdown().await;
}

// =============================================================================
// Flaky source retry behavior
// =============================================================================

/// Source that fails a fixed number of times per key before succeeding.
struct FlakySource {
    failures_left: Arc<Mutex<u32>>,
}

impl TileSource for FlakySource {
    fn fetch(&mut self, key: TileKey) -> FetchFuture<'_> {
        let failures = Arc::clone(&self.failures_left);
        Box::pin(async move {
            let mut left = failures.lock();
            if *left > 0 {
                *left -= 1;
                return Err(SourceError::Http("connection reset".to_string()));
            }
            drop(left);
            Ok(Bytes::from(tile_bytes(key)))
        })
    }
}

struct FlakyFactory {
    failures_left: Arc<Mutex<u32>>,
}

impl SourceFactory for FlakyFactory {
    fn create(&self) -> Result<Box<dyn TileSource>, SourceError> {
        Ok(Box::new(FlakySource {
            failures_left: Arc::clone(&self.failures_left),
        }))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_transient_failures_recover_within_retry_budget() {
    let factory = FlakyFactory {
        failures_left: Arc::new(Mutex::new(2)),
    };
    let config = EngineConfig::default()
        .with_workers(1)
        .with_prefetch_parents(false)
        .with_retry(RetryPolicy::fixed(3, Duration::from_millis(1)));
    let mut engine = TileEngine::start(config, &factory, DecoderKind::Vector.build()).unwrap();

    let center = TileKey::new(5, 5, 6).unwrap();
    engine.update_viewport(Viewport::new(center, 256, 256));
    drive_until(&mut engine, |e| e.stats().manager.ready == 1).await;

    assert!(engine.lookup(center).is_some());
    assert_eq!(engine.stats().manager.failed, 0);

    engine.shutdown().await;
}
