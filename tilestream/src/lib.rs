//! Tilestream - viewport-driven map tile streaming
//!
//! This library keeps the tiles visible in a map viewport loaded, decoded
//! and cached, with bounded memory and bounded concurrency. The owning
//! map/view component reports viewport changes; the engine schedules fetch
//! jobs by distance and zoom, runs them on a fixed worker pool against a
//! pluggable [`source::TileSource`], decodes payloads through a pluggable
//! [`decode::TileDecoder`], and commits results into the
//! [`manager::TileManager`] cache for render-side lookup.

pub mod config;
pub mod coord;
pub mod decode;
pub mod element;
pub mod engine;
pub mod manager;
pub mod pool;
pub mod scheduler;
pub mod source;

pub use config::EngineConfig;
pub use coord::{TileKey, Viewport};
pub use element::{MapElement, RasterTile, TilePayload, TileSink};
pub use engine::{EngineStats, TileEngine};
pub use manager::{TileManager, TileState};
pub use pool::RetryPolicy;
pub use source::{SourceConfig, TileSource};
