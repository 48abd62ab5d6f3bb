//! Tile payload decoders
//!
//! Pluggable codecs turning raw tile bytes into decoded content through the
//! [`TileSink`](crate::element::TileSink) contract: zero or more `process` /
//! `set_raster` calls followed by exactly one terminal `completed`. Codecs
//! are selected by [`DecoderKind`], not by type hierarchy.

mod geojson;
mod raster;
mod vector;

pub use geojson::GeoJsonTileDecoder;
pub use raster::RasterTileDecoder;
pub use vector::{VectorTileDecoder, VectorTileWriter};

use std::sync::Arc;

use thiserror::Error;

use crate::element::TileSink;

/// Errors produced while decoding a tile payload.
///
/// Any decode error marks the payload malformed for the expected format; a
/// retry against the same bytes will not help, but the tile stays eligible
/// for a fresh fetch on a later viewport cycle.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload ended before the structure it promised.
    #[error("truncated payload at byte {0}")]
    Truncated(usize),

    /// Payload does not start with the expected format magic.
    #[error("bad magic bytes")]
    BadMagic,

    /// Unknown geometry kind discriminator.
    #[error("invalid geometry kind {0}")]
    InvalidKind(u8),

    /// A declared count exceeds the sanity bound for the format.
    #[error("implausible count {0}")]
    ImplausibleCount(u64),

    /// A string field is not valid UTF-8.
    #[error("invalid utf-8 in payload")]
    InvalidUtf8,

    /// GeoJSON parse or structural failure.
    #[error("geojson error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unsupported GeoJSON construct.
    #[error("unsupported geometry: {0}")]
    UnsupportedGeometry(String),

    /// Bitmap decode failure.
    #[error("image error: {0}")]
    Image(#[from] image::error::ImageError),
}

/// Pluggable per-format decoder.
///
/// `decode` must call the sink's `completed` exactly once: `completed(true)`
/// after all content was delivered, `completed(false)` before returning an
/// error.
pub trait TileDecoder: Send + Sync {
    fn decode(&self, data: &[u8], sink: &mut dyn TileSink) -> Result<(), DecodeError>;
}

/// Decoder selection, resolved to a concrete codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderKind {
    /// Compact varint-encoded vector tiles.
    Vector,
    /// GeoJSON feature collections.
    GeoJson,
    /// Bitmap tiles (PNG, JPEG, ...).
    Raster,
}

impl DecoderKind {
    /// Builds the codec for this kind.
    pub fn build(&self) -> Arc<dyn TileDecoder> {
        match self {
            DecoderKind::Vector => Arc::new(VectorTileDecoder::new()),
            DecoderKind::GeoJson => Arc::new(GeoJsonTileDecoder::new()),
            DecoderKind::Raster => Arc::new(RasterTileDecoder::new()),
        }
    }
}
