//! Core coordinate types.

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

/// Maximum supported zoom level.
pub const MAX_ZOOM: u8 = 22;

/// Errors produced by coordinate construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordError {
    /// Zoom level exceeds [`MAX_ZOOM`].
    #[error("invalid zoom level: {0}")]
    InvalidZoom(u8),

    /// x or y coordinate outside the `2^zoom` grid.
    #[error("tile ({x}, {y}) out of bounds at zoom {zoom}")]
    OutOfBounds { x: u32, y: u32, zoom: u8 },
}

/// Quadtree coordinate identifying one map tile.
///
/// Immutable value triple `(x, y, zoom)`; equality and hashing are by value
/// and this is the sole key used by the cache, scheduler and render lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    x: u32,
    y: u32,
    zoom: u8,
}

impl TileKey {
    /// Creates a tile key, validating bounds.
    ///
    /// `x` and `y` must be below `2^zoom` and `zoom` at most [`MAX_ZOOM`].
    pub fn new(x: u32, y: u32, zoom: u8) -> Result<Self, CoordError> {
        if zoom > MAX_ZOOM {
            return Err(CoordError::InvalidZoom(zoom));
        }
        let extent = Self::extent(zoom);
        if x >= extent || y >= extent {
            return Err(CoordError::OutOfBounds { x, y, zoom });
        }
        Ok(Self { x, y, zoom })
    }

    /// Number of tiles along one world axis at `zoom`.
    pub fn extent(zoom: u8) -> u32 {
        1u32 << zoom
    }

    /// Tile column.
    pub fn x(&self) -> u32 {
        self.x
    }

    /// Tile row.
    pub fn y(&self) -> u32 {
        self.y
    }

    /// Zoom level.
    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    /// The enclosing tile one zoom level up, or `None` at zoom 0.
    pub fn parent(&self) -> Option<TileKey> {
        if self.zoom == 0 {
            return None;
        }
        Some(Self {
            x: self.x >> 1,
            y: self.y >> 1,
            zoom: self.zoom - 1,
        })
    }

    /// The four covered tiles one zoom level down, or `None` at max zoom.
    pub fn children(&self) -> Option<[TileKey; 4]> {
        if self.zoom >= MAX_ZOOM {
            return None;
        }
        let (x, y, zoom) = (self.x << 1, self.y << 1, self.zoom + 1);
        Some([
            Self { x, y, zoom },
            Self { x: x + 1, y, zoom },
            Self { x, y: y + 1, zoom },
            Self { x: x + 1, y: y + 1, zoom },
        ])
    }

}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// The currently visible map region.
///
/// Expressed as a center tile plus visible pixel extents; delivered by the
/// owning map/view component on every viewport change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    /// Tile under the viewport center; its zoom is the viewport zoom.
    pub center: TileKey,
    /// Visible width in pixels.
    pub width_px: u32,
    /// Visible height in pixels.
    pub height_px: u32,
}

impl Viewport {
    /// Creates a viewport descriptor.
    pub fn new(center: TileKey, width_px: u32, height_px: u32) -> Self {
        Self {
            center,
            width_px,
            height_px,
        }
    }

    /// Zoom level of this viewport.
    pub fn zoom(&self) -> u8 {
        self.center.zoom()
    }

    /// Computes the set of tile keys needed to render this viewport.
    ///
    /// Returns the grid of keys covering the visible extent around the
    /// center tile. Columns wrap around the date line; rows outside the
    /// world are skipped. Keys are deduplicated (wrap can alias columns at
    /// low zoom) and returned row-major.
    pub fn required_keys(&self, tile_size_px: u32) -> Vec<TileKey> {
        let zoom = self.center.zoom();
        let extent = TileKey::extent(zoom) as i64;

        // Tiles needed on each side of the center tile to cover the extent.
        let half_w = Self::half_span(self.width_px, tile_size_px);
        let half_h = Self::half_span(self.height_px, tile_size_px);

        let cx = self.center.x() as i64;
        let cy = self.center.y() as i64;

        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for dy in -half_h..=half_h {
            let y = cy + dy;
            if y < 0 || y >= extent {
                continue;
            }
            for dx in -half_w..=half_w {
                let x = (cx + dx).rem_euclid(extent);
                if let Ok(key) = TileKey::new(x as u32, y as u32, zoom) {
                    if seen.insert(key) {
                        keys.push(key);
                    }
                }
            }
        }
        keys
    }

    fn half_span(span_px: u32, tile_size_px: u32) -> i64 {
        // Ceiling of (overhang / 2) / tile_size in one step, so an odd
        // overhang still claims the tile covering its half-pixel sliver.
        let remainder = span_px.saturating_sub(tile_size_px);
        remainder.div_ceil(2 * tile_size_px) as i64
    }
}
