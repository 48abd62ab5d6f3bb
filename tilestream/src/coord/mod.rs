//! Tile coordinates and viewport geometry
//!
//! Provides the [`TileKey`] quadtree coordinate used as the sole cache and
//! lookup key, the [`Viewport`] descriptor reported by the owning map/view
//! component, and the shared distance scoring used for both job priority and
//! cache eviction ranking.

mod types;

pub use types::{CoordError, TileKey, Viewport, MAX_ZOOM};

/// Weight of one zoom level of mismatch in the priority score.
///
/// A tile one zoom level away from the viewport zoom always ranks below any
/// tile at the current zoom, regardless of screen distance.
pub const ZOOM_WEIGHT: u64 = 1 << 24;

/// Sub-tile resolution of the distance term: one tile of squared distance
/// contributes this much score.
const DIST_SCALE: f64 = 16.0;

/// Cap on the distance term, keeping it strictly below [`ZOOM_WEIGHT`] so
/// zoom mismatch stays dominant at any distance.
const DIST_CAP: u64 = ZOOM_WEIGHT - 1;

/// Computes the scheduling score for a tile relative to a viewport.
///
/// Lower scores are served first. The score combines the zoom-level delta
/// to the viewport zoom (dominant term) with the squared distance between
/// tile centers, measured in tile units at the key's zoom level so that
/// neighbouring tiles stay distinguishable at every zoom. The score is
/// computed once at enqueue time and recomputed in place when the viewport
/// moves.
pub fn priority_score(key: TileKey, viewport: &Viewport) -> u64 {
    let kz = key.zoom();
    let cz = viewport.center.zoom();
    let dz = (kz as i32 - cz as i32).unsigned_abs() as u64;

    // Viewport center projected into the key's zoom level, in tile units.
    let factor = f64::from(kz as i32 - cz as i32).exp2();
    let cx = (viewport.center.x() as f64 + 0.5) * factor;
    let cy = (viewport.center.y() as f64 + 0.5) * factor;

    // Horizontal distance wraps around the date line.
    let extent = TileKey::extent(kz) as f64;
    let mut dx = (key.x() as f64 + 0.5 - cx).abs();
    if dx > extent / 2.0 {
        dx = extent - dx;
    }
    let dy = key.y() as f64 + 0.5 - cy;
    let dist_sq = dx * dx + dy * dy;

    let dist = ((dist_sq * DIST_SCALE) as u64).min(DIST_CAP);
    dz.saturating_mul(ZOOM_WEIGHT).saturating_add(dist)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_tile_scores_zero_distance() {
        let center = TileKey::new(8, 8, 4).unwrap();
        let viewport = Viewport::new(center, 256, 256);
        assert_eq!(priority_score(center, &viewport), 0);
    }

    #[test]
    fn test_closer_tile_scores_lower() {
        let center = TileKey::new(100, 100, 10).unwrap();
        let viewport = Viewport::new(center, 768, 768);

        let near = TileKey::new(101, 100, 10).unwrap();
        let far = TileKey::new(110, 100, 10).unwrap();

        assert!(priority_score(near, &viewport) < priority_score(far, &viewport));
    }

    #[test]
    fn test_zoom_delta_dominates_distance() {
        let center = TileKey::new(100, 100, 10).unwrap();
        let viewport = Viewport::new(center, 768, 768);

        // A far tile at the current zoom still ranks above the parent tile.
        let far_same_zoom = TileKey::new(900, 900, 10).unwrap();
        let parent = center.parent().unwrap();

        assert!(priority_score(far_same_zoom, &viewport) < priority_score(parent, &viewport));
    }

    #[test]
    fn test_high_zoom_neighbours_score_distinct() {
        // Distance is measured in tile units, so a 3x3 grid at a deep zoom
        // still orders centre < edge < corner instead of collapsing to 0.
        let center = TileKey::new(8800, 5373, 14).unwrap();
        let viewport = Viewport::new(center, 768, 768);

        let edge = TileKey::new(8801, 5373, 14).unwrap();
        let corner = TileKey::new(8801, 5374, 14).unwrap();

        assert_eq!(priority_score(center, &viewport), 0);
        assert!(priority_score(edge, &viewport) > 0);
        assert!(priority_score(edge, &viewport) < priority_score(corner, &viewport));
    }

    #[test]
    fn test_date_line_wrap_distance() {
        // Tiles on opposite edges of the world are neighbours across the
        // date line, not a whole world apart.
        let west = TileKey::new(0, 8, 4).unwrap();
        let east = TileKey::new(15, 8, 4).unwrap();
        let middle = TileKey::new(8, 8, 4).unwrap();

        let viewport = Viewport::new(west, 768, 768);
        assert!(priority_score(east, &viewport) < priority_score(middle, &viewport));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_score_monotonic_in_zoom_delta(
                x in 0u32..1024,
                y in 0u32..1024,
                zoom in 10u8..=14
            ) {
                let center = TileKey::new(x, y, zoom)?;
                let viewport = Viewport::new(center, 768, 768);

                let here = priority_score(center, &viewport);
                let parent = center.parent().unwrap();
                let up = priority_score(parent, &viewport);

                prop_assert!(here < up, "same-zoom tile must outrank its parent");
            }

            #[test]
            fn test_score_zero_only_at_center(
                x in 0u32..1024,
                y in 0u32..1024,
                dx in 1u32..32,
                zoom in 10u8..=14
            ) {
                let center = TileKey::new(x, y, zoom)?;
                let other = TileKey::new((x + dx) % (1 << zoom), y, zoom)?;
                let viewport = Viewport::new(center, 768, 768);

                prop_assert_eq!(priority_score(center, &viewport), 0);
                prop_assert!(priority_score(other, &viewport) > 0);
            }
        }
    }
}
