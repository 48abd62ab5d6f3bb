//! Decoded map content and the decoder sink contract.
//!
//! A decoder turns raw tile bytes into a sequence of [`MapElement`]s (vector
//! formats) or one [`RasterTile`] (bitmap formats), delivered through a
//! [`TileSink`]. Elements handed to `process` are only valid for the duration
//! of the call - the decoder reuses its buffers immediately afterwards, so a
//! consumer must clone anything it wants to keep.

/// Geometry kind of a map element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryKind {
    /// One or more point symbols.
    Point,
    /// One or more line strings.
    Line,
    /// One or more polygon rings (first ring outer, later rings holes).
    Polygon,
}

/// One key/value attribute attached to a map element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Ordered set of tags on a map element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    tags: Vec<Tag>,
}

impl TagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tag: Tag) {
        self.tags.push(tag);
    }

    pub fn clear(&mut self) {
        self.tags.clear();
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Looks up the value for a key, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }
}

/// Reusable geometry + tags buffer yielded by decoders.
///
/// Coordinates are tile-local pixels, stored flat as `x, y` pairs. A single
/// element can hold multiple parts (line strings, polygon rings, point
/// clusters); `parts` records the number of points in each part.
///
/// Decoders keep one `MapElement` alive and `clear()` it between elements;
/// consumers clone what they keep.
#[derive(Debug, Clone, PartialEq)]
pub struct MapElement {
    kind: GeometryKind,
    layer: u32,
    coords: Vec<f32>,
    parts: Vec<u32>,
    pub tags: TagSet,
}

impl Default for MapElement {
    fn default() -> Self {
        Self::new()
    }
}

impl MapElement {
    pub fn new() -> Self {
        Self {
            kind: GeometryKind::Point,
            layer: 0,
            coords: Vec::new(),
            parts: Vec::new(),
            tags: TagSet::new(),
        }
    }

    /// Resets geometry, tags and layer for reuse.
    pub fn clear(&mut self) {
        self.coords.clear();
        self.parts.clear();
        self.tags.clear();
        self.layer = 0;
        self.kind = GeometryKind::Point;
    }

    /// Starts a new point part.
    pub fn start_points(&mut self) {
        self.kind = GeometryKind::Point;
        self.parts.push(0);
    }

    /// Starts a new line-string part.
    pub fn start_line(&mut self) {
        self.kind = GeometryKind::Line;
        self.parts.push(0);
    }

    /// Starts a new polygon outer ring.
    pub fn start_polygon(&mut self) {
        self.kind = GeometryKind::Polygon;
        self.parts.push(0);
    }

    /// Starts a hole ring in the current polygon.
    pub fn start_hole(&mut self) {
        debug_assert_eq!(self.kind, GeometryKind::Polygon);
        self.parts.push(0);
    }

    /// Appends a point to the current part.
    pub fn add_point(&mut self, x: f32, y: f32) {
        if self.parts.is_empty() {
            self.parts.push(0);
        }
        self.coords.push(x);
        self.coords.push(y);
        if let Some(last) = self.parts.last_mut() {
            *last += 1;
        }
    }

    pub fn kind(&self) -> GeometryKind {
        self.kind
    }

    pub fn layer(&self) -> u32 {
        self.layer
    }

    pub fn set_layer(&mut self, layer: u32) {
        self.layer = layer;
    }

    /// Total number of points across all parts.
    pub fn point_count(&self) -> usize {
        self.coords.len() / 2
    }

    /// Number of parts (line strings / rings / point runs).
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Point counts per part.
    pub fn parts(&self) -> &[u32] {
        &self.parts
    }

    /// Flat `x, y` coordinate pairs.
    pub fn coords(&self) -> &[f32] {
        &self.coords
    }
}

/// A decoded bitmap tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterTile {
    pub width: u32,
    pub height: u32,
    /// RGBA8 pixel data, row-major, `width * height * 4` bytes.
    pub rgba: Vec<u8>,
}

/// Owned, decoded content of one tile as committed to the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum TilePayload {
    Vector(Vec<MapElement>),
    Raster(RasterTile),
}

impl TilePayload {
    /// Number of vector elements, 0 for raster payloads.
    pub fn element_count(&self) -> usize {
        match self {
            TilePayload::Vector(elements) => elements.len(),
            TilePayload::Raster(_) => 0,
        }
    }

    pub fn is_raster(&self) -> bool {
        matches!(self, TilePayload::Raster(_))
    }
}

/// Receives decoded content from a [`TileDecoder`](crate::decode::TileDecoder).
///
/// A decoder calls `process` and/or `set_raster` zero or more times in any
/// order convenient to the format, followed by exactly one terminal
/// `completed`. The element passed to `process` must not be retained beyond
/// the call.
pub trait TileSink {
    /// Receives one decoded vector element. Valid only during the call.
    fn process(&mut self, element: &MapElement);

    /// Receives the decoded bitmap for raster formats.
    fn set_raster(&mut self, raster: RasterTile);

    /// Terminal callback; `success` is false for malformed payloads.
    fn completed(&mut self, success: bool);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_parts_and_points() {
        let mut elem = MapElement::new();
        elem.start_line();
        elem.add_point(0.0, 0.0);
        elem.add_point(10.0, 10.0);
        elem.start_line();
        elem.add_point(5.0, 5.0);

        assert_eq!(elem.kind(), GeometryKind::Line);
        assert_eq!(elem.part_count(), 2);
        assert_eq!(elem.point_count(), 3);
        assert_eq!(elem.parts(), &[2, 1]);
    }

    #[test]
    fn test_polygon_with_hole() {
        let mut elem = MapElement::new();
        elem.start_polygon();
        elem.add_point(0.0, 0.0);
        elem.add_point(100.0, 0.0);
        elem.add_point(100.0, 100.0);
        elem.start_hole();
        elem.add_point(40.0, 40.0);
        elem.add_point(60.0, 40.0);
        elem.add_point(60.0, 60.0);

        assert_eq!(elem.kind(), GeometryKind::Polygon);
        assert_eq!(elem.parts(), &[3, 3]);
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut elem = MapElement::new();
        elem.start_polygon();
        elem.add_point(1.0, 2.0);
        elem.set_layer(3);
        elem.tags.push(Tag::new("natural", "water"));

        elem.clear();

        assert_eq!(elem.point_count(), 0);
        assert_eq!(elem.part_count(), 0);
        assert_eq!(elem.layer(), 0);
        assert!(elem.tags.is_empty());
    }

    #[test]
    fn test_add_point_without_start_opens_part() {
        let mut elem = MapElement::new();
        elem.add_point(1.0, 1.0);
        assert_eq!(elem.part_count(), 1);
        assert_eq!(elem.point_count(), 1);
    }

    #[test]
    fn test_tagset_lookup() {
        let mut tags = TagSet::new();
        tags.push(Tag::new("highway", "primary"));
        tags.push(Tag::new("name", "Highway Rd"));

        assert_eq!(tags.get("highway"), Some("primary"));
        assert_eq!(tags.get("name"), Some("Highway Rd"));
        assert_eq!(tags.get("missing"), None);
        assert_eq!(tags.len(), 2);
    }

    #[test]
    fn test_payload_element_count() {
        let payload = TilePayload::Vector(vec![MapElement::new(), MapElement::new()]);
        assert_eq!(payload.element_count(), 2);
        assert!(!payload.is_raster());

        let raster = TilePayload::Raster(RasterTile {
            width: 1,
            height: 1,
            rgba: vec![0; 4],
        });
        assert_eq!(raster.element_count(), 0);
        assert!(raster.is_raster());
    }
}
