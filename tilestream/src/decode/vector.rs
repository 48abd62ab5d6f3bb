//! Compact varint-encoded vector tile codec.
//!
//! Wire layout:
//!
//! ```text
//! magic "STV1"
//! varint element_count
//! per element:
//!   u8     geometry kind (0 = points, 1 = line, 2 = polygon)
//!   varint layer
//!   varint tag_count, then per tag: varint len + utf8 key, varint len + utf8 value
//!   varint part_count, then per part:
//!     varint point_count, then per point: zigzag dx, zigzag dy
//! ```
//!
//! Coordinates are tile-local pixels as signed 32-bit deltas from the
//! previous point, continuing across parts within one element and resetting
//! to the origin per element.

use super::{DecodeError, TileDecoder};
use crate::element::{GeometryKind, MapElement, Tag, TileSink};

const MAGIC: &[u8; 4] = b"STV1";

/// Sanity bound on any declared count; payloads claiming more are malformed.
const MAX_COUNT: u64 = 1 << 20;

const KIND_POINTS: u8 = 0;
const KIND_LINE: u8 = 1;
const KIND_POLYGON: u8 = 2;

/// Decoder for the compact vector tile format.
#[derive(Debug, Default, Clone, Copy)]
pub struct VectorTileDecoder;

impl VectorTileDecoder {
    pub fn new() -> Self {
        Self
    }

    fn decode_inner(data: &[u8], sink: &mut dyn TileSink) -> Result<(), DecodeError> {
        let mut r = Reader::new(data);
        if r.read_bytes(4)? != MAGIC {
            return Err(DecodeError::BadMagic);
        }

        let element_count = r.read_count()?;
        let mut elem = MapElement::new();

        for _ in 0..element_count {
            elem.clear();

            let kind = r.read_u8()?;
            let layer = r.read_varint()? as u32;
            elem.set_layer(layer);

            let tag_count = r.read_count()?;
            for _ in 0..tag_count {
                let key = r.read_string()?;
                let value = r.read_string()?;
                elem.tags.push(Tag::new(key, value));
            }

            let part_count = r.read_count()?;
            let mut x = 0i64;
            let mut y = 0i64;
            for part in 0..part_count {
                match kind {
                    KIND_POINTS => elem.start_points(),
                    KIND_LINE => elem.start_line(),
                    KIND_POLYGON if part == 0 => elem.start_polygon(),
                    KIND_POLYGON => elem.start_hole(),
                    other => return Err(DecodeError::InvalidKind(other)),
                }

                let point_count = r.read_count()?;
                for _ in 0..point_count {
                    x += r.read_zigzag()?;
                    y += r.read_zigzag()?;
                    elem.add_point(x as f32, y as f32);
                }
            }

            sink.process(&elem);
        }

        Ok(())
    }
}

impl TileDecoder for VectorTileDecoder {
    fn decode(&self, data: &[u8], sink: &mut dyn TileSink) -> Result<(), DecodeError> {
        match Self::decode_inner(data, sink) {
            Ok(()) => {
                sink.completed(true);
                Ok(())
            }
            Err(e) => {
                sink.completed(false);
                Err(e)
            }
        }
    }
}

/// Encoder for the compact vector tile format.
///
/// Used by tooling and tests to produce fixture tiles; the wire layout is
/// documented at the module level.
#[derive(Debug, Default)]
pub struct VectorTileWriter {
    body: Vec<u8>,
    element_count: u64,
}

impl VectorTileWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one element.
    pub fn add(&mut self, elem: &MapElement) {
        let kind = match elem.kind() {
            GeometryKind::Point => KIND_POINTS,
            GeometryKind::Line => KIND_LINE,
            GeometryKind::Polygon => KIND_POLYGON,
        };
        self.body.push(kind);
        write_varint(&mut self.body, elem.layer() as u64);

        write_varint(&mut self.body, elem.tags.len() as u64);
        for tag in elem.tags.iter() {
            write_string(&mut self.body, &tag.key);
            write_string(&mut self.body, &tag.value);
        }

        write_varint(&mut self.body, elem.part_count() as u64);
        let coords = elem.coords();
        let mut offset = 0usize;
        let mut px = 0i64;
        let mut py = 0i64;
        for &count in elem.parts() {
            write_varint(&mut self.body, count as u64);
            for _ in 0..count {
                let x = coords[offset].round() as i64;
                let y = coords[offset + 1].round() as i64;
                offset += 2;
                write_zigzag(&mut self.body, x - px);
                write_zigzag(&mut self.body, y - py);
                px = x;
                py = y;
            }
        }

        self.element_count += 1;
    }

    /// Assembles the final payload.
    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.body.len() + 8);
        out.extend_from_slice(MAGIC);
        write_varint(&mut out, self.element_count);
        out.extend_from_slice(&self.body);
        out
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or(DecodeError::Truncated(self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(DecodeError::Truncated(self.pos))?;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or(DecodeError::Truncated(self.pos))?;
        self.pos = end;
        Ok(slice)
    }

    fn read_varint(&mut self) -> Result<u64, DecodeError> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(DecodeError::Truncated(self.pos));
            }
        }
    }

    fn read_zigzag(&mut self) -> Result<i64, DecodeError> {
        let v = self.read_varint()?;
        Ok((v >> 1) as i64 ^ -((v & 1) as i64))
    }

    fn read_count(&mut self) -> Result<u64, DecodeError> {
        let count = self.read_varint()?;
        if count > MAX_COUNT {
            return Err(DecodeError::ImplausibleCount(count));
        }
        Ok(count)
    }

    fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_count()? as usize;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(|s| s.to_string())
            .map_err(|_| DecodeError::InvalidUtf8)
    }
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn write_zigzag(out: &mut Vec<u8>, value: i64) {
    write_varint(out, ((value << 1) ^ (value >> 63)) as u64);
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    write_varint(out, s.len() as u64);
    out.extend_from_slice(s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::test_sink::CollectSink;
    use crate::element::GeometryKind;

    fn water_polygon() -> MapElement {
        let mut e = MapElement::new();
        e.start_polygon();
        e.add_point(0.0, 0.0);
        e.add_point(256.0, 0.0);
        e.add_point(256.0, 256.0);
        e.add_point(0.0, 256.0);
        e.set_layer(0);
        e.tags.push(Tag::new("natural", "water"));
        e
    }

    fn highway_line() -> MapElement {
        let mut e = MapElement::new();
        e.start_line();
        e.add_point(0.0, 128.0);
        e.add_point(256.0, 128.0);
        e.start_line();
        e.add_point(128.0, 0.0);
        e.add_point(128.0, 256.0);
        e.set_layer(1);
        e.tags.push(Tag::new("highway", "primary"));
        e.tags.push(Tag::new("name", "Highway Rd"));
        e
    }

    fn city_point() -> MapElement {
        let mut e = MapElement::new();
        e.start_points();
        e.add_point(128.0, 128.0);
        e.set_layer(2);
        e.tags.push(Tag::new("place", "city"));
        e
    }

    fn fixture_payload() -> Vec<u8> {
        let mut w = VectorTileWriter::new();
        w.add(&water_polygon());
        w.add(&highway_line());
        w.add(&city_point());
        w.finish()
    }

    #[test]
    fn test_decode_fixture_exact_contents() {
        let payload = fixture_payload();
        let mut sink = CollectSink::default();

        VectorTileDecoder::new().decode(&payload, &mut sink).unwrap();

        assert_eq!(sink.completed, vec![true]);
        assert_eq!(sink.elements.len(), 3);

        let poly = &sink.elements[0];
        assert_eq!(poly.kind(), GeometryKind::Polygon);
        assert_eq!(poly.point_count(), 4);
        assert_eq!(poly.tags.get("natural"), Some("water"));

        let line = &sink.elements[1];
        assert_eq!(line.kind(), GeometryKind::Line);
        assert_eq!(line.part_count(), 2);
        assert_eq!(line.layer(), 1);
        assert_eq!(line.tags.get("highway"), Some("primary"));
        assert_eq!(line.tags.get("name"), Some("Highway Rd"));

        let point = &sink.elements[2];
        assert_eq!(point.kind(), GeometryKind::Point);
        assert_eq!(point.coords(), &[128.0, 128.0]);
        assert_eq!(point.tags.get("place"), Some("city"));
    }

    #[test]
    fn test_decode_preserves_coordinates() {
        let payload = fixture_payload();
        let mut sink = CollectSink::default();
        VectorTileDecoder::new().decode(&payload, &mut sink).unwrap();

        assert_eq!(
            sink.elements[0].coords(),
            &[0.0, 0.0, 256.0, 0.0, 256.0, 256.0, 0.0, 256.0]
        );
    }

    #[test]
    fn test_negative_coordinates_roundtrip() {
        // Geometry may extend past the tile edge for clean clipping.
        let mut e = MapElement::new();
        e.start_line();
        e.add_point(-32.0, -16.0);
        e.add_point(288.0, 272.0);

        let mut w = VectorTileWriter::new();
        w.add(&e);
        let payload = w.finish();

        let mut sink = CollectSink::default();
        VectorTileDecoder::new().decode(&payload, &mut sink).unwrap();
        assert_eq!(sink.elements[0].coords(), &[-32.0, -16.0, 288.0, 272.0]);
    }

    #[test]
    fn test_empty_tile_decodes_to_no_elements() {
        let payload = VectorTileWriter::new().finish();
        let mut sink = CollectSink::default();

        VectorTileDecoder::new().decode(&payload, &mut sink).unwrap();
        assert!(sink.elements.is_empty());
        assert_eq!(sink.completed, vec![true]);
    }

    #[test]
    fn test_bad_magic_fails_with_completed_false() {
        let mut payload = fixture_payload();
        payload[0] = b'X';

        let mut sink = CollectSink::default();
        let result = VectorTileDecoder::new().decode(&payload, &mut sink);

        assert!(matches!(result, Err(DecodeError::BadMagic)));
        assert_eq!(sink.completed, vec![false]);
    }

    #[test]
    fn test_truncated_payload_fails() {
        let payload = fixture_payload();
        let mut sink = CollectSink::default();

        let result = VectorTileDecoder::new().decode(&payload[..payload.len() / 2], &mut sink);
        assert!(result.is_err());
        assert_eq!(sink.completed, vec![false]);
    }

    #[test]
    fn test_implausible_count_rejected() {
        let mut payload = Vec::new();
        payload.extend_from_slice(MAGIC);
        write_varint(&mut payload, u64::MAX);

        let mut sink = CollectSink::default();
        let result = VectorTileDecoder::new().decode(&payload, &mut sink);
        assert!(matches!(result, Err(DecodeError::ImplausibleCount(_))));
    }

    #[test]
    fn test_varint_roundtrip() {
        for value in [0u64, 1, 127, 128, 300, 1 << 14, (1 << 20) - 1] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            let mut r = Reader::new(&buf);
            assert_eq!(r.read_varint().unwrap(), value);
        }
    }

    #[test]
    fn test_zigzag_roundtrip() {
        for value in [0i64, 1, -1, 63, -64, 1000, -1000, 1 << 20] {
            let mut buf = Vec::new();
            write_zigzag(&mut buf, value);
            let mut r = Reader::new(&buf);
            assert_eq!(r.read_zigzag().unwrap(), value);
        }
    }
}
