//! GeoJSON feature collection decoder.

use serde::Deserialize;
use serde_json::Value;

use super::{DecodeError, TileDecoder};
use crate::element::{MapElement, Tag, TileSink};

#[derive(Deserialize)]
struct FeatureCollection {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Deserialize)]
struct Feature {
    geometry: Option<Geometry>,
    #[serde(default)]
    properties: Option<serde_json::Map<String, Value>>,
}

#[derive(Deserialize)]
struct Geometry {
    #[serde(rename = "type")]
    kind: String,
    coordinates: Value,
}

/// Decoder for GeoJSON feature collections.
///
/// Coordinates are taken as already tile-local; scalar properties become
/// tags, nested properties are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct GeoJsonTileDecoder;

impl GeoJsonTileDecoder {
    pub fn new() -> Self {
        Self
    }

    fn decode_inner(data: &[u8], sink: &mut dyn TileSink) -> Result<(), DecodeError> {
        let collection: FeatureCollection = serde_json::from_slice(data)?;
        if collection.kind != "FeatureCollection" {
            return Err(DecodeError::UnsupportedGeometry(collection.kind));
        }

        let mut elem = MapElement::new();
        for feature in &collection.features {
            let Some(geometry) = &feature.geometry else {
                continue;
            };

            elem.clear();
            if let Some(properties) = &feature.properties {
                for (key, value) in properties {
                    if let Some(text) = scalar_to_string(value) {
                        elem.tags.push(Tag::new(key.clone(), text));
                    }
                }
            }

            decode_geometry(geometry, &mut elem)?;
            sink.process(&elem);
        }

        Ok(())
    }
}

impl TileDecoder for GeoJsonTileDecoder {
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

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn decode_geometry(geometry: &Geometry, elem: &mut MapElement) -> Result<(), DecodeError> {
    let coords = &geometry.coordinates;
    match geometry.kind.as_str() {
        "Point" => {
            elem.start_points();
            let (x, y) = position(coords)?;
            elem.add_point(x, y);
        }
        "MultiPoint" => {
            elem.start_points();
            for p in array(coords)? {
                let (x, y) = position(p)?;
                elem.add_point(x, y);
            }
        }
        "LineString" => {
            line(coords, elem)?;
        }
        "MultiLineString" => {
            for part in array(coords)? {
                line(part, elem)?;
            }
        }
        "Polygon" => {
            polygon(coords, elem)?;
        }
        "MultiPolygon" => {
            for poly in array(coords)? {
                polygon(poly, elem)?;
            }
        }
        other => return Err(DecodeError::UnsupportedGeometry(other.to_string())),
    }
    Ok(())
}

fn line(coords: &Value, elem: &mut MapElement) -> Result<(), DecodeError> {
    elem.start_line();
    for p in array(coords)? {
        let (x, y) = position(p)?;
        elem.add_point(x, y);
    }
    Ok(())
}

fn polygon(rings: &Value, elem: &mut MapElement) -> Result<(), DecodeError> {
    for (i, ring) in array(rings)?.iter().enumerate() {
        if i == 0 {
            elem.start_polygon();
        } else {
            elem.start_hole();
        }
        for p in array(ring)? {
            let (x, y) = position(p)?;
            elem.add_point(x, y);
        }
    }
    Ok(())
}

fn array(value: &Value) -> Result<&Vec<Value>, DecodeError> {
    value
        .as_array()
        .ok_or_else(|| DecodeError::UnsupportedGeometry("expected coordinate array".to_string()))
}

fn position(value: &Value) -> Result<(f32, f32), DecodeError> {
    let pair = array(value)?;
    let (Some(x), Some(y)) = (
        pair.first().and_then(Value::as_f64),
        pair.get(1).and_then(Value::as_f64),
    ) else {
        return Err(DecodeError::UnsupportedGeometry(
            "expected [x, y] position".to_string(),
        ));
    };
    Ok((x as f32, y as f32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::test_sink::CollectSink;
    use crate::element::GeometryKind;

    const FIXTURE: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [128.0, 128.0] },
                "properties": { "place": "city", "population": 120000 }
            },
            {
                "type": "Feature",
                "geometry": {
                    "type": "LineString",
                    "coordinates": [[0, 128], [256, 128]]
                },
                "properties": { "highway": "primary", "oneway": true }
            },
            {
                "type": "Feature",
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [
                        [[0, 0], [256, 0], [256, 256], [0, 256], [0, 0]],
                        [[64, 64], [192, 64], [192, 192], [64, 192], [64, 64]]
                    ]
                },
                "properties": { "natural": "water" }
            }
        ]
    }"#;

    #[test]
    fn test_decode_fixture_collection() {
        let mut sink = CollectSink::default();
        GeoJsonTileDecoder::new()
            .decode(FIXTURE.as_bytes(), &mut sink)
            .unwrap();

        assert_eq!(sink.completed, vec![true]);
        assert_eq!(sink.elements.len(), 3);

        let point = &sink.elements[0];
        assert_eq!(point.kind(), GeometryKind::Point);
        assert_eq!(point.tags.get("place"), Some("city"));
        assert_eq!(point.tags.get("population"), Some("120000"));

        let line = &sink.elements[1];
        assert_eq!(line.kind(), GeometryKind::Line);
        assert_eq!(line.point_count(), 2);
        assert_eq!(line.tags.get("oneway"), Some("true"));

        let poly = &sink.elements[2];
        assert_eq!(poly.kind(), GeometryKind::Polygon);
        assert_eq!(poly.part_count(), 2);
        assert_eq!(poly.parts(), &[5, 5]);
        assert_eq!(poly.tags.get("natural"), Some("water"));
    }

    #[test]
    fn test_feature_without_geometry_is_skipped() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "geometry": null, "properties": {} }
            ]
        }"#;

        let mut sink = CollectSink::default();
        GeoJsonTileDecoder::new()
            .decode(json.as_bytes(), &mut sink)
            .unwrap();
        assert!(sink.elements.is_empty());
        assert_eq!(sink.completed, vec![true]);
    }

    #[test]
    fn test_malformed_json_fails_with_completed_false() {
        let mut sink = CollectSink::default();
        let result = GeoJsonTileDecoder::new().decode(b"{not json", &mut sink);

        assert!(matches!(result, Err(DecodeError::Json(_))));
        assert_eq!(sink.completed, vec![false]);
    }

    #[test]
    fn test_non_collection_rejected() {
        let json = r#"{ "type": "Feature", "features": [] }"#;
        let mut sink = CollectSink::default();
        let result = GeoJsonTileDecoder::new().decode(json.as_bytes(), &mut sink);
        assert!(matches!(result, Err(DecodeError::UnsupportedGeometry(_))));
    }

    #[test]
    fn test_unknown_geometry_kind_rejected() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "geometry": { "type": "Curve", "coordinates": [] },
                    "properties": {}
                }
            ]
        }"#;

        let mut sink = CollectSink::default();
        let result = GeoJsonTileDecoder::new().decode(json.as_bytes(), &mut sink);
        assert!(matches!(result, Err(DecodeError::UnsupportedGeometry(_))));
        assert_eq!(sink.completed, vec![false]);
    }

    #[test]
    fn test_multipolygon_parts() {
        let json = r#"{
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "geometry": {
                        "type": "MultiPolygon",
                        "coordinates": [
                            [[[0, 0], [10, 0], [10, 10], [0, 0]]],
                            [[[20, 20], [30, 20], [30, 30], [20, 20]]]
                        ]
                    },
                    "properties": {}
                }
            ]
        }"#;

        let mut sink = CollectSink::default();
        GeoJsonTileDecoder::new()
            .decode(json.as_bytes(), &mut sink)
            .unwrap();
        assert_eq!(sink.elements[0].part_count(), 2);
        assert_eq!(sink.elements[0].kind(), GeometryKind::Polygon);
    }
}
