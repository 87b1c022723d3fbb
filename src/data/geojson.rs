//! GeoJSON document parsing for the file-backed sources.

use crate::data::feature::Feature;
use crate::Result;
use geo_types::{
    Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// GeoJSON geometry types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeoJsonGeometry {
    Point {
        coordinates: [f64; 2],
    },
    LineString {
        coordinates: Vec<[f64; 2]>,
    },
    Polygon {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    MultiPoint {
        coordinates: Vec<[f64; 2]>,
    },
    MultiLineString {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<[f64; 2]>>>,
    },
}

/// GeoJSON feature with geometry and properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoJsonFeature {
    pub id: Option<serde_json::Value>,
    pub geometry: Option<GeoJsonGeometry>,
    pub properties: Option<HashMap<String, serde_json::Value>>,
}

/// Root GeoJSON object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeoJson {
    Feature(GeoJsonFeature),
    FeatureCollection { features: Vec<GeoJsonFeature> },
}

fn coord(pair: [f64; 2]) -> Coord<f64> {
    Coord {
        x: pair[0],
        y: pair[1],
    }
}

fn line(coords: Vec<[f64; 2]>) -> LineString<f64> {
    LineString::from(coords.into_iter().map(coord).collect::<Vec<_>>())
}

fn polygon(rings: Vec<Vec<[f64; 2]>>) -> Polygon<f64> {
    let mut rings = rings.into_iter();
    let exterior = rings.next().map(line).unwrap_or_else(|| LineString::new(vec![]));
    Polygon::new(exterior, rings.map(line).collect())
}

impl GeoJsonGeometry {
    pub fn into_geometry(self) -> Geometry<f64> {
        match self {
            GeoJsonGeometry::Point { coordinates } => Geometry::Point(Point::from(coord(coordinates))),
            GeoJsonGeometry::LineString { coordinates } => Geometry::LineString(line(coordinates)),
            GeoJsonGeometry::Polygon { coordinates } => Geometry::Polygon(polygon(coordinates)),
            GeoJsonGeometry::MultiPoint { coordinates } => Geometry::MultiPoint(MultiPoint::from(
                coordinates.into_iter().map(|c| Point::from(coord(c))).collect::<Vec<_>>(),
            )),
            GeoJsonGeometry::MultiLineString { coordinates } => Geometry::MultiLineString(
                MultiLineString::new(coordinates.into_iter().map(line).collect()),
            ),
            GeoJsonGeometry::MultiPolygon { coordinates } => Geometry::MultiPolygon(
                MultiPolygon::new(coordinates.into_iter().map(polygon).collect()),
            ),
        }
    }
}

impl GeoJsonFeature {
    /// Converts into an engine [`Feature`]. The stable id comes from the
    /// GeoJSON `id` member, falling back to an `id` property, falling back to
    /// a synthesized `{prefix}/{ordinal}` id.
    fn into_feature(self, prefix: &str, ordinal: usize) -> Option<Feature> {
        let geometry = self.geometry?.into_geometry();
        let id = self
            .id
            .as_ref()
            .and_then(json_id)
            .or_else(|| {
                self.properties
                    .as_ref()
                    .and_then(|p| p.get("id"))
                    .and_then(json_id)
            })
            .unwrap_or_else(|| format!("{}/{}", prefix, ordinal));

        let mut feature = Feature::new(id, geometry);
        if let Some(properties) = self.properties {
            for (key, value) in properties {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                feature.tags.insert(key, value);
            }
        }
        Some(feature)
    }
}

fn json_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parses a GeoJSON document into engine features. Features without geometry
/// are dropped.
pub fn parse_features(raw: &str, id_prefix: &str) -> Result<Vec<Feature>> {
    let document: GeoJson = serde_json::from_str(raw)
        .map_err(|e| crate::Error::ParseError(format!("invalid GeoJSON: {}", e)))?;
    let features = match document {
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::FeatureCollection { features } => features,
    };
    Ok(features
        .into_iter()
        .enumerate()
        .filter_map(|(ordinal, f)| f.into_feature(id_prefix, ordinal))
        .collect())
}
