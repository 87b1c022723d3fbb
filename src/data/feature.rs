use crate::core::geo::{LatLng, LatLngBounds};
use fxhash::FxHashMap;
use geo::BoundingRect;
use geo_types::{Geometry, Point};
use serde::{Deserialize, Serialize};

/// Stable external identity of a feature, e.g. `node/42` or `way/7`. Used to
/// de-duplicate the same logical feature arriving from overlapping tiles.
pub type FeatureId = String;

/// A geometry plus its tag mapping.
///
/// Derived attributes computed after the fact are written back as tags with a
/// `_` prefix, keeping upstream tags and computed ones in one namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,
    pub geometry: Geometry<f64>,
    pub tags: FxHashMap<String, String>,
}

impl Feature {
    pub fn new(id: impl Into<FeatureId>, geometry: Geometry<f64>) -> Self {
        Self {
            id: id.into(),
            geometry,
            tags: FxHashMap::default(),
        }
    }

    /// Convenience constructor for a point feature.
    pub fn point(id: impl Into<FeatureId>, lat: f64, lng: f64) -> Self {
        Self::new(id, Geometry::Point(Point::new(lng, lat)))
    }

    /// Builder-style tag insertion.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Representative location, used for tile assignment and footprint
    /// shadowing tests. The center of the geometry's bounding rectangle.
    pub fn anchor(&self) -> LatLng {
        match self.geometry.bounding_rect() {
            Some(rect) => {
                let center = rect.center();
                LatLng::new(center.y, center.x)
            }
            None => LatLng::default(),
        }
    }

    /// Axis-aligned bounds of the geometry.
    pub fn bounds(&self) -> LatLngBounds {
        match self.geometry.bounding_rect() {
            Some(rect) => LatLngBounds::from_coords(
                rect.min().y,
                rect.min().x,
                rect.max().y,
                rect.max().x,
            ),
            None => {
                let anchor = self.anchor();
                LatLngBounds::new(anchor, anchor)
            }
        }
    }

    /// True when the tag is a computed derived attribute rather than an
    /// upstream one.
    pub fn is_derived_tag(key: &str) -> bool {
        key.starts_with('_')
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo_types::{line_string, LineString};

    #[test]
    fn test_point_anchor_is_the_point() {
        let feature = Feature::point("node/1", 51.05, 3.72);
        let anchor = feature.anchor();
        assert!((anchor.lat - 51.05).abs() < 1e-9);
        assert!((anchor.lng - 3.72).abs() < 1e-9);
    }

    #[test]
    fn test_line_anchor_is_bbox_center() {
        let line: LineString<f64> = line_string![
            (x: 3.0, y: 51.0),
            (x: 4.0, y: 52.0),
        ];
        let feature = Feature::new("way/1", Geometry::LineString(line));
        let anchor = feature.anchor();
        assert!((anchor.lat - 51.5).abs() < 1e-9);
        assert!((anchor.lng - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_tags_and_derived_prefix() {
        let feature = Feature::point("node/1", 0.0, 0.0).tag("amenity", "bench");
        assert_eq!(feature.tags.get("amenity").unwrap(), "bench");
        assert!(Feature::is_derived_tag("_part_of"));
        assert!(!Feature::is_derived_tag("amenity"));
    }
}
