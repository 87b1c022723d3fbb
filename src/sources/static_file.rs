//! Static (non-tiled) file sources, re-split into tiles.
//!
//! A whole-file source is fetched once per session and its features are
//! re-split into a quadtree of tiles so they flow through the same
//! registration path as tiled data. Splitting honors the layer's clustering
//! thresholds: a tile holding more features than `max_feature_count` is
//! split further, down to `clustering.max_zoom` at the deepest.

use crate::core::config::{LayerConfig, LayerUpstream};
use crate::core::geo::TileCoord;
use crate::core::tiles::TileIndex;
use crate::data::feature::Feature;
use crate::data::geojson;
use crate::hierarchy::LoadedTile;
use crate::sources::FileFetcher;
use crate::Result;
use std::sync::Arc;

/// Loads a [`LayerUpstream::StaticFile`] layer: fetch, parse, split.
pub struct StaticFileSource {
    layer: Arc<LayerConfig>,
    url: String,
}

impl StaticFileSource {
    /// `None` when the layer is not backed by a static file.
    pub fn new(layer: Arc<LayerConfig>) -> Option<Self> {
        match &layer.upstream {
            LayerUpstream::StaticFile { url } => {
                let url = url.clone();
                Some(Self { layer, url })
            }
            _ => None,
        }
    }

    pub fn load(&self, fetcher: &dyn FileFetcher) -> Result<Vec<LoadedTile>> {
        let raw = fetcher.fetch(&self.url)?;
        let features = geojson::parse_features(&raw, &self.layer.id)?;
        log::info!(
            "loaded {} features for static layer {}",
            features.len(),
            self.layer.id
        );
        Ok(split_into_tiles(features, &self.layer))
    }
}

/// Splits a feature set into a quadtree of tiles per the layer's clustering
/// thresholds. Features are assigned to tiles by their anchor point; empty
/// branches produce no tiles.
pub fn split_into_tiles(features: Vec<Feature>, layer: &LayerConfig) -> Vec<LoadedTile> {
    let mut tiles = Vec::new();
    split_recursive(TileCoord::new(0, 0, 0), features, layer, &mut tiles);
    tiles
}

fn split_recursive(
    coord: TileCoord,
    features: Vec<Feature>,
    layer: &LayerConfig,
    out: &mut Vec<LoadedTile>,
) {
    if features.is_empty() {
        return;
    }
    let clustering = &layer.clustering;
    if features.len() <= clustering.max_feature_count || coord.z >= clustering.max_zoom {
        out.push(LoadedTile::new(
            layer.id.clone(),
            TileIndex::from_coord(&coord),
            features,
        ));
        return;
    }

    let mut buckets: [Vec<Feature>; 4] = [Vec::new(), Vec::new(), Vec::new(), Vec::new()];
    // Features whose anchor does not land in any child (clamped latitudes at
    // the poles) stay at this level.
    let mut stay = Vec::new();
    for feature in features {
        let child = TileCoord::from_lat_lng(&feature.anchor(), coord.z + 1);
        let dx = child.x.wrapping_sub(coord.x * 2);
        let dy = child.y.wrapping_sub(coord.y * 2);
        if dx < 2 && dy < 2 {
            buckets[(dy * 2 + dx) as usize].push(feature);
        } else {
            stay.push(feature);
        }
    }

    for (slot, bucket) in buckets.into_iter().enumerate() {
        let child = TileCoord::new(
            coord.x * 2 + (slot as u32 % 2),
            coord.y * 2 + (slot as u32 / 2),
            coord.z + 1,
        );
        split_recursive(child, bucket, layer, out);
    }

    if !stay.is_empty() {
        out.push(LoadedTile::new(
            layer.id.clone(),
            TileIndex::from_coord(&coord),
            stay,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ClusteringOptions;
    use crate::prelude::LatLngBounds;

    fn layer(max_feature_count: usize, max_zoom: u8) -> LayerConfig {
        LayerConfig::new(
            "parks",
            0,
            LayerUpstream::StaticFile {
                url: "https://example.com/parks.geojson".to_string(),
            },
        )
        .with_clustering(ClusteringOptions {
            max_feature_count,
            max_zoom,
        })
    }

    #[test]
    fn test_small_set_stays_in_one_tile() {
        let features = vec![
            Feature::point("a", 51.0, 3.7),
            Feature::point("b", -33.9, 151.2),
        ];
        let tiles = split_into_tiles(features, &layer(10, 16));
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].index, TileIndex::new(0, 0, 0));
        assert_eq!(tiles[0].features.len(), 2);
    }

    #[test]
    fn test_oversized_tile_splits_until_under_threshold() {
        // Two clusters far apart; threshold of 2 forces at least one split.
        let features = vec![
            Feature::point("a", 51.00, 3.70),
            Feature::point("b", 51.01, 3.71),
            Feature::point("c", -33.90, 151.20),
            Feature::point("d", -33.91, 151.21),
        ];
        let tiles = split_into_tiles(features, &layer(2, 16));
        assert!(tiles.len() >= 2);
        for tile in &tiles {
            assert!(tile.features.len() <= 2);
            // Every feature ended up in a tile containing its anchor.
            for feature in tile.features.iter() {
                assert!(tile.bounds.contains(&feature.anchor()));
            }
        }
    }

    #[test]
    fn test_max_zoom_stops_splitting() {
        // Identical anchors can never separate; the max zoom bound must
        // terminate the recursion.
        let features: Vec<_> = (0..5)
            .map(|i| Feature::point(format!("n{}", i), 51.05, 3.72))
            .collect();
        let tiles = split_into_tiles(features, &layer(2, 5));
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].index.zoom(), 5);
        assert_eq!(tiles[0].features.len(), 5);
    }

    #[test]
    fn test_split_covers_all_features() {
        let features: Vec<_> = (0..30)
            .map(|i| Feature::point(format!("n{}", i), 40.0 + i as f64 * 0.5, -70.0 + i as f64))
            .collect();
        let tiles = split_into_tiles(features, &layer(4, 16));
        let total: usize = tiles.iter().map(|t| t.features.len()).sum();
        assert_eq!(total, 30);

        // All emitted tiles intersect the world.
        let world = LatLngBounds::from_coords(-85.0, -180.0, 85.0, 180.0);
        assert!(tiles.iter().all(|t| t.bounds.intersects(&world)));
    }
}
