//! The per-layer tile hierarchy: every loaded tile across all zoom levels,
//! queryable as a merged view at any time.

use crate::core::config::{LayerConfig, LayerId};
use crate::core::geo::LatLngBounds;
use crate::core::tiles::TileIndex;
use crate::data::feature::Feature;
use fxhash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// The result of one fetch for one `(layer, tile)`: the features plus their
/// provenance. Immutable once registered; replacements are new values so
/// concurrent query callers never observe a half-updated tile.
#[derive(Debug, Clone)]
pub struct LoadedTile {
    pub layer_id: LayerId,
    pub index: TileIndex,
    pub features: Arc<Vec<Feature>>,
    pub bounds: LatLngBounds,
    /// An overlay tile sits outside the zoom hierarchy: its features are
    /// never shadowed by finer tiles. Used for pending local edits, which
    /// are newer than anything fetched.
    pub overlay: bool,
}

impl LoadedTile {
    pub fn new(layer_id: impl Into<LayerId>, index: TileIndex, features: Vec<Feature>) -> Self {
        Self {
            layer_id: layer_id.into(),
            index,
            features: Arc::new(features),
            bounds: index.bounds(),
            overlay: false,
        }
    }

    pub fn as_overlay(mut self) -> Self {
        self.overlay = true;
        self
    }

    /// A replacement tile with the same provenance and new features.
    pub fn with_features(&self, features: Vec<Feature>) -> Self {
        Self {
            layer_id: self.layer_id.clone(),
            index: self.index,
            features: Arc::new(features),
            bounds: self.bounds.clone(),
            overlay: self.overlay,
        }
    }
}

type TileListener = Box<dyn FnMut(&Arc<LoadedTile>) + Send>;

/// Owns one layer's loaded tiles across all zoom levels and answers merged
/// bounding-box queries over them.
pub struct TileHierarchyMerger {
    layer: Arc<LayerConfig>,
    loaded: FxHashMap<TileIndex, Arc<LoadedTile>>,
    listeners: Vec<TileListener>,
}

impl TileHierarchyMerger {
    pub fn new(layer: Arc<LayerConfig>) -> Self {
        Self {
            layer,
            loaded: FxHashMap::default(),
            listeners: Vec::new(),
        }
    }

    pub fn layer(&self) -> &Arc<LayerConfig> {
        &self.layer
    }

    /// Registers a callback run after every [`TileHierarchyMerger::register_tile`],
    /// used for downstream side effects such as persistence.
    pub fn on_register(&mut self, listener: impl FnMut(&Arc<LoadedTile>) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Inserts or replaces the entry for the tile's index and fans out to
    /// listeners. Duplicate indices are not rejected: the last write wins,
    /// which is what re-fetch and refresh rely on.
    pub fn register_tile(&mut self, tile: Arc<LoadedTile>) {
        self.loaded.insert(tile.index, Arc::clone(&tile));
        for listener in self.listeners.iter_mut() {
            listener(&tile);
        }
    }

    /// Swaps a replacement tile in without notifying listeners. Used by the
    /// derived-attribute pass, which must not re-trigger itself.
    pub(crate) fn replace_quiet(&mut self, tile: Arc<LoadedTile>) {
        self.loaded.insert(tile.index, tile);
    }

    pub fn loaded_tiles(&self) -> impl Iterator<Item = &Arc<LoadedTile>> {
        self.loaded.values()
    }

    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    /// Every loaded tile whose footprint intersects `bounds`, across all zoom
    /// levels. Recomputed fresh on each call; the cache is the loaded-tile
    /// map, not the query result.
    pub fn tiles_intersecting(&self, bounds: &LatLngBounds) -> Vec<Arc<LoadedTile>> {
        self.loaded
            .values()
            .filter(|tile| tile.bounds.intersects(bounds))
            .cloned()
            .collect()
    }

    /// The merged, de-duplicated feature view over `bounds`.
    ///
    /// Finer tiles win within their footprint: features are emitted finest
    /// zoom first, duplicates (by feature id) are dropped, and a coarser
    /// tile's feature is suppressed when its anchor lies inside an
    /// already-emitted strictly finer tile. Two distinct tiles at the same
    /// zoom never shadow each other; re-registration at the same index is
    /// last-write-wins.
    pub fn features_within(&self, bounds: &LatLngBounds) -> Vec<Feature> {
        let mut tiles = self.tiles_intersecting(bounds);
        // Overlay tiles first, then finest zoom first.
        tiles.sort_by(|a, b| {
            b.overlay
                .cmp(&a.overlay)
                .then_with(|| b.index.zoom().cmp(&a.index.zoom()))
                .then_with(|| a.index.cmp(&b.index))
        });

        let mut seen: FxHashSet<&str> = FxHashSet::default();
        let mut finer: Vec<(u8, &LatLngBounds)> = Vec::new();
        let mut merged = Vec::new();

        for tile in &tiles {
            let zoom = tile.index.zoom();
            for feature in tile.features.iter() {
                if !seen.insert(feature.id.as_str()) {
                    continue;
                }
                if !tile.overlay {
                    let anchor = feature.anchor();
                    if finer
                        .iter()
                        .any(|(z, footprint)| *z > zoom && footprint.contains(&anchor))
                    {
                        continue;
                    }
                }
                merged.push(feature.clone());
            }
            if !tile.overlay {
                finer.push((zoom, &tile.bounds));
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{LayerConfig, LayerUpstream};
    use crate::core::geo::TileCoord;

    fn layer() -> Arc<LayerConfig> {
        Arc::new(LayerConfig::new("benches", 10, LayerUpstream::LiveApi))
    }

    fn tile_at(z: u8, x: u32, y: u32, features: Vec<Feature>) -> Arc<LoadedTile> {
        Arc::new(LoadedTile::new("benches", TileIndex::new(z, x, y), features))
    }

    /// A point feature placed at the center of the given tile.
    fn feature_in_tile(id: &str, z: u8, x: u32, y: u32) -> Feature {
        let center = TileCoord::new(x, y, z).bounds().center();
        Feature::point(id, center.lat, center.lng)
    }

    #[test]
    fn test_register_and_query() {
        let mut merger = TileHierarchyMerger::new(layer());
        let tile = tile_at(14, 100, 100, vec![feature_in_tile("node/1", 14, 100, 100)]);
        merger.register_tile(Arc::clone(&tile));

        let hits = merger.tiles_intersecting(&tile.bounds);
        assert_eq!(hits.len(), 1);
        assert_eq!(merger.features_within(&tile.bounds).len(), 1);
    }

    #[test]
    fn test_registration_is_idempotent() {
        let mut merger = TileHierarchyMerger::new(layer());
        let tile = tile_at(14, 100, 100, vec![feature_in_tile("node/1", 14, 100, 100)]);
        merger.register_tile(Arc::clone(&tile));
        merger.register_tile(Arc::clone(&tile));

        assert_eq!(merger.len(), 1);
        assert_eq!(merger.features_within(&tile.bounds).len(), 1);
    }

    #[test]
    fn test_last_write_wins_per_index() {
        let mut merger = TileHierarchyMerger::new(layer());
        merger.register_tile(tile_at(14, 100, 100, vec![feature_in_tile("node/1", 14, 100, 100)]));
        merger.register_tile(tile_at(14, 100, 100, vec![feature_in_tile("node/2", 14, 100, 100)]));

        let bounds = TileIndex::new(14, 100, 100).bounds();
        let merged = merger.features_within(&bounds);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "node/2");
    }

    #[test]
    fn test_finer_tile_wins_for_same_identity() {
        let mut merger = TileHierarchyMerger::new(layer());
        // Coarse tile covering area A with the original feature.
        let coarse = tile_at(10, 6, 6, vec![feature_in_tile("node/1", 14, 100, 100)]);
        // Finer tile covering a sub-area with the updated same-identity
        // feature. (14, 100, 100) descends from (10, 6, 6).
        let updated =
            feature_in_tile("node/1", 14, 100, 100).tag("updated", "yes");
        let fine = tile_at(14, 100, 100, vec![updated]);

        merger.register_tile(coarse);
        merger.register_tile(fine);

        let area = TileIndex::new(10, 6, 6).bounds();
        let merged = merger.features_within(&area);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].tags.get("updated").map(String::as_str), Some("yes"));
    }

    #[test]
    fn test_finer_footprint_shadows_coarser_features() {
        let mut merger = TileHierarchyMerger::new(layer());
        // The coarse feature sits inside the finer tile's footprint but the
        // finer tile no longer carries it: the area was re-fetched and the
        // feature is gone upstream.
        let coarse = tile_at(10, 6, 6, vec![feature_in_tile("node/gone", 14, 100, 100)]);
        let fine = tile_at(14, 100, 100, vec![feature_in_tile("node/new", 14, 100, 100)]);

        merger.register_tile(coarse);
        merger.register_tile(fine);

        let area = TileIndex::new(10, 6, 6).bounds();
        let ids: Vec<_> = merger
            .features_within(&area)
            .into_iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(ids, vec!["node/new".to_string()]);
    }

    #[test]
    fn test_coarse_features_outside_finer_footprint_survive() {
        let mut merger = TileHierarchyMerger::new(layer());
        // (14, 100, 100) and (14, 101, 101) both descend from (10, 6, 6) but
        // only one of them is re-fetched at the finer zoom.
        let coarse = tile_at(
            10,
            6,
            6,
            vec![
                feature_in_tile("node/inside", 14, 100, 100),
                feature_in_tile("node/outside", 14, 101, 101),
            ],
        );
        let fine = tile_at(14, 100, 100, vec![feature_in_tile("node/fresh", 14, 100, 100)]);

        merger.register_tile(coarse);
        merger.register_tile(fine);

        let area = TileIndex::new(10, 6, 6).bounds();
        let mut ids: Vec<_> = merger
            .features_within(&area)
            .into_iter()
            .map(|f| f.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["node/fresh".to_string(), "node/outside".to_string()]);
    }

    #[test]
    fn test_same_zoom_neighbors_do_not_shadow() {
        let mut merger = TileHierarchyMerger::new(layer());
        merger.register_tile(tile_at(14, 100, 100, vec![feature_in_tile("node/a", 14, 100, 100)]));
        merger.register_tile(tile_at(14, 100, 101, vec![feature_in_tile("node/b", 14, 100, 101)]));

        let area = TileIndex::new(14, 100, 100)
            .bounds()
            .union(&TileIndex::new(14, 100, 101).bounds());
        assert_eq!(merger.features_within(&area).len(), 2);
    }

    #[test]
    fn test_listener_fan_out() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);

        let mut merger = TileHierarchyMerger::new(layer());
        merger.on_register(move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        merger.register_tile(tile_at(14, 100, 100, vec![]));
        merger.register_tile(tile_at(14, 100, 101, vec![]));
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        // Quiet replacement does not fan out.
        merger.replace_quiet(tile_at(14, 100, 100, vec![]));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_overlay_tiles_escape_footprint_shadowing() {
        let mut merger = TileHierarchyMerger::new(layer());
        // A pending-edit overlay at the hierarchy root, plus a fine fetched
        // tile covering the edit's location but not carrying it.
        let edit = Arc::new(
            LoadedTile::new(
                "benches",
                TileIndex::new(0, 0, 0),
                vec![feature_in_tile("node/-1", 14, 100, 100)],
            )
            .as_overlay(),
        );
        let fine = tile_at(14, 100, 100, vec![feature_in_tile("node/1", 14, 100, 100)]);

        merger.register_tile(edit);
        merger.register_tile(fine);

        let area = TileIndex::new(14, 100, 100).bounds();
        let mut ids: Vec<_> = merger
            .features_within(&area)
            .into_iter()
            .map(|f| f.id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["node/-1".to_string(), "node/1".to_string()]);
    }

    #[test]
    fn test_query_misses_return_empty() {
        let mut merger = TileHierarchyMerger::new(layer());
        merger.register_tile(tile_at(14, 100, 100, vec![feature_in_tile("node/1", 14, 100, 100)]));

        let far_away = TileIndex::new(14, 9000, 9000).bounds();
        assert!(merger.tiles_intersecting(&far_away).is_empty());
        assert!(merger.features_within(&far_away).is_empty());
    }
}
