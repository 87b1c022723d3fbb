//! Startup replay of the local persisted cache.
//!
//! Cached tiles are routed through the same registration path as fresh
//! fetches, so the hierarchy is queryable before any network round-trip, and
//! the store's visited marks seed the freshness calculator so already-covered
//! tiles are not re-fetched.

use crate::core::config::LayerConfig;
use crate::freshness::TileFreshnessCalculator;
use crate::hierarchy::LoadedTile;
use crate::sources::store::FeatureStore;
use std::sync::Arc;

/// Replays every persisted tile of the layer through `register`. Returns the
/// number of tiles replayed; store errors skip the tile and never abort the
/// replay.
pub fn replay_layer(
    store: &dyn FeatureStore,
    layer: &Arc<LayerConfig>,
    mut register: impl FnMut(LoadedTile),
) -> usize {
    let mut replayed = 0;
    for index in store.stored_tiles(&layer.id) {
        match store.get(&layer.id, index) {
            Ok(Some(stored)) => {
                register(LoadedTile::new(layer.id.clone(), index, stored.features));
                replayed += 1;
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!("replay of {}/{:?} failed: {}", layer.id, index, e);
            }
        }
    }
    if replayed > 0 {
        log::info!("replayed {} cached tiles for layer {}", replayed, layer.id);
    }
    replayed
}

/// Seeds the layer's freshness calculator from the store's visited marks.
pub fn seed_freshness(
    store: &dyn FeatureStore,
    layer_id: &str,
    calculator: &mut TileFreshnessCalculator,
) {
    for (index, at) in store.freshness_snapshot(layer_id) {
        calculator.record_load(index, at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::LayerUpstream;
    use crate::core::tiles::TileIndex;
    use crate::data::feature::Feature;
    use crate::sources::store::{MemoryFeatureStore, StoredTile};
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn test_replay_registers_stored_tiles() {
        let store = MemoryFeatureStore::with_default_capacity();
        let layer = Arc::new(LayerConfig::new("benches", 10, LayerUpstream::LiveApi));
        let index = TileIndex::new(14, 100, 100);
        store
            .put(
                "benches",
                index,
                &StoredTile {
                    features: vec![Feature::point("node/1", 51.0, 3.7)],
                },
            )
            .unwrap();

        let mut registered = Vec::new();
        let count = replay_layer(&store, &layer, |tile| registered.push(tile));

        assert_eq!(count, 1);
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].index, index);
        assert_eq!(registered[0].features.len(), 1);
    }

    #[test]
    fn test_seed_freshness_from_snapshot() {
        let store = MemoryFeatureStore::with_default_capacity();
        let index = TileIndex::new(14, 100, 100);
        let at = UNIX_EPOCH + Duration::from_secs(1000);
        store.mark_visited("benches", index, at).unwrap();

        let mut calculator = TileFreshnessCalculator::new();
        seed_freshness(&store, "benches", &mut calculator);
        assert_eq!(calculator.freshness_for(14, 100, 100), Some(at));
    }
}
