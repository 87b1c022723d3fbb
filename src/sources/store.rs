//! The local persisted cache contract and its in-memory default.
//!
//! The engine consumes persistence as a key-to-blob capability; anything
//! implementing [`FeatureStore`] (browser storage, an embedded KV store, a
//! directory of files) can back it. `mark_visited` exists because an empty
//! fetch result is still a valid freshness signal.

use crate::core::constants::MEMORY_STORE_CAPACITY;
use crate::core::tiles::TileIndex;
use crate::data::feature::Feature;
use crate::freshness::Timestamp;
use crate::Result;
use fxhash::FxHashMap;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// The persisted form of one tile's features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredTile {
    pub features: Vec<Feature>,
}

/// Contract of the local persisted cache (an external collaborator).
pub trait FeatureStore: Send + Sync {
    /// The stored tile, or `None` when this `(layer, tile)` was never put.
    fn get(&self, layer: &str, index: TileIndex) -> Result<Option<StoredTile>>;

    fn put(&self, layer: &str, index: TileIndex, tile: &StoredTile) -> Result<()>;

    /// Records that a fetch covered this tile at this time, independently of
    /// whether it produced features.
    fn mark_visited(&self, layer: &str, index: TileIndex, at: Timestamp) -> Result<()>;

    /// Everything known about the layer's tile recency. Consumed once at
    /// startup to seed the freshness calculator.
    fn freshness_snapshot(&self, layer: &str) -> FxHashMap<TileIndex, Timestamp>;

    /// Tile indices with stored feature data for the layer, for replay.
    fn stored_tiles(&self, layer: &str) -> Vec<TileIndex>;
}

/// In-memory [`FeatureStore`] with an LRU bound on blob count. The default
/// for tests and deployments without durable storage.
pub struct MemoryFeatureStore {
    blobs: Mutex<LruCache<(String, TileIndex), Vec<u8>>>,
    visited: Mutex<FxHashMap<(String, TileIndex), Timestamp>>,
}

impl MemoryFeatureStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or_else(|| NonZeroUsize::new(MEMORY_STORE_CAPACITY).expect("nonzero"));
        Self {
            blobs: Mutex::new(LruCache::new(capacity)),
            visited: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(MEMORY_STORE_CAPACITY)
    }
}

impl Default for MemoryFeatureStore {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl FeatureStore for MemoryFeatureStore {
    fn get(&self, layer: &str, index: TileIndex) -> Result<Option<StoredTile>> {
        let mut blobs = match self.blobs.lock() {
            Ok(blobs) => blobs,
            Err(_) => return Err(crate::Error::Store("store lock poisoned".into()).into()),
        };
        match blobs.get(&(layer.to_string(), index)) {
            Some(blob) => Ok(Some(bincode::deserialize(blob)?)),
            None => Ok(None),
        }
    }

    fn put(&self, layer: &str, index: TileIndex, tile: &StoredTile) -> Result<()> {
        let blob = bincode::serialize(tile)?;
        if let Ok(mut blobs) = self.blobs.lock() {
            blobs.put((layer.to_string(), index), blob);
        }
        Ok(())
    }

    fn mark_visited(&self, layer: &str, index: TileIndex, at: Timestamp) -> Result<()> {
        if let Ok(mut visited) = self.visited.lock() {
            let entry = visited.entry((layer.to_string(), index)).or_insert(at);
            if *entry < at {
                *entry = at;
            }
        }
        Ok(())
    }

    fn freshness_snapshot(&self, layer: &str) -> FxHashMap<TileIndex, Timestamp> {
        match self.visited.lock() {
            Ok(visited) => visited
                .iter()
                .filter(|((l, _), _)| l == layer)
                .map(|((_, index), at)| (*index, *at))
                .collect(),
            Err(_) => FxHashMap::default(),
        }
    }

    fn stored_tiles(&self, layer: &str) -> Vec<TileIndex> {
        match self.blobs.lock() {
            Ok(blobs) => blobs
                .iter()
                .filter(|((l, _), _)| l == layer)
                .map(|((_, index), _)| *index)
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn at(seconds: u64) -> Timestamp {
        UNIX_EPOCH + Duration::from_secs(seconds)
    }

    #[test]
    fn test_put_get_round_trip() {
        let store = MemoryFeatureStore::with_default_capacity();
        let index = TileIndex::new(14, 100, 100);
        let tile = StoredTile {
            features: vec![Feature::point("node/1", 51.0, 3.7).tag("amenity", "bench")],
        };

        store.put("benches", index, &tile).unwrap();
        let loaded = store.get("benches", index).unwrap().unwrap();
        assert_eq!(loaded, tile);

        assert!(store.get("other", index).unwrap().is_none());
    }

    #[test]
    fn test_visited_marks_feed_snapshot() {
        let store = MemoryFeatureStore::with_default_capacity();
        let index = TileIndex::new(14, 100, 100);

        store.mark_visited("benches", index, at(100)).unwrap();
        // Older replays never regress the mark.
        store.mark_visited("benches", index, at(50)).unwrap();

        let snapshot = store.freshness_snapshot("benches");
        assert_eq!(snapshot.get(&index), Some(&at(100)));
        assert!(store.freshness_snapshot("other").is_empty());
    }

    #[test]
    fn test_stored_tiles_lists_per_layer() {
        let store = MemoryFeatureStore::with_default_capacity();
        let tile = StoredTile { features: vec![] };
        store.put("a", TileIndex::new(14, 1, 1), &tile).unwrap();
        store.put("b", TileIndex::new(14, 2, 2), &tile).unwrap();

        assert_eq!(store.stored_tiles("a"), vec![TileIndex::new(14, 1, 1)]);
    }

    #[test]
    fn test_lru_bound_evicts_blobs_not_marks() {
        let store = MemoryFeatureStore::new(1);
        let tile = StoredTile { features: vec![] };
        store.put("a", TileIndex::new(14, 1, 1), &tile).unwrap();
        store.put("a", TileIndex::new(14, 2, 2), &tile).unwrap();

        // Oldest blob evicted by the capacity bound.
        assert!(store.get("a", TileIndex::new(14, 1, 1)).unwrap().is_none());
        assert!(store.get("a", TileIndex::new(14, 2, 2)).unwrap().is_some());
    }
}
