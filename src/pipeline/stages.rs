//! The fixed processing chain applied to every raw tile before registration,
//! plus the query-time visibility filter.
//!
//! The chain is an explicit ordered list of pure tile transforms with the
//! registration sink at the end, constructed once per pipeline at startup.
//! Order matters: the edit overlay runs first so every later stage sees
//! final geometry.

use crate::core::config::{LayerId, TagMatcher};
use crate::data::feature::Feature;
use crate::data::relations::RelationTracker;
use crate::hierarchy::LoadedTile;
use crate::sources::edits::EditLog;
use fxhash::{FxHashMap, FxHashSet};
use std::sync::{Arc, Mutex, PoisonError};

/// A pure `tile -> tile` transform.
pub trait TileTransform: Send + Sync {
    fn apply(&self, tile: LoadedTile) -> LoadedTile;
}

/// Replaces feature geometries changed by pending local edits.
pub struct EditOverlay {
    edits: Arc<Mutex<EditLog>>,
}

impl EditOverlay {
    pub fn new(edits: Arc<Mutex<EditLog>>) -> Self {
        Self { edits }
    }
}

impl TileTransform for EditOverlay {
    fn apply(&self, tile: LoadedTile) -> LoadedTile {
        let edits = self.edits.lock().unwrap_or_else(PoisonError::into_inner);
        if edits.is_empty() {
            return tile;
        }
        let touched = tile
            .features
            .iter()
            .any(|f| edits.geometry_for(&f.id).is_some());
        if !touched {
            return tile;
        }
        let features = tile
            .features
            .iter()
            .map(|f| match edits.geometry_for(&f.id) {
                Some(geometry) => {
                    let mut patched = f.clone();
                    patched.geometry = geometry.clone();
                    patched
                }
                None => f.clone(),
            })
            .collect();
        tile.with_features(features)
    }
}

/// Tags features with the relations they belong to, so membership-derived
/// properties come out the same regardless of which source produced the
/// feature.
pub struct RelationNormalizer {
    relations: Arc<Mutex<RelationTracker>>,
}

impl RelationNormalizer {
    pub fn new(relations: Arc<Mutex<RelationTracker>>) -> Self {
        Self { relations }
    }
}

impl TileTransform for RelationNormalizer {
    fn apply(&self, tile: LoadedTile) -> LoadedTile {
        let relations = self.relations.lock().unwrap_or_else(PoisonError::into_inner);
        if relations.is_empty() {
            return tile;
        }
        let touched = tile
            .features
            .iter()
            .any(|f| !relations.memberships_of(&f.id).is_empty());
        if !touched {
            return tile;
        }
        let features = tile
            .features
            .iter()
            .map(|f| {
                let memberships = relations.memberships_of(&f.id);
                if memberships.is_empty() {
                    return f.clone();
                }
                let mut tagged = f.clone();
                let ids: Vec<&str> = memberships
                    .iter()
                    .map(|m| m.relation_id.as_str())
                    .collect();
                tagged.tags.insert("_part_of".to_string(), ids.join(";"));
                tagged
            })
            .collect();
        tile.with_features(features)
    }
}

/// The fixed, ordered transform chain.
pub struct ProcessingPipeline {
    stages: Vec<Box<dyn TileTransform>>,
}

impl ProcessingPipeline {
    /// The standard chain: edit overlay, then relation normalization.
    pub fn standard(edits: Arc<Mutex<EditLog>>, relations: Arc<Mutex<RelationTracker>>) -> Self {
        Self {
            stages: vec![
                Box::new(EditOverlay::new(edits)),
                Box::new(RelationNormalizer::new(relations)),
            ],
        }
    }

    pub fn process(&self, tile: LoadedTile) -> LoadedTile {
        self.stages
            .iter()
            .fold(tile, |tile, stage| stage.apply(tile))
    }
}

/// User-facing visibility filters. Never baked into stored tiles: the filter
/// applies to every outgoing read and is re-evaluated whenever it is
/// consulted, so a filter change takes effect without re-registration.
#[derive(Debug, Default)]
pub struct FilterState {
    hidden_layers: FxHashSet<LayerId>,
    rules: FxHashMap<LayerId, Vec<TagMatcher>>,
}

impl FilterState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_layer_visible(&mut self, layer: &str, visible: bool) {
        if visible {
            self.hidden_layers.remove(layer);
        } else {
            self.hidden_layers.insert(layer.to_string());
        }
    }

    pub fn is_layer_visible(&self, layer: &str) -> bool {
        !self.hidden_layers.contains(layer)
    }

    /// Adds a rule; a feature must match every active rule of its layer.
    pub fn add_rule(&mut self, layer: impl Into<LayerId>, rule: TagMatcher) {
        self.rules.entry(layer.into()).or_default().push(rule);
    }

    pub fn clear_rules(&mut self, layer: &str) {
        self.rules.remove(layer);
    }

    pub fn allows(&self, layer: &str, feature: &Feature) -> bool {
        if !self.is_layer_visible(layer) {
            return false;
        }
        self.rules
            .get(layer)
            .map(|rules| rules.iter().all(|rule| rule.matches(&feature.tags)))
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tiles::TileIndex;
    use crate::data::relations::RelationMembership;
    use geo_types::{Geometry, Point};

    fn tile_with(features: Vec<Feature>) -> LoadedTile {
        LoadedTile::new("benches", TileIndex::new(14, 100, 100), features)
    }

    #[test]
    fn test_edit_overlay_replaces_geometry() {
        let edits = Arc::new(Mutex::new(EditLog::new()));
        edits
            .lock()
            .unwrap()
            .record_geometry("node/1".to_string(), Geometry::Point(Point::new(4.0, 52.0)));

        let overlay = EditOverlay::new(edits);
        let tile = tile_with(vec![
            Feature::point("node/1", 51.0, 3.7),
            Feature::point("node/2", 51.0, 3.7),
        ]);
        let patched = overlay.apply(tile);

        let anchor = patched.features[0].anchor();
        assert!((anchor.lat - 52.0).abs() < 1e-9);
        // Untouched features keep their geometry.
        let anchor = patched.features[1].anchor();
        assert!((anchor.lat - 51.0).abs() < 1e-9);
    }

    #[test]
    fn test_edit_overlay_without_edits_is_identity() {
        let edits = Arc::new(Mutex::new(EditLog::new()));
        let overlay = EditOverlay::new(edits);
        let tile = tile_with(vec![Feature::point("node/1", 51.0, 3.7)]);
        let same = overlay.apply(tile);
        assert_eq!(same.features.len(), 1);
    }

    #[test]
    fn test_relation_normalizer_tags_members() {
        let relations = Arc::new(Mutex::new(RelationTracker::new()));
        relations.lock().unwrap().record(
            "way/1".to_string(),
            RelationMembership {
                relation_id: "relation/9".to_string(),
                role: "outer".to_string(),
                relation_tags: FxHashMap::default(),
            },
        );

        let normalizer = RelationNormalizer::new(relations);
        let tile = tile_with(vec![
            Feature::point("way/1", 51.0, 3.7),
            Feature::point("way/2", 51.0, 3.7),
        ]);
        let tagged = normalizer.apply(tile);

        assert_eq!(
            tagged.features[0].tags.get("_part_of").map(String::as_str),
            Some("relation/9")
        );
        assert!(tagged.features[1].tags.get("_part_of").is_none());
    }

    #[test]
    fn test_standard_chain_runs_in_order() {
        let edits = Arc::new(Mutex::new(EditLog::new()));
        let relations = Arc::new(Mutex::new(RelationTracker::new()));
        edits
            .lock()
            .unwrap()
            .record_geometry("way/1".to_string(), Geometry::Point(Point::new(4.0, 52.0)));
        relations.lock().unwrap().record(
            "way/1".to_string(),
            RelationMembership {
                relation_id: "relation/9".to_string(),
                role: "outer".to_string(),
                relation_tags: FxHashMap::default(),
            },
        );

        let pipeline = ProcessingPipeline::standard(edits, relations);
        let processed = pipeline.process(tile_with(vec![Feature::point("way/1", 51.0, 3.7)]));

        // Both stages applied to the same feature.
        let feature = &processed.features[0];
        assert!((feature.anchor().lat - 52.0).abs() < 1e-9);
        assert!(feature.tags.contains_key("_part_of"));
    }

    #[test]
    fn test_filter_state_rules_and_visibility() {
        let mut filters = FilterState::new();
        let bench = Feature::point("node/1", 51.0, 3.7).tag("amenity", "bench");

        assert!(filters.allows("benches", &bench));

        filters.add_rule("benches", TagMatcher::all(vec![("backrest", "yes")]));
        assert!(!filters.allows("benches", &bench));

        filters.clear_rules("benches");
        filters.set_layer_visible("benches", false);
        assert!(!filters.allows("benches", &bench));

        filters.set_layer_visible("benches", true);
        assert!(filters.allows("benches", &bench));
    }
}
