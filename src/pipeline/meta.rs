//! Derived-attribute computation.
//!
//! Computed attributes (distances, opening state, membership summaries) are
//! produced by an external computer treated as opaque and idempotent. The
//! engine's job is only to schedule it: a debounced pass over all currently
//! loaded tiles, re-run once a quiet window has passed since the last
//! registration, skipping nothing that could have changed.

use crate::core::config::LayerConfig;
use crate::data::feature::Feature;
use crate::data::relations::RelationTracker;
use crate::hierarchy::TileHierarchyMerger;
use std::sync::Arc;

/// What the computer should derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeriveOptions {
    /// Derive date-dependent attributes (always wanted; they go stale by
    /// themselves).
    pub include_dates: bool,
    /// Derive everything else. Skipped for layers whose upstream already
    /// ships precomputed attributes.
    pub include_non_dates: bool,
}

/// Contract of the derived-attribute computer (an external collaborator).
/// Implementations write results as `_`-prefixed tags and must be idempotent:
/// re-running on the same features yields the same tags.
pub trait DerivedAttributeComputer: Send + Sync {
    fn compute(
        &self,
        features: &mut Vec<Feature>,
        relations: &RelationTracker,
        layer: &LayerConfig,
        options: &DeriveOptions,
    );
}

/// Computer for deployments without derived attributes.
pub struct NoDerivedAttributes;

impl DerivedAttributeComputer for NoDerivedAttributes {
    fn compute(
        &self,
        _features: &mut Vec<Feature>,
        _relations: &RelationTracker,
        _layer: &LayerConfig,
        _options: &DeriveOptions,
    ) {
    }
}

/// Runs the computer over every tile currently loaded in the merger,
/// swapping replacement tiles in quietly so the pass does not re-trigger
/// itself through registration listeners.
pub fn rederive_layer(
    merger: &mut TileHierarchyMerger,
    relations: &RelationTracker,
    computer: &dyn DerivedAttributeComputer,
) {
    let layer = Arc::clone(merger.layer());
    let options = DeriveOptions {
        include_dates: true,
        include_non_dates: !layer.precomputed_attributes,
    };

    let tiles: Vec<_> = merger.loaded_tiles().cloned().collect();
    log::debug!(
        "re-deriving attributes for {} tiles of layer {}",
        tiles.len(),
        layer.id
    );
    for tile in tiles {
        let mut features = tile.features.as_ref().clone();
        computer.compute(&mut features, relations, &layer, &options);
        if features != *tile.features {
            merger.replace_quiet(Arc::new(tile.with_features(features)));
        }
    }
}
