//! Pending local edits.
//!
//! Edits made locally but not yet confirmed upstream are consumed as a plain
//! feature feed: geometry overrides are applied to incoming tiles before
//! anything else sees them, and newly created features are registered per
//! layer without tile splitting (there are few of them by default).

use crate::core::config::LayerId;
use crate::data::feature::{Feature, FeatureId};
use fxhash::FxHashMap;
use geo_types::Geometry;

/// Log of local edits awaiting upstream confirmation.
#[derive(Debug, Default)]
pub struct EditLog {
    geometry_overrides: FxHashMap<FeatureId, Geometry<f64>>,
    new_features: Vec<(LayerId, Feature)>,
    revision: u64,
}

impl EditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a not-yet-synced geometry change for an existing feature.
    pub fn record_geometry(&mut self, id: FeatureId, geometry: Geometry<f64>) {
        self.geometry_overrides.insert(id, geometry);
        self.revision += 1;
    }

    /// Records a newly created feature for the given layer.
    pub fn record_new_feature(&mut self, layer: impl Into<LayerId>, feature: Feature) {
        self.new_features.push((layer.into(), feature));
        self.revision += 1;
    }

    /// The pending geometry for a feature, if any.
    pub fn geometry_for(&self, id: &str) -> Option<&Geometry<f64>> {
        self.geometry_overrides.get(id)
    }

    /// All pending new features for one layer.
    pub fn new_features_for(&self, layer: &str) -> Vec<Feature> {
        self.new_features
            .iter()
            .filter(|(l, _)| l == layer)
            .map(|(_, f)| f.clone())
            .collect()
    }

    /// Bumps on every recorded edit; the pipeline re-registers edit tiles
    /// when it observes a change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_empty(&self) -> bool {
        self.geometry_overrides.is_empty() && self.new_features.is_empty()
    }
}
