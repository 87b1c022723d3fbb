//! Layer and pipeline configuration.
//!
//! A [`LayerConfig`] identifies one thematic feature category and how it is
//! sourced; it is immutable after load and referenced (never owned) by every
//! component keyed on its id. [`PipelineOptions`] carries the process-wide
//! tuning knobs with defaults from [`crate::core::constants`].

use crate::core::constants;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identifier of a configured thematic layer.
pub type LayerId = String;

/// Where a layer's features come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LayerUpstream {
    /// Served purely from the local persisted cache; never fetched.
    LocalCache,
    /// A single non-tiled file, fetched whole and re-split into tiles.
    StaticFile { url: String },
    /// Pre-tiled file data addressed by a `{z}/{x}/{y}` URL template.
    DynamicTiles { url_template: String, zoom: u8 },
    /// The tile-oriented live API, replayed from the persisted cache at
    /// startup and kept fresh through the live and bulk query paths.
    LiveApi,
}

/// Thresholds controlling how file sources are re-split into tiles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClusteringOptions {
    /// A tile holding more features than this is split further.
    pub max_feature_count: usize,
    /// Splitting never descends below this zoom.
    pub max_zoom: u8,
}

impl Default for ClusteringOptions {
    fn default() -> Self {
        Self {
            max_feature_count: 250,
            max_zoom: 16,
        }
    }
}

/// Conjunction of `key=value` tests deciding whether a feature belongs to a
/// layer. Used to split bulk and live-API results per layer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TagMatcher(Vec<(String, String)>);

impl TagMatcher {
    /// Matcher requiring every `key=value` pair to be present.
    pub fn all<K: Into<String>, V: Into<String>>(pairs: Vec<(K, V)>) -> Self {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn matches(&self, tags: &fxhash::FxHashMap<String, String>) -> bool {
        self.0
            .iter()
            .all(|(key, value)| tags.get(key).map(|v| v == value).unwrap_or(false))
    }
}

/// Static configuration of one thematic feature layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub id: LayerId,
    /// Below this zoom the layer is neither displayed nor fetched.
    pub min_zoom: u8,
    pub upstream: LayerUpstream,
    pub clustering: ClusteringOptions,
    /// Assigns bulk/live result features to this layer. A layer without a
    /// matcher receives nothing from shared fetches, only from its own
    /// dedicated source.
    pub matcher: Option<TagMatcher>,
    /// True when the upstream already ships precomputed derived attributes,
    /// so the re-derivation pass only refreshes date-dependent ones.
    pub precomputed_attributes: bool,
}

impl LayerConfig {
    pub fn new(id: impl Into<LayerId>, min_zoom: u8, upstream: LayerUpstream) -> Self {
        Self {
            id: id.into(),
            min_zoom,
            upstream,
            clustering: ClusteringOptions::default(),
            matcher: None,
            precomputed_attributes: false,
        }
    }

    pub fn with_matcher(mut self, matcher: TagMatcher) -> Self {
        self.matcher = Some(matcher);
        self
    }

    pub fn with_clustering(mut self, clustering: ClusteringOptions) -> Self {
        self.clustering = clustering;
        self
    }

    pub fn with_precomputed_attributes(mut self) -> Self {
        self.precomputed_attributes = true;
        self
    }
}

/// Process-wide pipeline tuning. One instance per [`crate::FeaturePipeline`];
/// there are deliberately no per-layer overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Cached data older than this triggers a re-fetch.
    pub staleness_threshold: Duration,
    /// Quiet window before the derived-attribute pass re-runs.
    pub derive_debounce: Duration,
    /// Hard cap on tiles per request; oversized ranges become empty requests.
    pub max_tile_fan_out: u64,
    /// Native zoom of the live tile API.
    pub live_source_zoom: u8,
    /// Above this zoom the live API path replaces bulk queries.
    pub bulk_max_zoom: u8,
    /// Timeout handed to the bulk query service.
    pub bulk_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            staleness_threshold: constants::STALENESS_THRESHOLD,
            derive_debounce: constants::DERIVE_DEBOUNCE,
            max_tile_fan_out: constants::MAX_TILE_FAN_OUT,
            live_source_zoom: constants::LIVE_SOURCE_ZOOM,
            bulk_max_zoom: constants::BULK_MAX_ZOOM,
            bulk_timeout: constants::BULK_TIMEOUT,
        }
    }
}
