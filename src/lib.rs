//! # tilesync
//!
//! A freshness-aware synchronization engine for geospatial map features.
//!
//! Features arrive per thematic layer and per map tile from heterogeneous
//! upstream sources (a bulk spatial-query service, a tile-oriented live API,
//! static and dynamically tiled file sources, a local persisted cache, and
//! pending local edits) and are merged into a consistent, multi-resolution
//! in-memory cache that can be queried by bounding box at any time, including
//! while fetches are in flight.

pub mod core;
pub mod data;
pub mod events;
pub mod freshness;
pub mod hierarchy;
pub mod pipeline;
pub mod prelude;
pub mod query;
pub mod sources;

pub use crate::core::constants;

// Re-export public API
pub use crate::core::{
    config::{LayerConfig, LayerId, LayerUpstream, PipelineOptions},
    geo::{LatLng, LatLngBounds, TileCoord},
    tiles::{TileIndex, TileRange},
    viewport::Viewport,
};

pub use crate::data::feature::{Feature, FeatureId};

pub use crate::freshness::{TileFreshnessCalculator, Timestamp};

pub use crate::hierarchy::{LoadedTile, TileHierarchyMerger};

pub use crate::pipeline::feature_pipeline::{FeaturePipeline, FeaturePipelineBuilder};

pub use crate::events::{EventStream, Signal};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(String),

    #[error("transient fetch failure: {0}")]
    TransientFetch(String),

    #[error("invalid coordinates: {0}")]
    InvalidCoordinates(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("parse error: {0}")]
    ParseError(String),
}

/// Error type alias for convenience
pub type Error = SyncError;
