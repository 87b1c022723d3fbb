//! Prelude module for common tilesync types and traits
//!
//! Re-exports the most commonly used types, traits, and functions
//! for easy importing with `use tilesync::prelude::*;`

pub use crate::core::{
    config::{
        ClusteringOptions, LayerConfig, LayerId, LayerUpstream, PipelineOptions, TagMatcher,
    },
    geo::{LatLng, LatLngBounds, TileCoord},
    tiles::{containing_tile_range, TileIndex, TileRange},
    viewport::Viewport,
};

pub use crate::data::{
    feature::{Feature, FeatureId},
    relations::{RelationMembership, RelationTracker},
};

pub use crate::events::{Debouncer, EventStream, Signal};

pub use crate::freshness::{is_fresh, TileFreshnessCalculator, Timestamp};

pub use crate::hierarchy::{LoadedTile, TileHierarchyMerger};

pub use crate::pipeline::{
    feature_pipeline::{FeaturePipeline, FeaturePipelineBuilder, NewData},
    meta::{DeriveOptions, DerivedAttributeComputer, NoDerivedAttributes},
    stages::{FilterState, ProcessingPipeline, TileTransform},
};

pub use crate::query::bulk::{BulkOrchestrator, BulkQueryClient, BulkQueryResult};

pub use crate::sources::{
    edits::EditLog,
    live::{LayerTileData, LiveTileSource, TileApiClient},
    store::{FeatureStore, MemoryFeatureStore, StoredTile},
    FileFetcher, HttpFetcher,
};

pub use crate::{Error as SyncError, Result};

pub use std::{
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

pub use fxhash::{FxHashMap as HashMap, FxHashSet as HashSet};
