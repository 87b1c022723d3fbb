//! The feature pipeline: one merger and one freshness calculator per
//! configured layer, wired to every source, exposing the merged query
//! surface and the outward signals.
//!
//! All hierarchy and freshness mutation happens on the thread that calls
//! [`FeaturePipeline::set_viewport`] and [`FeaturePipeline::pump`]; worker
//! threads only ever hand results back over channels. Queries are safe at
//! any time, including while fetches are in flight, and observe only fully
//! registered tiles.

use crate::core::config::{LayerConfig, LayerId, LayerUpstream, PipelineOptions};
use crate::core::tiles::TileIndex;
use crate::core::viewport::Viewport;
use crate::core::geo::{LatLngBounds, TileCoord};
use crate::data::feature::Feature;
use crate::data::relations::RelationTracker;
use crate::events::{Debouncer, EventStream, Signal};
use crate::freshness::{is_fresh, TileFreshnessCalculator, Timestamp};
use crate::hierarchy::{LoadedTile, TileHierarchyMerger};
use crate::pipeline::meta::{rederive_layer, DerivedAttributeComputer, NoDerivedAttributes};
use crate::pipeline::stages::{FilterState, ProcessingPipeline};
use crate::query::bulk::{BulkOrchestrator, BulkQueryClient, CompletedBulk};
use crate::sources::dynamic::DynamicTileSource;
use crate::sources::edits::EditLog;
use crate::sources::live::{LiveTileBatch, LiveTileSource, TileApiClient};
use crate::sources::local;
use crate::sources::static_file::{split_into_tiles, StaticFileSource};
use crate::sources::store::{FeatureStore, MemoryFeatureStore, StoredTile};
use crate::sources::{split_per_layer, FileFetcher, HttpFetcher};
use crate::Result;
use fxhash::FxHashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

/// Emitted whenever a tile lands in a hierarchy.
#[derive(Debug, Clone)]
pub struct NewData {
    pub layer_id: LayerId,
    pub index: TileIndex,
}

/// One layer's merged hierarchy plus its freshness records.
struct LayerBundle {
    merger: TileHierarchyMerger,
    freshness: TileFreshnessCalculator,
}

/// Builder for [`FeaturePipeline`]. Clients for the live tile API and the
/// bulk query service are only required when a configured layer uses them.
pub struct FeaturePipelineBuilder {
    layers: Vec<Arc<LayerConfig>>,
    options: PipelineOptions,
    store: Option<Arc<dyn FeatureStore>>,
    bulk_client: Option<Arc<dyn BulkQueryClient>>,
    tile_client: Option<Arc<dyn TileApiClient>>,
    fetcher: Option<Arc<dyn FileFetcher>>,
    computer: Option<Arc<dyn DerivedAttributeComputer>>,
}

impl FeaturePipelineBuilder {
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            options: PipelineOptions::default(),
            store: None,
            bulk_client: None,
            tile_client: None,
            fetcher: None,
            computer: None,
        }
    }

    pub fn layer(mut self, layer: LayerConfig) -> Self {
        self.layers.push(Arc::new(layer));
        self
    }

    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(mut self, store: Arc<dyn FeatureStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn bulk_client(mut self, client: Arc<dyn BulkQueryClient>) -> Self {
        self.bulk_client = Some(client);
        self
    }

    pub fn tile_client(mut self, client: Arc<dyn TileApiClient>) -> Self {
        self.tile_client = Some(client);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn FileFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn computer(mut self, computer: Arc<dyn DerivedAttributeComputer>) -> Self {
        self.computer = Some(computer);
        self
    }

    pub fn build(self) -> Result<FeaturePipeline> {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryFeatureStore::with_default_capacity()));
        let fetcher: Arc<dyn FileFetcher> = self.fetcher.unwrap_or_else(|| Arc::new(HttpFetcher));
        let computer = self
            .computer
            .unwrap_or_else(|| Arc::new(NoDerivedAttributes) as Arc<dyn DerivedAttributeComputer>);

        let mut seen_ids = Vec::new();
        for layer in &self.layers {
            if seen_ids.contains(&layer.id) {
                return Err(
                    crate::Error::Configuration(format!("duplicate layer id {}", layer.id)).into(),
                );
            }
            seen_ids.push(layer.id.clone());
        }

        let live_layers: Vec<_> = self
            .layers
            .iter()
            .filter(|l| l.upstream == LayerUpstream::LiveApi)
            .cloned()
            .collect();
        let live = match (&self.tile_client, live_layers.is_empty()) {
            (Some(client), false) => Some(LiveTileSource::new(Arc::clone(client), live_layers)),
            (None, false) => {
                return Err(crate::Error::Configuration(
                    "live API layers configured without a tile client".into(),
                )
                .into())
            }
            _ => None,
        };

        let bulk = self
            .bulk_client
            .map(|client| BulkOrchestrator::new(client, &self.options));

        let edits = Arc::new(Mutex::new(EditLog::new()));
        let relations = Arc::new(Mutex::new(RelationTracker::new()));
        let processing = ProcessingPipeline::standard(Arc::clone(&edits), Arc::clone(&relations));

        let something_loaded = Signal::new(false);
        let new_data = EventStream::new();

        let mut bundles = FxHashMap::default();
        for layer in &self.layers {
            let mut merger = TileHierarchyMerger::new(Arc::clone(layer));
            let sender = new_data.sender();
            let loaded = something_loaded.clone();
            merger.on_register(move |tile| {
                let _ = sender.send(NewData {
                    layer_id: tile.layer_id.clone(),
                    index: tile.index,
                });
                loaded.set(true);
            });
            bundles.insert(
                layer.id.clone(),
                LayerBundle {
                    merger,
                    freshness: TileFreshnessCalculator::new(),
                },
            );
        }

        let dynamics = self
            .layers
            .iter()
            .filter_map(|layer| DynamicTileSource::new(Arc::clone(layer), Arc::clone(&fetcher)))
            .collect();

        let derive_debounce = Debouncer::new(self.options.derive_debounce);
        let mut pipeline = FeaturePipeline {
            options: self.options,
            layers: self.layers,
            store,
            bundles: Mutex::new(bundles),
            processing,
            filters: Arc::new(Mutex::new(FilterState::new())),
            edits,
            edits_revision_seen: 0,
            relations,
            computer,
            bulk,
            live,
            dynamics,
            sufficiently_zoomed: Signal::new(false),
            running_query: Signal::new(false),
            something_loaded,
            new_data,
            derive_debounce,
        };
        pipeline.bootstrap(fetcher.as_ref());
        Ok(pipeline)
    }
}

impl Default for FeaturePipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The synchronization engine: owns the per-layer hierarchies and freshness
/// records, decides when and from where to fetch, and answers merged
/// bounding-box queries.
pub struct FeaturePipeline {
    options: PipelineOptions,
    layers: Vec<Arc<LayerConfig>>,
    store: Arc<dyn FeatureStore>,
    bundles: Mutex<FxHashMap<LayerId, LayerBundle>>,
    processing: ProcessingPipeline,
    filters: Arc<Mutex<FilterState>>,
    edits: Arc<Mutex<EditLog>>,
    edits_revision_seen: u64,
    relations: Arc<Mutex<RelationTracker>>,
    computer: Arc<dyn DerivedAttributeComputer>,
    bulk: Option<BulkOrchestrator>,
    live: Option<LiveTileSource>,
    dynamics: Vec<DynamicTileSource>,
    sufficiently_zoomed: Signal<bool>,
    running_query: Signal<bool>,
    something_loaded: Signal<bool>,
    new_data: EventStream<NewData>,
    derive_debounce: Debouncer,
}

impl FeaturePipeline {
    pub fn builder() -> FeaturePipelineBuilder {
        FeaturePipelineBuilder::new()
    }

    /// Startup loading: replay persisted tiles for cache-backed layers and
    /// fetch static file layers, each routed through the ordinary
    /// registration path. Failures are logged per layer and never block the
    /// others.
    fn bootstrap(&mut self, fetcher: &dyn FileFetcher) {
        for layer in self.layers.clone() {
            match &layer.upstream {
                LayerUpstream::LiveApi | LayerUpstream::LocalCache => {
                    {
                        let mut bundles =
                            self.bundles.lock().unwrap_or_else(PoisonError::into_inner);
                        if let Some(bundle) = bundles.get_mut(&layer.id) {
                            local::seed_freshness(
                                self.store.as_ref(),
                                &layer.id,
                                &mut bundle.freshness,
                            );
                        }
                    }
                    let mut replayed = Vec::new();
                    local::replay_layer(self.store.as_ref(), &layer, |tile| replayed.push(tile));
                    for tile in replayed {
                        // Freshness was seeded from the store's visited
                        // marks; replay must not stamp cached tiles as new.
                        self.register_processed(tile, false, None);
                    }
                }
                LayerUpstream::StaticFile { .. } => {
                    if let Some(source) = StaticFileSource::new(Arc::clone(&layer)) {
                        match source.load(fetcher) {
                            Ok(tiles) => {
                                for tile in tiles {
                                    self.register_processed(tile, false, None);
                                }
                            }
                            Err(e) => {
                                log::warn!("static layer {} failed to load: {}", layer.id, e)
                            }
                        }
                    }
                }
                LayerUpstream::DynamicTiles { .. } => {}
            }
        }
    }

    /// Reacts to a viewport or zoom change: updates the derived signals,
    /// kicks the dynamic sources, and decides between the live tile API and
    /// a bulk fetch for anything stale.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        let min_zoom = self.layers.iter().map(|l| l.min_zoom).min().unwrap_or(0);
        let sufficiently = viewport.zoom_level() >= min_zoom;
        self.sufficiently_zoomed.set(sufficiently);

        let cap = self.options.max_tile_fan_out;
        for dynamic in self.dynamics.iter_mut() {
            dynamic.update_viewport(&viewport, cap);
        }

        let live_active = sufficiently && viewport.zoom > self.options.bulk_max_zoom as f64;
        if live_active && self.live.is_some() {
            let needed = self.needed_live_tiles(&viewport);
            if let Some(live) = self.live.as_mut() {
                live.request_tiles(needed);
            }
        }

        if sufficiently {
            if let Some(bulk) = &self.bulk {
                let now = SystemTime::now();
                let visible = self.visible_layers(viewport.zoom_level());
                bulk.maybe_fetch(&viewport, &visible, live_active, now, &|z, x, y| {
                    self.freshness_for_visible_layers(&visible, z, x, y)
                });
            }
        }

        self.update_running_query();
    }

    /// Drains every completion channel and applies the results: bulk fetch
    /// bookkeeping, live and dynamic tile registration, pending edit
    /// overlays, and the debounced derived-attribute pass. Call from the
    /// owning thread's event loop.
    pub fn pump(&mut self) {
        let completed = self.bulk.as_ref().and_then(|b| b.poll());
        if let Some(done) = completed {
            self.apply_bulk(done);
        }

        let batches = match self.live.as_mut() {
            Some(live) => live.poll(),
            None => Vec::new(),
        };
        for batch in batches {
            self.apply_live(batch);
        }

        let mut dynamic_tiles = Vec::new();
        for dynamic in self.dynamics.iter_mut() {
            dynamic_tiles.extend(dynamic.poll());
        }
        for tile in dynamic_tiles {
            self.register_processed(tile, false, Some(SystemTime::now()));
        }

        self.sync_edits();

        if self.derive_debounce.ready() {
            self.rederive_all();
        }

        self.update_running_query();
    }

    /// Routes a tile from a custom source through the processing chain and
    /// into its layer's hierarchy. The injection point for sources not
    /// built in.
    pub fn register_tile(&mut self, tile: LoadedTile) {
        self.register_processed(tile, false, Some(SystemTime::now()));
    }

    // ---- query surface ------------------------------------------------

    /// The merged, filtered features of one layer intersecting `bounds`.
    /// `None` when the layer id is not configured; callers must check.
    pub fn features_within(&self, layer_id: &str, bounds: &LatLngBounds) -> Option<Vec<Feature>> {
        let bundles = self.bundles.lock().unwrap_or_else(PoisonError::into_inner);
        let bundle = match bundles.get(layer_id) {
            Some(bundle) => bundle,
            None => {
                log::warn!("layer {} is not configured", layer_id);
                return None;
            }
        };
        let filters = self.filters.lock().unwrap_or_else(PoisonError::into_inner);
        Some(
            bundle
                .merger
                .features_within(bounds)
                .into_iter()
                .filter(|feature| filters.allows(layer_id, feature))
                .collect(),
        )
    }

    /// The merged, filtered features of every layer intersecting `bounds`.
    pub fn all_features_within(&self, bounds: &LatLngBounds) -> Vec<Feature> {
        let mut features = Vec::new();
        for layer in &self.layers {
            if let Some(mut layer_features) = self.features_within(&layer.id, bounds) {
                features.append(&mut layer_features);
            }
        }
        features
    }

    /// The raw loaded tiles of every layer intersecting `bounds`.
    pub fn tiles_within(&self, bounds: &LatLngBounds) -> Vec<Arc<LoadedTile>> {
        let bundles = self.bundles.lock().unwrap_or_else(PoisonError::into_inner);
        let mut tiles = Vec::new();
        for layer in &self.layers {
            if let Some(bundle) = bundles.get(&layer.id) {
                tiles.extend(bundle.merger.tiles_intersecting(bounds));
            }
        }
        tiles
    }

    // ---- outward signals ----------------------------------------------

    /// True when the viewport zoom satisfies the most permissive layer.
    pub fn sufficiently_zoomed(&self) -> Signal<bool> {
        self.sufficiently_zoomed.clone()
    }

    /// True while any fetch path (bulk, live, dynamic) is running.
    pub fn running_query(&self) -> Signal<bool> {
        self.running_query.clone()
    }

    /// Latches true on the first registered tile.
    pub fn something_loaded(&self) -> Signal<bool> {
        self.something_loaded.clone()
    }

    /// Tiles registered since the last drain.
    pub fn new_data(&self) -> Vec<NewData> {
        self.new_data.drain()
    }

    /// The user-facing visibility filters, shared with the embedding
    /// application. Changes take effect on the next query; nothing is baked
    /// into stored tiles.
    pub fn filters(&self) -> Arc<Mutex<FilterState>> {
        Arc::clone(&self.filters)
    }

    /// The pending local edit log, shared with the editing surface.
    pub fn edits(&self) -> Arc<Mutex<EditLog>> {
        Arc::clone(&self.edits)
    }

    // ---- internals ----------------------------------------------------

    /// Currently displayed layers at the given zoom: visible per the filter
    /// state and with their minimum zoom satisfied.
    fn visible_layers(&self, zoom: u8) -> Vec<Arc<LayerConfig>> {
        let filters = self.filters.lock().unwrap_or_else(PoisonError::into_inner);
        self.layers
            .iter()
            .filter(|layer| layer.min_zoom <= zoom && filters.is_layer_visible(&layer.id))
            .cloned()
            .collect()
    }

    /// The oldest freshness across the given layers for one tile, or `None`
    /// when any of them has no record (somebody needs a download).
    fn freshness_for_visible_layers(
        &self,
        layers: &[Arc<LayerConfig>],
        zoom: u8,
        x: u32,
        y: u32,
    ) -> Option<Timestamp> {
        let bundles = self.bundles.lock().unwrap_or_else(PoisonError::into_inner);
        let mut oldest: Option<Timestamp> = None;
        for layer in layers {
            let at = bundles
                .get(&layer.id)?
                .freshness
                .freshness_for(zoom, x, y)?;
            oldest = Some(match oldest {
                Some(existing) if existing <= at => existing,
                _ => at,
            });
        }
        oldest
    }

    /// Viewport tiles at the live API's native zoom still needing a fetch.
    /// An oversized range yields zero tiles, never a truncated subset.
    fn needed_live_tiles(&self, viewport: &Viewport) -> Vec<TileCoord> {
        let range = viewport.tile_range(self.options.live_source_zoom);
        if range.total() > self.options.max_tile_fan_out {
            log::warn!(
                "live tile range of {} exceeds cap {}, skipping batch",
                range.total(),
                self.options.max_tile_fan_out
            );
            return Vec::new();
        }
        let now = SystemTime::now();
        let visible = self.visible_layers(viewport.zoom_level());
        range
            .iter()
            .filter(|coord| {
                match self.freshness_for_visible_layers(&visible, coord.z, coord.x, coord.y) {
                    Some(at) if is_fresh(at, now, self.options.staleness_threshold) => {
                        log::debug!("skipping tile {:?}, decently fresh data available", coord);
                        false
                    }
                    _ => true,
                }
            })
            .collect()
    }

    /// One completed bulk fetch: record relation memberships, split the
    /// features per layer and into tiles, register everything, and stamp
    /// freshness over the covered range at the live API's native zoom (the
    /// source-of-truth granularity, independent of the check granularity).
    fn apply_bulk(&mut self, done: CompletedBulk) {
        {
            let mut relations = self.relations.lock().unwrap_or_else(PoisonError::into_inner);
            for (member, membership) in done.result.memberships {
                relations.record(member, membership);
            }
        }

        let covered: Vec<Arc<LayerConfig>> = self
            .layers
            .iter()
            .filter(|l| done.result.layers.contains(&l.id))
            .cloned()
            .collect();

        for (layer_id, features) in split_per_layer(done.result.features, &covered) {
            let layer = match covered.iter().find(|l| l.id == layer_id) {
                Some(layer) => Arc::clone(layer),
                None => continue,
            };
            for tile in split_into_tiles(features, &layer) {
                self.register_processed(tile, true, Some(done.result.completed_at));
            }
        }

        let range = crate::core::tiles::containing_tile_range(
            &done.bounds,
            self.options.live_source_zoom,
        );
        let mut bundles = self.bundles.lock().unwrap_or_else(PoisonError::into_inner);
        for coord in range.iter() {
            let index = TileIndex::from_coord(&coord);
            for layer_id in &done.result.layers {
                if let Err(e) = self
                    .store
                    .mark_visited(layer_id, index, done.result.completed_at)
                {
                    log::warn!("marking {}/{:?} visited failed: {}", layer_id, index, e);
                }
                if let Some(bundle) = bundles.get_mut(layer_id) {
                    bundle.freshness.record_load(index, done.result.completed_at);
                }
            }
        }
    }

    /// One completed live-API tile: register each layer's share and mark the
    /// tile visited for every live layer, with or without features.
    fn apply_live(&mut self, batch: LiveTileBatch) {
        let now = SystemTime::now();
        let index = TileIndex::from_coord(&batch.coord);

        for data in batch.tiles {
            let tile = LoadedTile::new(data.layer_id, index, data.features);
            self.register_processed(tile, true, Some(now));
        }

        let live_layer_ids: Vec<LayerId> = match &self.live {
            Some(live) => live.layers().iter().map(|l| l.id.clone()).collect(),
            None => return,
        };
        let mut bundles = self.bundles.lock().unwrap_or_else(PoisonError::into_inner);
        for layer_id in live_layer_ids {
            if let Err(e) = self.store.mark_visited(&layer_id, index, now) {
                log::warn!("marking {}/{:?} visited failed: {}", layer_id, index, e);
            }
            if let Some(bundle) = bundles.get_mut(&layer_id) {
                bundle.freshness.record_load(index, now);
            }
        }
    }

    /// Re-registers the per-layer pending-edit overlays when the edit log
    /// changed. New features live in one overlay tile per layer at the
    /// hierarchy root; geometry overrides reach fetched tiles through the
    /// processing chain.
    fn sync_edits(&mut self) {
        let revision = {
            let edits = self.edits.lock().unwrap_or_else(PoisonError::into_inner);
            edits.revision()
        };
        if revision == self.edits_revision_seen {
            return;
        }
        self.edits_revision_seen = revision;

        let root = TileIndex::new(0, 0, 0);
        let per_layer: Vec<(LayerId, Vec<Feature>)> = {
            let edits = self.edits.lock().unwrap_or_else(PoisonError::into_inner);
            self.layers
                .iter()
                .map(|layer| (layer.id.clone(), edits.new_features_for(&layer.id)))
                .filter(|(_, features)| !features.is_empty())
                .collect()
        };
        for (layer_id, features) in per_layer {
            let tile = LoadedTile::new(layer_id, root, features).as_overlay();
            self.register_processed(tile, false, None);
        }
    }

    /// The registration sink at the end of the processing chain.
    fn register_processed(
        &mut self,
        tile: LoadedTile,
        persist: bool,
        freshness_at: Option<Timestamp>,
    ) {
        let tile = self.processing.process(tile);
        if persist {
            let stored = StoredTile {
                features: tile.features.as_ref().clone(),
            };
            if let Err(e) = self.store.put(&tile.layer_id, tile.index, &stored) {
                log::warn!("persisting {}/{:?} failed: {}", tile.layer_id, tile.index, e);
            }
        }

        let mut bundles = self.bundles.lock().unwrap_or_else(PoisonError::into_inner);
        match bundles.get_mut(&tile.layer_id) {
            Some(bundle) => {
                if let Some(at) = freshness_at {
                    bundle.freshness.record_load(tile.index, at);
                }
                bundle.merger.register_tile(Arc::new(tile));
            }
            None => {
                log::warn!("dropping tile for unconfigured layer {}", tile.layer_id);
                return;
            }
        }
        drop(bundles);
        self.derive_debounce.note();
    }

    /// Runs the derived-attribute computer over every loaded tile.
    fn rederive_all(&mut self) {
        let relations = self.relations.lock().unwrap_or_else(PoisonError::into_inner);
        let mut bundles = self.bundles.lock().unwrap_or_else(PoisonError::into_inner);
        for bundle in bundles.values_mut() {
            rederive_layer(&mut bundle.merger, &relations, self.computer.as_ref());
        }
    }

    fn update_running_query(&self) {
        let running = self
            .bulk
            .as_ref()
            .map(|b| b.running().get())
            .unwrap_or(false)
            || self
                .live
                .as_ref()
                .map(|l| l.is_running().get())
                .unwrap_or(false)
            || self.dynamics.iter().any(|d| d.is_running());
        self.running_query.set(running);
    }
}
