//! Dynamically tiled file sources.
//!
//! Some file-backed layers are already tiled upstream and addressed by a
//! `{z}/{x}/{y}` URL template. On every viewport change the source computes
//! the covering tile range at its native zoom and fetches the tiles it has
//! not seen this session, each on a detached worker thread.

use crate::core::config::{LayerConfig, LayerUpstream};
use crate::core::geo::TileCoord;
use crate::core::tiles::TileIndex;
use crate::core::viewport::Viewport;
use crate::data::feature::Feature;
use crate::data::geojson;
use crate::hierarchy::LoadedTile;
use crate::sources::FileFetcher;
use crossbeam_channel::{unbounded, Receiver, Sender};
use fxhash::FxHashSet;
use std::sync::Arc;
use std::thread;

type FetchOutcome = (TileIndex, std::result::Result<Vec<Feature>, String>);

/// Fetches pre-tiled file data for one layer.
pub struct DynamicTileSource {
    layer: Arc<LayerConfig>,
    url_template: String,
    native_zoom: u8,
    fetcher: Arc<dyn FileFetcher>,
    requested: FxHashSet<TileIndex>,
    in_flight: usize,
    tx: Sender<FetchOutcome>,
    rx: Receiver<FetchOutcome>,
}

impl DynamicTileSource {
    /// `None` when the layer is not backed by a dynamically tiled file.
    pub fn new(layer: Arc<LayerConfig>, fetcher: Arc<dyn FileFetcher>) -> Option<Self> {
        let (url_template, native_zoom) = match &layer.upstream {
            LayerUpstream::DynamicTiles { url_template, zoom } => (url_template.clone(), *zoom),
            _ => return None,
        };
        let (tx, rx) = unbounded();
        Some(Self {
            layer,
            url_template,
            native_zoom,
            fetcher,
            requested: FxHashSet::default(),
            in_flight: 0,
            tx,
            rx,
        })
    }

    pub fn layer(&self) -> &Arc<LayerConfig> {
        &self.layer
    }

    /// True while any tile fetch is outstanding.
    pub fn is_running(&self) -> bool {
        self.in_flight > 0
    }

    /// Kicks off fetches for viewport tiles not yet requested this session.
    /// Ranges over the fan-out cap are trimmed to empty, not truncated.
    pub fn update_viewport(&mut self, viewport: &Viewport, max_fan_out: u64) {
        if viewport.zoom_level() < self.layer.min_zoom {
            return;
        }
        let range = viewport.tile_range(self.native_zoom);
        if range.total() > max_fan_out {
            log::warn!(
                "dynamic source {}: range of {} tiles exceeds cap {}, skipping",
                self.layer.id,
                range.total(),
                max_fan_out
            );
            return;
        }
        for coord in range.iter() {
            let index = TileIndex::from_coord(&coord);
            if !self.requested.insert(index) {
                continue;
            }
            self.in_flight += 1;
            self.spawn_fetch(coord, index);
        }
    }

    fn spawn_fetch(&self, coord: TileCoord, index: TileIndex) {
        let url = self
            .url_template
            .replace("{z}", &coord.z.to_string())
            .replace("{x}", &coord.x.to_string())
            .replace("{y}", &coord.y.to_string());
        let fetcher = Arc::clone(&self.fetcher);
        let layer_id = self.layer.id.clone();
        let tx = self.tx.clone();

        thread::spawn(move || {
            log::debug!("fetch dynamic tile {}/{:?}", layer_id, coord);
            let outcome = fetcher
                .fetch(&url)
                .and_then(|raw| geojson::parse_features(&raw, &layer_id))
                .map_err(|e| e.to_string());
            let _ = tx.send((index, outcome));
        });
    }

    /// Completed tiles since the last poll. Failed fetches are logged,
    /// forgotten, and become eligible again on the next viewport change.
    pub fn poll(&mut self) -> Vec<LoadedTile> {
        let mut tiles = Vec::new();
        for (index, outcome) in self.rx.try_iter() {
            self.in_flight = self.in_flight.saturating_sub(1);
            match outcome {
                Ok(features) => {
                    tiles.push(LoadedTile::new(self.layer.id.clone(), index, features));
                }
                Err(e) => {
                    log::warn!("dynamic tile {}/{:?} failed: {}", self.layer.id, index, e);
                    self.requested.remove(&index);
                }
            }
        }
        tiles
    }
}
