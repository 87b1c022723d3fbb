//! The tile-oriented live API path.
//!
//! Active only above a configured zoom threshold, this source fetches
//! individual tiles at the API's native zoom for every live-backed layer at
//! once, each tile on a detached worker thread with the completion routed
//! back over a channel. An empty tile is still a valid result: its freshness
//! is recorded so the tile is not re-fetched.

use crate::core::config::{LayerConfig, LayerId};
use crate::core::geo::TileCoord;
use crate::core::tiles::TileIndex;
use crate::data::feature::Feature;
use crate::data::geojson;
use crate::events::Signal;
use crate::sources::{split_per_layer, HTTP_CLIENT};
use crate::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use fxhash::FxHashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// One layer's share of a fetched tile.
#[derive(Debug, Clone)]
pub struct LayerTileData {
    pub layer_id: LayerId,
    pub features: Vec<Feature>,
}

/// Client contract of the live tile API (an external collaborator).
pub trait TileApiClient: Send + Sync {
    /// Fetches every requested layer's features inside one tile.
    fn fetch_tile(
        &self,
        coord: TileCoord,
        layers: &[Arc<LayerConfig>],
    ) -> Result<Vec<LayerTileData>>;
}

/// Default [`TileApiClient`] over HTTP: fetches `{base}/{z}/{x}/{y}.json` as
/// GeoJSON and routes features to layers by their tag matchers.
pub struct HttpTileApi {
    base_url: String,
}

impl HttpTileApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl TileApiClient for HttpTileApi {
    fn fetch_tile(
        &self,
        coord: TileCoord,
        layers: &[Arc<LayerConfig>],
    ) -> Result<Vec<LayerTileData>> {
        let url = format!("{}/{}/{}/{}.json", self.base_url, coord.z, coord.x, coord.y);
        let response = HTTP_CLIENT.get(&url).send()?;
        if !response.status().is_success() {
            return Err(
                crate::Error::TransientFetch(format!("{}: HTTP {}", url, response.status()))
                    .into(),
            );
        }
        let features = geojson::parse_features(&response.text()?, "live")?;
        Ok(split_per_layer(features, layers)
            .into_iter()
            .map(|(layer_id, features)| LayerTileData { layer_id, features })
            .collect())
    }
}

/// One completed tile fetch across all live-backed layers.
pub struct LiveTileBatch {
    pub coord: TileCoord,
    pub tiles: Vec<LayerTileData>,
}

type FetchOutcome = (TileCoord, std::result::Result<Vec<LayerTileData>, String>);

/// Batch runner for the live tile API.
pub struct LiveTileSource {
    client: Arc<dyn TileApiClient>,
    layers: Vec<Arc<LayerConfig>>,
    is_running: Signal<bool>,
    in_flight: FxHashSet<TileIndex>,
    tx: Sender<FetchOutcome>,
    rx: Receiver<FetchOutcome>,
}

impl LiveTileSource {
    pub fn new(client: Arc<dyn TileApiClient>, layers: Vec<Arc<LayerConfig>>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            client,
            layers,
            is_running: Signal::new(false),
            in_flight: FxHashSet::default(),
            tx,
            rx,
        }
    }

    /// The layers served by this source.
    pub fn layers(&self) -> &[Arc<LayerConfig>] {
        &self.layers
    }

    /// Observable running state, true while any tile fetch is outstanding.
    pub fn is_running(&self) -> Signal<bool> {
        self.is_running.clone()
    }

    /// Requests the given tiles, skipping any already in flight.
    pub fn request_tiles(&mut self, coords: Vec<TileCoord>) {
        for coord in coords {
            let index = TileIndex::from_coord(&coord);
            if !self.in_flight.insert(index) {
                continue;
            }
            self.spawn_fetch(coord);
        }
        if !self.in_flight.is_empty() {
            self.is_running.set(true);
        }
    }

    fn spawn_fetch(&self, coord: TileCoord) {
        let client = Arc::clone(&self.client);
        let layers = self.layers.clone();
        let tx = self.tx.clone();

        thread::spawn(move || {
            const MAX_ATTEMPTS: usize = 2;
            for attempt in 1..=MAX_ATTEMPTS {
                log::debug!("fetch live tile {:?} attempt {}", coord, attempt);
                match client.fetch_tile(coord, &layers) {
                    Ok(tiles) => {
                        log::info!("fetched live tile {:?} ({} layers)", coord, tiles.len());
                        let _ = tx.send((coord, Ok(tiles)));
                        return;
                    }
                    Err(e) => {
                        log::warn!("live tile {:?} failed on attempt {}: {}", coord, attempt, e);
                        if attempt == MAX_ATTEMPTS {
                            let _ = tx.send((coord, Err(e.to_string())));
                        } else {
                            thread::sleep(Duration::from_millis(100));
                        }
                    }
                }
            }
        });
    }

    /// Completed batches since the last poll. Failures are dropped here
    /// (already logged); the tile's freshness stays unknown, so the next
    /// viewport change retries it.
    pub fn poll(&mut self) -> Vec<LiveTileBatch> {
        let mut batches = Vec::new();
        for (coord, outcome) in self.rx.try_iter() {
            self.in_flight.remove(&TileIndex::from_coord(&coord));
            if let Ok(tiles) = outcome {
                batches.push(LiveTileBatch { coord, tiles });
            }
        }
        if self.in_flight.is_empty() {
            self.is_running.set(false);
        }
        batches
    }
}
