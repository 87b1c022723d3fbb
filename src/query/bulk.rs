//! The bulk-query path: one wide-area fetch covering the whole viewport.
//!
//! On every viewport change the orchestrator decides whether the visible
//! layers are already fresh enough, and if not triggers exactly one bulk
//! fetch for the viewport, never per-tile requests. The live tile API path
//! takes over above a zoom threshold; below it, this is the only way data
//! gets in.

use crate::core::config::{LayerConfig, LayerId, PipelineOptions};
use crate::core::constants::{FRESHNESS_CHECK_MAX_ZOOM, FRESHNESS_CHECK_WIDE_ZOOM};
use crate::core::geo::LatLngBounds;
use crate::core::tiles::containing_tile_range;
use crate::core::viewport::Viewport;
use crate::data::feature::{Feature, FeatureId};
use crate::data::geojson;
use crate::data::relations::RelationMembership;
use crate::events::Signal;
use crate::freshness::{is_fresh, Timestamp};
use crate::sources::HTTP_CLIENT;
use crate::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

/// The outcome of one bulk fetch.
pub struct BulkQueryResult {
    pub features: Vec<Feature>,
    /// Completion time, recorded as the freshness of every covered tile.
    pub completed_at: Timestamp,
    /// The layers the fetch covered.
    pub layers: Vec<LayerId>,
    /// Relation memberships observed while fetching.
    pub memberships: Vec<(FeatureId, RelationMembership)>,
}

/// Contract of the bulk spatial-query service (an external collaborator).
/// Failures are transient: nothing is recorded and the next viewport change
/// may retry.
pub trait BulkQueryClient: Send + Sync {
    fn fetch(
        &self,
        bounds: &LatLngBounds,
        timeout: Duration,
        layers: &[Arc<LayerConfig>],
    ) -> Result<BulkQueryResult>;
}

/// Default [`BulkQueryClient`] over HTTP, rotating through a list of
/// endpoints. Expects a GeoJSON response covering all requested layers.
pub struct HttpBulkClient {
    endpoints: Vec<String>,
    next: AtomicUsize,
}

impl HttpBulkClient {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            next: AtomicUsize::new(0),
        }
    }
}

impl BulkQueryClient for HttpBulkClient {
    fn fetch(
        &self,
        bounds: &LatLngBounds,
        timeout: Duration,
        layers: &[Arc<LayerConfig>],
    ) -> Result<BulkQueryResult> {
        if self.endpoints.is_empty() {
            return Err(crate::Error::Configuration("no bulk endpoints".into()).into());
        }
        let endpoint =
            &self.endpoints[self.next.fetch_add(1, Ordering::Relaxed) % self.endpoints.len()];
        let url = format!(
            "{}?bbox={},{},{},{}",
            endpoint,
            bounds.south_west.lng,
            bounds.south_west.lat,
            bounds.north_east.lng,
            bounds.north_east.lat
        );
        let response = HTTP_CLIENT.get(&url).timeout(timeout).send()?;
        if !response.status().is_success() {
            return Err(
                crate::Error::TransientFetch(format!("{}: HTTP {}", url, response.status()))
                    .into(),
            );
        }
        let features = geojson::parse_features(&response.text()?, "bulk")?;
        Ok(BulkQueryResult {
            features,
            completed_at: SystemTime::now(),
            layers: layers.iter().map(|l| l.id.clone()).collect(),
            memberships: Vec::new(),
        })
    }
}

/// A finished bulk fetch together with the bounds it covered.
pub struct CompletedBulk {
    pub bounds: LatLngBounds,
    pub result: BulkQueryResult,
}

/// The zoom level at which viewport freshness is checked: clamped to at most
/// 16, and two levels finer below zoom 8, where bulk fetches already cover
/// large areas and a coarse check would re-trigger them while panning.
pub fn effective_check_zoom(zoom: f64) -> u8 {
    let mut zoom = zoom.floor().clamp(0.0, 30.0) as u8;
    if zoom > FRESHNESS_CHECK_MAX_ZOOM {
        zoom = FRESHNESS_CHECK_MAX_ZOOM;
    }
    if zoom < FRESHNESS_CHECK_WIDE_ZOOM {
        zoom += 2;
    }
    zoom
}

/// Decides when a viewport needs a bulk fetch and runs at most one at a
/// time. A trigger while a fetch is in flight is coalesced into nothing; the
/// freshness check on the next viewport change picks up whatever is still
/// missing.
pub struct BulkOrchestrator {
    client: Arc<dyn BulkQueryClient>,
    running: Signal<bool>,
    timeout: Signal<Duration>,
    staleness_threshold: Duration,
    tx: Sender<std::result::Result<CompletedBulk, String>>,
    rx: Receiver<std::result::Result<CompletedBulk, String>>,
}

impl BulkOrchestrator {
    pub fn new(client: Arc<dyn BulkQueryClient>, options: &PipelineOptions) -> Self {
        let (tx, rx) = unbounded();
        Self {
            client,
            running: Signal::new(false),
            timeout: Signal::new(options.bulk_timeout),
            staleness_threshold: options.staleness_threshold,
            tx,
            rx,
        }
    }

    /// Observable running state of the single bulk fetch slot.
    pub fn running(&self) -> Signal<bool> {
        self.running.clone()
    }

    /// Observable timeout handed to the query service.
    pub fn timeout(&self) -> Signal<Duration> {
        self.timeout.clone()
    }

    /// True when any tile of the viewport range is unknown or stale for any
    /// visible layer. `freshness_for` answers per-tile freshness across the
    /// currently displayed layers (`None` = some layer has no record).
    pub fn viewport_stale(
        &self,
        viewport: &Viewport,
        now: Timestamp,
        freshness_for: &dyn Fn(u8, u32, u32) -> Option<Timestamp>,
    ) -> bool {
        let zoom = effective_check_zoom(viewport.zoom);
        let range = containing_tile_range(&viewport.bounds, zoom);
        let stale = range.iter().any(|coord| {
            match freshness_for(coord.z, coord.x, coord.y) {
                Some(at) => !is_fresh(at, now, self.staleness_threshold),
                None => true,
            }
        });
        stale
    }

    /// Issues one bulk fetch for the viewport when it is stale, not already
    /// served by the live tile API path, and no fetch is in flight.
    pub fn maybe_fetch(
        &self,
        viewport: &Viewport,
        layers: &[Arc<LayerConfig>],
        live_api_active: bool,
        now: Timestamp,
        freshness_for: &dyn Fn(u8, u32, u32) -> Option<Timestamp>,
    ) {
        if live_api_active || layers.is_empty() {
            return;
        }
        if self.running.get() {
            log::debug!("bulk fetch already running, coalescing trigger");
            return;
        }
        if !self.viewport_stale(viewport, now, freshness_for) {
            log::debug!("viewport sufficiently fresh, skipping bulk fetch");
            return;
        }
        self.spawn_fetch(viewport.bounds.clone(), layers.to_vec());
    }

    fn spawn_fetch(&self, bounds: LatLngBounds, layers: Vec<Arc<LayerConfig>>) {
        self.running.set(true);
        let client = Arc::clone(&self.client);
        let timeout = self.timeout.get();
        let running = self.running.clone();
        let tx = self.tx.clone();

        thread::spawn(move || {
            log::info!("bulk fetch over {:?} for {} layers", bounds, layers.len());
            let outcome = client
                .fetch(&bounds, timeout, &layers)
                .map(|result| CompletedBulk {
                    bounds: bounds.clone(),
                    result,
                })
                .map_err(|e| e.to_string());
            let _ = tx.send(outcome);
            running.set(false);
        });
    }

    /// The completed fetch, if one finished since the last poll. Failures
    /// are logged and dropped; no state was mutated, so the next viewport
    /// change retries.
    pub fn poll(&self) -> Option<CompletedBulk> {
        let mut completed = None;
        for outcome in self.rx.try_iter() {
            match outcome {
                Ok(done) => completed = Some(done),
                Err(e) => log::warn!("bulk fetch failed: {}", e),
            }
        }
        completed
    }
}
