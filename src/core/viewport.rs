use crate::core::geo::LatLngBounds;
use crate::core::tiles::{containing_tile_range, TileRange};
use serde::{Deserialize, Serialize};

/// The current view of the map: visible bounds and zoom level.
///
/// Viewport changes are the trigger for every fetch decision the engine
/// makes; the rendering side pushes a new `Viewport` whenever the user pans
/// or zooms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// The visible area in geographical coordinates
    pub bounds: LatLngBounds,
    /// The current zoom level
    pub zoom: f64,
}

impl Viewport {
    pub fn new(bounds: LatLngBounds, zoom: f64) -> Self {
        Self { bounds, zoom }
    }

    /// The zoom level as an integral tile-grid zoom.
    pub fn zoom_level(&self) -> u8 {
        self.zoom.floor().clamp(0.0, 30.0) as u8
    }

    /// The tile range covering the visible bounds at the given zoom.
    pub fn tile_range(&self, zoom: u8) -> TileRange {
        containing_tile_range(&self.bounds, zoom)
    }
}
