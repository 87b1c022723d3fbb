//! Single-integer tile keys and viewport tile ranges.

use crate::core::constants::MAX_ZOOM;
use crate::core::geo::{LatLngBounds, TileCoord};
use serde::{Deserialize, Serialize};

/// A single-integer key for a `(zoom, x, y)` tile, usable as a map key
/// everywhere tiles are tracked.
///
/// Tiles are numbered as a linear quadtree: all tiles of zoom `z` occupy the
/// contiguous block starting at `(4^z - 1) / 3`, ordered row-major within the
/// zoom level. The encoding is injective for every zoom up to [`MAX_ZOOM`]
/// and fits a `u64` with room to spare.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TileIndex(u64);

/// First index of the given zoom level's block: `sum(4^k for k < zoom)`.
fn zoom_offset(zoom: u8) -> u64 {
    ((1u64 << (2 * zoom as u32)) - 1) / 3
}

impl TileIndex {
    pub fn new(zoom: u8, x: u32, y: u32) -> Self {
        debug_assert!(zoom <= MAX_ZOOM, "zoom {} exceeds MAX_ZOOM", zoom);
        let side = 1u64 << zoom;
        debug_assert!((x as u64) < side && (y as u64) < side);
        TileIndex(zoom_offset(zoom) + (y as u64) * side + x as u64)
    }

    pub fn from_coord(coord: &TileCoord) -> Self {
        Self::new(coord.z, coord.x, coord.y)
    }

    /// The zoom level this index encodes.
    pub fn zoom(&self) -> u8 {
        self.decode().z
    }

    /// Decodes the index back into its `(x, y, zoom)` triple.
    pub fn decode(&self) -> TileCoord {
        for z in 0..=MAX_ZOOM {
            if z == MAX_ZOOM || self.0 < zoom_offset(z + 1) {
                let rem = self.0 - zoom_offset(z);
                let side = 1u64 << z;
                return TileCoord::new((rem % side) as u32, (rem / side) as u32, z);
            }
        }
        unreachable!("tile index out of range")
    }

    /// Geographic bounds of the encoded tile.
    pub fn bounds(&self) -> LatLngBounds {
        self.decode().bounds()
    }

    /// The raw integer, for use as an external storage key.
    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        TileIndex(raw)
    }
}

/// A rectangular run of tiles at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRange {
    pub zoom: u8,
    pub x_min: u32,
    pub x_max: u32,
    pub y_min: u32,
    pub y_max: u32,
}

impl TileRange {
    /// Number of tiles covered by the range, used against fan-out caps.
    pub fn total(&self) -> u64 {
        (self.x_max as u64 - self.x_min as u64 + 1) * (self.y_max as u64 - self.y_min as u64 + 1)
    }

    /// Iterates every tile coordinate in the range, row-major.
    pub fn iter(&self) -> impl Iterator<Item = TileCoord> + '_ {
        let zoom = self.zoom;
        (self.y_min..=self.y_max).flat_map(move |y| {
            (self.x_min..=self.x_max).map(move |x| TileCoord::new(x, y, zoom))
        })
    }
}

/// The minimal tile range at `zoom` fully covering `bounds`.
pub fn containing_tile_range(bounds: &LatLngBounds, zoom: u8) -> TileRange {
    let nw = TileCoord::from_lat_lng(
        &crate::core::geo::LatLng::new(bounds.north_east.lat, bounds.south_west.lng),
        zoom,
    );
    let se = TileCoord::from_lat_lng(
        &crate::core::geo::LatLng::new(bounds.south_west.lat, bounds.north_east.lng),
        zoom,
    );
    TileRange {
        zoom,
        x_min: nw.x.min(se.x),
        x_max: nw.x.max(se.x),
        y_min: nw.y.min(se.y),
        y_max: nw.y.max(se.y),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo::LatLng;

    #[test]
    fn test_index_round_trip() {
        for &(z, x, y) in &[
            (0u8, 0u32, 0u32),
            (1, 1, 0),
            (10, 5, 5),
            (14, 100, 101),
            (16, 65535, 0),
            (MAX_ZOOM, 7, 9),
        ] {
            let index = TileIndex::new(z, x, y);
            let coord = index.decode();
            assert_eq!((coord.z, coord.x, coord.y), (z, x, y));
        }
    }

    #[test]
    fn test_index_injective_across_zooms() {
        // Tile (1, 0, 0) and tile (0, 0, 0) must not collide, nor may any
        // same-position tile at different zooms.
        let mut seen = std::collections::HashSet::new();
        for z in 0..8u8 {
            for x in 0..4u32.min(1 << z) {
                for y in 0..4u32.min(1 << z) {
                    assert!(seen.insert(TileIndex::new(z, x, y).raw()));
                }
            }
        }
    }

    #[test]
    fn test_raw_round_trip() {
        let index = TileIndex::new(14, 8364, 5479);
        assert_eq!(TileIndex::from_raw(index.raw()), index);
    }

    #[test]
    fn test_range_total_and_iteration() {
        let range = TileRange {
            zoom: 14,
            x_min: 10,
            x_max: 12,
            y_min: 20,
            y_max: 21,
        };
        assert_eq!(range.total(), 6);
        let tiles: Vec<_> = range.iter().collect();
        assert_eq!(tiles.len(), 6);
        assert_eq!(tiles[0], TileCoord::new(10, 20, 14));
        assert_eq!(tiles[5], TileCoord::new(12, 21, 14));
    }

    #[test]
    fn test_containing_range_covers_bounds() {
        let bounds = LatLngBounds::from_coords(51.0, 3.6, 51.1, 3.8);
        let range = containing_tile_range(&bounds, 14);
        assert_eq!(range.zoom, 14);
        // Every corner of the bounds falls inside a tile of the range.
        for point in [
            LatLng::new(51.0, 3.6),
            LatLng::new(51.1, 3.8),
            LatLng::new(51.05, 3.7),
        ] {
            let coord = TileCoord::from_lat_lng(&point, 14);
            assert!(coord.x >= range.x_min && coord.x <= range.x_max);
            assert!(coord.y >= range.y_min && coord.y <= range.y_max);
        }
    }

    #[test]
    fn test_single_point_range_is_one_tile() {
        let bounds = LatLngBounds::from_coords(51.05, 3.72, 51.05, 3.72);
        let range = containing_tile_range(&bounds, 14);
        assert_eq!(range.total(), 1);
    }
}
