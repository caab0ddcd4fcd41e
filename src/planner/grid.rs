//! Tile grid geometry.
//!
//! The grid maps a rectangular scan area and an objective field-of-view to a
//! deterministic set of capture positions. Tile pitch is the field-of-view
//! reduced by the configured overlap fraction, so adjacent captures share a
//! border region for later stitching. Column and row counts are the scan
//! extents divided by the pitch, rounded up, so the grid always covers the
//! full area with no gaps.
//!
//! Tiles are visited in row-major order: row 0 left to right, then row 1,
//! and so on (no serpentine). Downstream stitchers rely on this plus the
//! `cCCC_rRRR[_hHH].jpg` filename encoding to recover adjacency from
//! filenames alone.

use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};

/// One scan position in the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub col: u32,
    pub row: u32,
}

impl Tile {
    pub fn new(col: u32, row: u32) -> Self {
        Self { col, row }
    }
}

/// Rectangular scan area in stage units; corners in any order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanBounds {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl ScanBounds {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f64 {
        (self.x1 - self.x0).abs()
    }

    pub fn height(&self) -> f64 {
        (self.y1 - self.y0).abs()
    }

    /// Lower-left corner, the origin of tile (0, 0).
    pub fn origin(&self) -> (f64, f64) {
        (self.x0.min(self.x1), self.y0.min(self.y1))
    }
}

/// Deterministic tile layout computed once at plan time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileGrid {
    origin_x: f64,
    origin_y: f64,
    pitch_x: f64,
    pitch_y: f64,
    cols: u32,
    rows: u32,
}

impl TileGrid {
    /// Lay out the grid for a scan area, objective field-of-view, and overlap
    /// fraction in `[0, 1)`.
    pub fn plan(bounds: &ScanBounds, fov_w: f64, fov_h: f64, overlap: f64) -> ScanResult<Self> {
        if !(fov_w > 0.0 && fov_h > 0.0) {
            return Err(ScanError::precondition(format!(
                "field of view must be positive, got {}x{}",
                fov_w, fov_h
            )));
        }
        if !(0.0..1.0).contains(&overlap) {
            return Err(ScanError::precondition(format!(
                "overlap fraction must be in [0, 1), got {}",
                overlap
            )));
        }
        if bounds.width() == 0.0 || bounds.height() == 0.0 {
            return Err(ScanError::precondition("scan area has zero extent"));
        }

        let pitch_x = fov_w * (1.0 - overlap);
        let pitch_y = fov_h * (1.0 - overlap);
        let (origin_x, origin_y) = bounds.origin();

        let cols = ((bounds.width() / pitch_x).ceil() as u32).max(1);
        let rows = ((bounds.height() / pitch_y).ceil() as u32).max(1);

        Ok(Self {
            origin_x,
            origin_y,
            pitch_x,
            pitch_y,
            cols,
            rows,
        })
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn tile_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    pub fn pitch(&self) -> (f64, f64) {
        (self.pitch_x, self.pitch_y)
    }

    /// Center position of a tile in stage units.
    pub fn center(&self, tile: Tile) -> (f64, f64) {
        (
            self.origin_x + tile.col as f64 * self.pitch_x,
            self.origin_y + tile.row as f64 * self.pitch_y,
        )
    }

    /// Tiles in capture order: row-major, row outer, column inner.
    pub fn tiles(&self) -> impl Iterator<Item = Tile> + '_ {
        (0..self.rows).flat_map(move |row| (0..self.cols).map(move |col| Tile::new(col, row)))
    }

    /// Deterministic output filename for a tile, with an optional HDR
    /// exposure index.
    pub fn filename(tile: Tile, hdr: Option<u32>) -> String {
        match hdr {
            Some(h) => format!("c{:03}_r{:03}_h{:02}.jpg", tile.col, tile.row, h),
            None => format!("c{:03}_r{:03}.jpg", tile.col, tile.row),
        }
    }
}
