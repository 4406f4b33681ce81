//! The tile partition of the logical pixel grid. Tiles are the unit of
//! dirty tracking and of snapshot/composite work; the grid is enumerated in
//! row-major order with a stable integer index.

use crate::rect::Rect;
use static_assertions::const_assert;
use tileflow_common::mode::VideoMode;

/// Candidate tile edge lengths, largest first. The first candidate that
/// divides both mode dimensions wins, so there are never partial tiles at
/// the edges.
pub const TILE_CANDIDATES: [u32; 8] = [40, 32, 24, 20, 16, 12, 10, 8];

const_assert!(TILE_CANDIDATES[0] > TILE_CANDIDATES[TILE_CANDIDATES.len() - 1]);

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct TileGrid {
    tile: u32,
    cols: u32,
    rows: u32,
}

impl TileGrid {
    /// Derives the tile partition for a mode, or `None` when no candidate
    /// edge length divides both dimensions.
    pub fn for_mode(mode: &VideoMode) -> Option<Self> {
        let tile = *TILE_CANDIDATES
            .iter()
            .find(|t| mode.width % *t == 0 && mode.height % *t == 0)?;
        Some(Self {
            tile,
            cols: mode.width / tile,
            rows: mode.height / tile,
        })
    }

    pub fn tile_size(&self) -> u32 {
        self.tile
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

    pub fn index(&self, col: u32, row: u32) -> usize {
        row as usize * self.cols as usize + col as usize
    }

    pub fn tile_rect(&self, index: usize) -> Rect {
        let col = (index % self.cols as usize) as u32;
        let row = (index / self.cols as usize) as u32;
        Rect::new(col * self.tile, row * self.tile, self.tile, self.tile)
    }

    /// Tile column of a pixel column.
    pub fn col_of(&self, x: u32) -> u32 {
        x / self.tile
    }

    /// Tile row of a pixel row.
    pub fn row_of(&self, y: u32) -> u32 {
        y / self.tile
    }
}
