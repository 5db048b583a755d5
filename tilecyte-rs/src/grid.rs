//! Tile geometry for one region: scan order, absolute origins, overlap bands.
//!
//! A region is a `region_width x region_height` grid of tiles. Tiles arrive in
//! acquisition order; in snake mode odd rows are scanned right to left, so the
//! column must be recovered from the acquisition index.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TilingMode {
    /// Row 0 left to right, row 1 right to left, ...
    #[default]
    Snake,
    /// Every row left to right.
    #[serde(alias = "grid_rows")]
    Raster,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub row: u32,
    pub col: u32,
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(row {}, col {})", self.row, self.col)
    }
}

/// Axis-aligned pixel rectangle in region-absolute coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub fn right(&self) -> usize {
        self.x + self.width
    }

    pub fn bottom(&self) -> usize {
        self.y + self.height
    }

    pub fn contains(&self, x: usize, y: usize) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }
}

/// Placement of one tile inside its region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGeometry {
    /// Position in instrument scan order (0-based).
    pub index: usize,
    pub coord: TileCoord,
    pub origin_x: usize,
    pub origin_y: usize,
    pub width: usize,
    pub height: usize,
}

impl TileGeometry {
    pub fn rect(&self) -> Rect {
        Rect {
            x: self.origin_x,
            y: self.origin_y,
            width: self.width,
            height: self.height,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.origin_x as f64 + self.width as f64 / 2.0,
            self.origin_y as f64 + self.height as f64 / 2.0,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GridModel {
    pub region_width: u32,
    pub region_height: u32,
    pub tile_width: usize,
    pub tile_height: usize,
    pub overlap_x: usize,
    pub overlap_y: usize,
    pub mode: TilingMode,
}

impl GridModel {
    pub fn new(
        region_width: u32,
        region_height: u32,
        tile_width: usize,
        tile_height: usize,
        overlap_x: usize,
        overlap_y: usize,
        mode: TilingMode,
    ) -> Result<Self> {
        if region_width == 0 || region_height == 0 {
            return Err(Error::Configuration(format!(
                "region must have a positive size in tiles (got {}x{})",
                region_width, region_height
            )));
        }
        if tile_width == 0 || tile_height == 0 {
            return Err(Error::Configuration(format!(
                "tile must have a positive pixel size (got {}x{})",
                tile_width, tile_height
            )));
        }
        if overlap_x >= tile_width {
            return Err(Error::Configuration(format!(
                "tile_overlap_x ({}) must be smaller than tile_width ({})",
                overlap_x, tile_width
            )));
        }
        if overlap_y >= tile_height {
            return Err(Error::Configuration(format!(
                "tile_overlap_y ({}) must be smaller than tile_height ({})",
                overlap_y, tile_height
            )));
        }
        Ok(Self {
            region_width,
            region_height,
            tile_width,
            tile_height,
            overlap_x,
            overlap_y,
            mode,
        })
    }

    pub fn num_tiles(&self) -> usize {
        self.region_width as usize * self.region_height as usize
    }

    /// Horizontal distance between the origins of adjacent columns.
    pub fn step_x(&self) -> usize {
        self.tile_width - self.overlap_x
    }

    pub fn step_y(&self) -> usize {
        self.tile_height - self.overlap_y
    }

    /// Pixel extent of the stitched region as (width, height).
    pub fn region_size(&self) -> (usize, usize) {
        (
            (self.region_width as usize - 1) * self.step_x() + self.tile_width,
            (self.region_height as usize - 1) * self.step_y() + self.tile_height,
        )
    }

    pub fn coord_of(&self, index: usize) -> Result<TileCoord> {
        if index >= self.num_tiles() {
            return Err(Error::Configuration(format!(
                "tile index {} out of range (region has {} tiles)",
                index,
                self.num_tiles()
            )));
        }
        let w = self.region_width as usize;
        let row = index / w;
        let pos = index % w;
        let col = match self.mode {
            TilingMode::Snake if row % 2 == 1 => w - 1 - pos,
            _ => pos,
        };
        Ok(TileCoord {
            row: row as u32,
            col: col as u32,
        })
    }

    pub fn index_of(&self, coord: TileCoord) -> Result<usize> {
        if coord.row >= self.region_height || coord.col >= self.region_width {
            return Err(Error::Configuration(format!(
                "tile {} outside {}x{} region",
                coord, self.region_width, self.region_height
            )));
        }
        let w = self.region_width as usize;
        let row = coord.row as usize;
        let col = coord.col as usize;
        let pos = match self.mode {
            TilingMode::Snake if row % 2 == 1 => w - 1 - col,
            _ => col,
        };
        Ok(row * w + pos)
    }

    /// Origin does not depend on scan direction, only on (row, col).
    pub fn origin(&self, coord: TileCoord) -> (usize, usize) {
        (
            coord.col as usize * self.step_x(),
            coord.row as usize * self.step_y(),
        )
    }

    pub fn tile(&self, index: usize) -> Result<TileGeometry> {
        let coord = self.coord_of(index)?;
        let (origin_x, origin_y) = self.origin(coord);
        Ok(TileGeometry {
            index,
            coord,
            origin_x,
            origin_y,
            width: self.tile_width,
            height: self.tile_height,
        })
    }

    /// All tiles in acquisition order.
    pub fn tiles(&self) -> Vec<TileGeometry> {
        (0..self.num_tiles())
            .filter_map(|i| self.tile(i).ok())
            .collect()
    }

    /// The part of a tile not shared with any neighbor that exists in the grid.
    /// Empty (zero-sized) when the overlap bands cover the whole tile.
    pub fn core_rect(&self, coord: TileCoord) -> Rect {
        let (ox, oy) = self.origin(coord);
        let left = if coord.col > 0 { self.overlap_x } else { 0 };
        let right = if coord.col + 1 < self.region_width { self.overlap_x } else { 0 };
        let top = if coord.row > 0 { self.overlap_y } else { 0 };
        let bottom = if coord.row + 1 < self.region_height { self.overlap_y } else { 0 };
        Rect {
            x: ox + left,
            y: oy + top,
            width: self.tile_width.saturating_sub(left + right),
            height: self.tile_height.saturating_sub(top + bottom),
        }
    }
}
