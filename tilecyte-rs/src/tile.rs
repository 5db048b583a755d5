use ndarray::{Array3, ArrayView3};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::focus::FocalSelection;
use crate::grid::TileGeometry;
use crate::plane::Plane;
use crate::quantify::CellRecord;
use crate::segment::TileMasks;

/// Identity of one tile in one region.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileId {
    pub region: String,
    pub index: usize,
}

impl std::fmt::Display for TileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/tile{:05}", self.region, self.index)
    }
}

/// Raw planes of one tile, all cycles merged by channel name.
/// Every stack is `(z, y, x)` with the tile's pixel size.
#[derive(Debug, Clone)]
pub struct TileStack {
    pub region: String,
    pub geometry: TileGeometry,
    channels: BTreeMap<String, Array3<f32>>,
}

impl TileStack {
    pub fn new(region: impl Into<String>, geometry: TileGeometry) -> Self {
        Self {
            region: region.into(),
            geometry,
            channels: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> TileId {
        TileId {
            region: self.region.clone(),
            index: self.geometry.index,
        }
    }

    pub fn insert(&mut self, channel: impl Into<String>, stack: Array3<f32>) -> Result<()> {
        let channel = channel.into();
        let (_, h, w) = stack.dim();
        if h != self.geometry.height || w != self.geometry.width {
            return Err(Error::InsufficientData(format!(
                "channel {:?} of {} is {}x{}, expected {}x{}",
                channel,
                self.id(),
                w,
                h,
                self.geometry.width,
                self.geometry.height
            )));
        }
        if stack.dim().0 == 0 {
            return Err(Error::InsufficientData(format!(
                "channel {:?} of {} has no z planes",
                channel,
                self.id()
            )));
        }
        self.channels.insert(channel, stack);
        Ok(())
    }

    pub fn with_channel(mut self, channel: impl Into<String>, stack: Array3<f32>) -> Result<Self> {
        self.insert(channel, stack)?;
        Ok(self)
    }

    pub fn channel(&self, name: &str) -> Result<ArrayView3<'_, f32>> {
        self.channels
            .get(name)
            .map(|s| s.view())
            .ok_or_else(|| {
                Error::InsufficientData(format!("channel {:?} missing from {}", name, self.id()))
            })
    }

    pub fn num_z(&self) -> usize {
        self.channels.values().map(|s| s.dim().0).min().unwrap_or(0)
    }
}

/// Everything the montage needs from one successfully processed tile.
#[derive(Debug, Clone)]
pub struct TileResult {
    pub geometry: TileGeometry,
    pub focal: FocalSelection,
    pub masks: TileMasks,
    pub records: Vec<CellRecord>,
    /// Corrected focal planes retained for reassembly, by channel.
    pub planes: BTreeMap<String, Plane>,
}

/// Where tile stacks come from: raw files on disk, or memory in tests.
pub trait TileSource: Send + Sync {
    fn load(&self, region: &str, geometry: &TileGeometry) -> Result<TileStack>;
}
