//! Raw tile discovery and TIFF reading.
//!
//! Supported layouts (all indices 1-based on disk):
//!   keyence_multi_cycle_v01:  Cyc{cycle}_reg{region}/{region}_{tile:05}_Z{z:03}_CH{channel}.tif
//!   keyence_single_cycle_v01: {region}_{tile:05}_Z{z:03}_CH{channel}.tif

use ndarray::{Array2, Array3};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tiff::encoder::{colortype::Gray16, TiffEncoder};

use crate::config::{ChannelMap, IlluminationParams, PathFormat};
use crate::error::{Error, Result};
use crate::grid::TileGeometry;
use crate::plane::Plane;
use crate::tile::{TileSource, TileStack};

const TILE_RE: &str = r"^(\d+)_(\d{5})_Z(\d{3})_CH(\d+)\.tif$";
const CYCLE_DIR_RE: &str = r"^Cyc(\d+)_reg(\d+)$";

/// 0-based position of one raw plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RawKey {
    pub region: usize,
    pub cycle: u32,
    pub tile: usize,
    pub z: u32,
    pub channel: u32,
}

/// Index of every raw plane found under an acquisition root.
#[derive(Debug, Clone, Default)]
pub struct RawIndex {
    files: BTreeMap<RawKey, PathBuf>,
}

fn one_based(cap: &str, what: &str) -> Result<u32> {
    let v: u32 = cap
        .parse()
        .map_err(|_| Error::Io(format!("invalid {} number {:?}", what, cap)))?;
    v.checked_sub(1)
        .ok_or_else(|| Error::Io(format!("{} numbers start at 1", what)))
}

impl RawIndex {
    pub fn discover(root: &Path, format: PathFormat) -> Result<Self> {
        let tile_re = Regex::new(TILE_RE).map_err(|e| Error::Io(e.to_string()))?;
        let mut index = RawIndex::default();
        match format {
            PathFormat::KeyenceSingleCycle => index.scan_dir(root, None, &tile_re)?,
            PathFormat::KeyenceMultiCycle => {
                let dir_re = Regex::new(CYCLE_DIR_RE).map_err(|e| Error::Io(e.to_string()))?;
                for entry in fs::read_dir(root)? {
                    let entry = entry?;
                    if !entry.file_type()?.is_dir() {
                        continue;
                    }
                    let name = entry.file_name();
                    let name = name.to_string_lossy();
                    let Some(cap) = dir_re.captures(&name) else {
                        continue;
                    };
                    let cycle = one_based(&cap[1], "cycle")?;
                    index.scan_dir(&entry.path(), Some(cycle), &tile_re)?;
                }
            }
        }
        tracing::debug!(root = %root.display(), planes = index.files.len(), "discovered raw planes");
        Ok(index)
    }

    fn scan_dir(&mut self, dir: &Path, cycle: Option<u32>, re: &Regex) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(cap) = re.captures(&name) else {
                continue;
            };
            let key = RawKey {
                region: one_based(&cap[1], "region")? as usize,
                cycle: cycle.unwrap_or(0),
                tile: one_based(&cap[2], "tile")? as usize,
                z: one_based(&cap[3], "z")?,
                channel: one_based(&cap[4], "channel")?,
            };
            self.files.insert(key, entry.path());
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, key: &RawKey) -> Option<&Path> {
        self.files.get(key).map(PathBuf::as_path)
    }

    pub fn regions(&self) -> BTreeSet<usize> {
        self.files.keys().map(|k| k.region).collect()
    }

    /// Read every named channel of one tile as `(z, y, x)` stacks.
    pub fn load_tile(
        &self,
        region_name: &str,
        region: usize,
        geometry: &TileGeometry,
        channels: &ChannelMap,
        num_z: u32,
    ) -> Result<TileStack> {
        let mut tile = TileStack::new(region_name, *geometry);
        for (name, loc) in channels {
            let mut stack = Array3::<f32>::zeros((num_z as usize, geometry.height, geometry.width));
            for z in 0..num_z {
                let key = RawKey {
                    region,
                    cycle: loc.cycle,
                    tile: geometry.index,
                    z,
                    channel: loc.channel,
                };
                let path = self.get(&key).ok_or_else(|| {
                    Error::InsufficientData(format!(
                        "no raw plane for channel {:?} z {} of {}",
                        name,
                        z,
                        tile.id()
                    ))
                })?;
                let plane = read_tiff_plane(path)?;
                if plane.dim() != (geometry.height, geometry.width) {
                    return Err(Error::InsufficientData(format!(
                        "{} is {:?}, tiles are {}x{}",
                        path.display(),
                        plane.dim(),
                        geometry.width,
                        geometry.height
                    )));
                }
                stack.index_axis_mut(ndarray::Axis(0), z as usize).assign(&plane);
            }
            tile.insert(name.clone(), stack)?;
        }
        Ok(tile)
    }
}

/// Raw acquisition directory served tile by tile.
pub struct RawSource {
    index: RawIndex,
    region_names: Vec<String>,
    channels: ChannelMap,
    num_z: u32,
}

impl RawSource {
    pub fn new(index: RawIndex, region_names: Vec<String>, channels: ChannelMap, num_z: u32) -> Self {
        Self {
            index,
            region_names,
            channels,
            num_z,
        }
    }
}

impl TileSource for RawSource {
    fn load(&self, region: &str, geometry: &TileGeometry) -> Result<TileStack> {
        let position = self
            .region_names
            .iter()
            .position(|r| r == region)
            .ok_or_else(|| Error::Configuration(format!("unknown region {:?}", region)))?;
        self.index
            .load_tile(region, position, geometry, &self.channels, self.num_z)
    }
}

/// On-disk name of one raw plane (all arguments 0-based).
pub fn raw_path(root: &Path, format: PathFormat, key: &RawKey) -> PathBuf {
    let file = format!(
        "{}_{:05}_Z{:03}_CH{}.tif",
        key.region + 1,
        key.tile + 1,
        key.z + 1,
        key.channel + 1
    );
    match format {
        PathFormat::KeyenceMultiCycle => root
            .join(format!("Cyc{}_reg{}", key.cycle + 1, key.region + 1))
            .join(file),
        PathFormat::KeyenceSingleCycle => root.join(file),
    }
}

/// Read one grayscale TIFF as `f32` (8-bit, 16-bit and float data).
pub fn read_tiff_plane(path: &Path) -> Result<Plane> {
    let tiff_err = |e: tiff::TiffError| {
        Error::InsufficientData(format!("cannot decode {}: {}", path.display(), e))
    };
    let file = fs::File::open(path)?;
    let mut decoder = tiff::decoder::Decoder::new(file).map_err(tiff_err)?;
    let (width, height) = decoder.dimensions().map_err(tiff_err)?;
    let values: Vec<f32> = match decoder.read_image().map_err(tiff_err)? {
        tiff::decoder::DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        tiff::decoder::DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        tiff::decoder::DecodingResult::F32(v) => v,
        _ => {
            return Err(Error::InsufficientData(format!(
                "{}: unsupported TIFF pixel format (need u8, u16 or f32)",
                path.display()
            )))
        }
    };
    Array2::from_shape_vec((height as usize, width as usize), values).map_err(|_| {
        Error::InsufficientData(format!("{}: sample count does not match size", path.display()))
    })
}

/// Write a plane as 16-bit grayscale, clamping to the u16 range.
pub fn write_tiff_plane_u16(path: &Path, plane: &Plane) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let (h, w) = plane.dim();
    let data: Vec<u16> = plane
        .iter()
        .map(|&v| v.round().clamp(0.0, u16::MAX as f32) as u16)
        .collect();
    let mut writer = BufWriter::new(fs::File::create(path)?);
    let mut encoder = TiffEncoder::new(&mut writer).map_err(|e| Error::Io(e.to_string()))?;
    encoder
        .write_image::<Gray16>(w as u32, h as u32, &data)
        .map_err(|e| Error::Io(e.to_string()))?;
    Ok(())
}

/// Load the fitted illumination surface of every mapped source channel.
/// Relative paths resolve against `base`.
pub fn load_illumination_images(
    params: &IlluminationParams,
    base: &Path,
) -> Result<BTreeMap<String, Plane>> {
    let mut images = BTreeMap::new();
    for source in params.channel_mapping.keys() {
        let path = params.images.get(source).ok_or_else(|| {
            Error::Configuration(format!("no illumination image configured for {:?}", source))
        })?;
        let path = if path.is_absolute() {
            path.clone()
        } else {
            base.join(path)
        };
        let plane = read_tiff_plane(&path).map_err(|e| {
            Error::Configuration(format!("illumination image {}: {}", path.display(), e))
        })?;
        images.insert(source.clone(), plane);
    }
    Ok(images)
}
