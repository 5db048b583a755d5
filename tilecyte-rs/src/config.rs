//! Experiment configuration document (YAML).
//!
//! The layout follows the acquisition/processor/operator sections of the
//! experiment file. Parsing and validation errors surface as
//! [`Error::Configuration`] before any tile is touched.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::focus::FocalStrategy;
use crate::grid::{GridModel, TilingMode};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub name: String,
    pub environment: Environment,
    pub acquisition: Acquisition,
    #[serde(default)]
    pub operator: Vec<OperatorEntry>,
    #[serde(default)]
    pub analysis: Vec<AnalysisEntry>,
    #[serde(default)]
    pub processor: Processor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum PathFormat {
    /// `Cyc{cycle}_reg{region}/{region}_{tile:05}_Z{z:03}_CH{channel}.tif`
    #[serde(rename = "keyence_multi_cycle_v01")]
    KeyenceMultiCycle,
    /// Same file names without the cycle directory.
    #[serde(rename = "keyence_single_cycle_v01")]
    KeyenceSingleCycle,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Environment {
    pub path_formats: PathFormat,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Acquisition {
    pub region_names: Vec<String>,
    pub region_width: u32,
    pub region_height: u32,
    pub tile_width: usize,
    pub tile_height: usize,
    #[serde(default)]
    pub tile_overlap_x: usize,
    #[serde(default)]
    pub tile_overlap_y: usize,
    #[serde(default)]
    pub tiling_mode: TilingMode,
    #[serde(default = "default_one")]
    pub num_cycles: u32,
    #[serde(default = "default_one")]
    pub num_z_planes: u32,
    pub per_cycle_channel_names: Vec<String>,
    pub channel_names: Vec<String>,
    #[serde(default)]
    pub emission_wavelengths: Vec<f64>,
    #[serde(default = "default_magnification")]
    pub magnification: f64,
    #[serde(default = "default_numerical_aperture")]
    pub numerical_aperture: f64,
    /// Nanometers.
    #[serde(default = "default_axial_resolution")]
    pub axial_resolution: f64,
    /// Nanometers per pixel.
    #[serde(default = "default_lateral_resolution")]
    pub lateral_resolution: f64,
    #[serde(default = "default_objective")]
    pub objective_type: String,
}

fn default_one() -> u32 {
    1
}
fn default_magnification() -> f64 {
    20.0
}
fn default_numerical_aperture() -> f64 {
    0.75
}
fn default_axial_resolution() -> f64 {
    1000.0
}
fn default_lateral_resolution() -> f64 {
    377.442
}
fn default_objective() -> String {
    "air".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OperatorEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extract: Option<ExtractOp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub montage: Option<MontageOp>,
}

/// Which corrected planes and mask overlays to retain per tile.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractOp {
    pub name: String,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MontageOp {
    pub name: String,
    pub extract_name: String,
}

/// A channel entry of an extract operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractChannel {
    /// `proc_<channel>`: the corrected focal plane of a channel.
    Processed(String),
    /// `cyto_nucleus_mask`
    NucleusMask,
    /// `cyto_cell_mask`
    CellMask,
}

impl ExtractChannel {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "cyto_nucleus_mask" | "cyto_nucleus_boundary" => Ok(Self::NucleusMask),
            "cyto_cell_mask" | "cyto_cell_boundary" => Ok(Self::CellMask),
            _ => s
                .strip_prefix("proc_")
                .filter(|c| !c.is_empty())
                .map(|c| Self::Processed(c.to_string()))
                .ok_or_else(|| Error::Configuration(format!("unknown extract channel {:?}", s))),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AnalysisEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_cytometry_statistics: Option<AggregateStatistics>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregateStatistics {
    #[serde(default)]
    pub mode: StatisticsMode,
    /// Plane used when `mode` is `fixed_z_plane`.
    #[serde(default)]
    pub z_plane: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticsMode {
    #[default]
    #[serde(alias = "most_in_focus")]
    BestZPlane,
    FixedZPlane,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Processor {
    pub args: ProcessorArgs,
    pub best_focus: Option<BestFocusParams>,
    pub deconvolution: DeconvolutionParams,
    pub illumination_correction: Option<IlluminationParams>,
    pub cytometry: Option<CytometryParams>,
    pub montage: MontageParams,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProcessorArgs {
    pub gpus: Vec<usize>,
    /// Worker threads for per-tile work; defaults to the device count or the
    /// available parallelism when no devices are configured.
    pub workers: Option<usize>,
    pub run_deconvolution: bool,
    pub run_illumination_correction: bool,
    pub run_cytometry: bool,
    pub run_best_focus: bool,
}

impl Default for ProcessorArgs {
    fn default() -> Self {
        Self {
            gpus: Vec::new(),
            workers: None,
            run_deconvolution: false,
            run_illumination_correction: false,
            run_cytometry: true,
            run_best_focus: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BestFocusParams {
    pub channel: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeconvolutionParams {
    pub n_iter: usize,
    pub scale_factor: f32,
}

impl Default for DeconvolutionParams {
    fn default() -> Self {
        Self {
            n_iter: 25,
            scale_factor: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IlluminationParams {
    /// Source channel -> target channel name or `all`.
    pub channel_mapping: BTreeMap<String, String>,
    /// Fitted illumination image per source channel, covering the tiles laid
    /// side by side without overlap.
    #[serde(default)]
    pub images: BTreeMap<String, PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CytometryParams {
    pub nuclei_channel_name: String,
    #[serde(default)]
    pub membrane_channel_name: Option<String>,
    /// Channels quantified per cell; all channels when absent.
    #[serde(default)]
    pub channels: Option<Vec<String>>,
    #[serde(default)]
    pub segmentation_params: SegmentationParams,
    #[serde(default)]
    pub quantification_params: QuantificationParams,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SegmentationParams {
    pub nuclei_sigma: f64,
    pub nuclei_min_size: usize,
    pub nuclei_min_intensity: f32,
    pub memb_min_dist: f64,
    pub memb_sigma: f64,
    pub memb_max_dist: Option<f64>,
    pub memb_hole_size: usize,
    pub memb_propagation_regularization: f64,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            nuclei_sigma: 1.0,
            nuclei_min_size: 12,
            nuclei_min_intensity: 0.0,
            memb_min_dist: 8.0,
            memb_sigma: 5.0,
            memb_max_dist: None,
            memb_hole_size: 20,
            memb_propagation_regularization: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct QuantificationParams {
    pub nucleus_intensity: bool,
    pub cell_graph: bool,
    pub cell_graph_distance: usize,
}

impl Default for QuantificationParams {
    fn default() -> Self {
        Self {
            nucleus_intensity: false,
            cell_graph: false,
            cell_graph_distance: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendPolicy {
    /// Each pixel comes from the tile whose center is nearest.
    #[default]
    HardCut,
    /// Feathered weighted average across the overlap band.
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipPolicy {
    /// Tile whose core holds the largest fraction of the cell.
    #[default]
    CoreFraction,
    LowestIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    Partial,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MontageParams {
    pub blend: BlendPolicy,
    pub ownership: OwnershipPolicy,
    pub match_min_overlap_px: usize,
    /// Minimum intersection over union of two cells' footprints inside the
    /// shared band for them to count as one cell.
    pub match_min_iou: f64,
    pub origin_tolerance_px: f64,
    pub on_tile_failure: FailurePolicy,
}

impl Default for MontageParams {
    fn default() -> Self {
        Self {
            blend: BlendPolicy::HardCut,
            ownership: OwnershipPolicy::CoreFraction,
            match_min_overlap_px: 1,
            match_min_iou: 0.5,
            origin_tolerance_px: 0.5,
            on_tile_failure: FailurePolicy::Partial,
        }
    }
}

/// Location of a named channel in the acquisition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelRef {
    /// 0-based cycle.
    pub cycle: u32,
    /// 0-based channel within the cycle.
    pub channel: u32,
    pub emission_wavelength: Option<f64>,
}

pub type ChannelMap = BTreeMap<String, ChannelRef>;

/// Objective and sampling parameters attached to every output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Optics {
    pub magnification: f64,
    pub numerical_aperture: f64,
    pub axial_resolution_nm: f64,
    pub lateral_resolution_nm: f64,
    pub objective_type: String,
    pub immersion_refractive_index: f64,
}

pub fn immersion_refractive_index(objective_type: &str) -> Result<f64> {
    match objective_type {
        "air" => Ok(1.0),
        "water" => Ok(1.33),
        "oil" => Ok(1.5115),
        other => Err(Error::Configuration(format!(
            "objective type {:?} is not valid (must be air, water, or oil)",
            other
        ))),
    }
}

fn is_placeholder(name: &str) -> bool {
    name.eq_ignore_ascii_case("blank") || name.eq_ignore_ascii_case("empty")
}

impl ExperimentConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let cfg: ExperimentConfig = serde_yaml::from_str(s)
            .map_err(|e| Error::Configuration(format!("invalid experiment file: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&s)
    }

    pub fn validate(&self) -> Result<()> {
        let acq = &self.acquisition;
        self.grid()?;
        if acq.region_names.is_empty() {
            return Err(Error::Configuration("region_names must not be empty".into()));
        }
        if acq.num_cycles == 0 || acq.num_z_planes == 0 {
            return Err(Error::Configuration(
                "num_cycles and num_z_planes must be positive".into(),
            ));
        }
        if acq.numerical_aperture <= 0.0 || acq.lateral_resolution <= 0.0 {
            return Err(Error::Configuration(
                "numerical_aperture and lateral_resolution must be positive".into(),
            ));
        }
        immersion_refractive_index(&acq.objective_type)?;
        let channels = self.channel_map()?;

        let require = |name: &str, what: &str| -> Result<()> {
            if channels.contains_key(name) {
                Ok(())
            } else {
                Err(Error::Configuration(format!(
                    "{} channel {:?} is not an acquired channel",
                    what, name
                )))
            }
        };
        if let Some(bf) = &self.processor.best_focus {
            require(&bf.channel, "best focus")?;
        }
        if let Some(cyto) = &self.processor.cytometry {
            require(&cyto.nuclei_channel_name, "nucleus")?;
            if let Some(m) = &cyto.membrane_channel_name {
                require(m, "membrane")?;
            }
            for c in cyto.channels.iter().flatten() {
                require(c, "quantified")?;
            }
            let sp = &cyto.segmentation_params;
            if sp.memb_propagation_regularization < 0.0 || sp.memb_min_dist < 0.0 {
                return Err(Error::Configuration(
                    "segmentation distances and regularization must be non-negative".into(),
                ));
            }
        } else if self.processor.args.run_cytometry {
            return Err(Error::Configuration(
                "run_cytometry is set but processor.cytometry is missing".into(),
            ));
        }
        if let Some(ic) = &self.processor.illumination_correction {
            for (source, target) in &ic.channel_mapping {
                require(source, "illumination source")?;
                if target != "all" {
                    require(target, "illumination target")?;
                }
            }
        }
        if self.processor.args.workers == Some(0) {
            return Err(Error::Configuration("workers must be positive".into()));
        }
        if let FocalStrategy::Fixed(z) = self.focal_strategy()? {
            if z >= acq.num_z_planes as usize {
                return Err(Error::Configuration(format!(
                    "fixed z plane {} is outside the {} acquired planes",
                    z, acq.num_z_planes
                )));
            }
        }
        let iou = self.processor.montage.match_min_iou;
        if !(0.0..=1.0).contains(&iou) {
            return Err(Error::Configuration(format!(
                "match_min_iou must lie in [0, 1], got {}",
                iou
            )));
        }

        let mut extract_names = Vec::new();
        for op in &self.operator {
            if let Some(ex) = &op.extract {
                for c in &ex.channels {
                    if let ExtractChannel::Processed(name) = ExtractChannel::parse(c)? {
                        require(&name, "extract")?;
                    }
                }
                extract_names.push(ex.name.as_str());
            }
        }
        for op in &self.operator {
            if let Some(m) = &op.montage {
                if !extract_names.contains(&m.extract_name.as_str()) {
                    return Err(Error::Configuration(format!(
                        "montage {:?} refers to unknown extract {:?}",
                        m.name, m.extract_name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn grid(&self) -> Result<GridModel> {
        let a = &self.acquisition;
        GridModel::new(
            a.region_width,
            a.region_height,
            a.tile_width,
            a.tile_height,
            a.tile_overlap_x,
            a.tile_overlap_y,
            a.tiling_mode,
        )
    }

    /// Channel names resolved to (cycle, channel) positions. Cycles are merged
    /// by name, so every non-placeholder name must be unique.
    pub fn channel_map(&self) -> Result<ChannelMap> {
        let a = &self.acquisition;
        let per_cycle = a.per_cycle_channel_names.len();
        if per_cycle == 0 {
            return Err(Error::Configuration(
                "per_cycle_channel_names must not be empty".into(),
            ));
        }
        if a.channel_names.len() != per_cycle * a.num_cycles as usize {
            return Err(Error::Configuration(format!(
                "expected {} channel names ({} cycles x {} channels), got {}",
                per_cycle * a.num_cycles as usize,
                a.num_cycles,
                per_cycle,
                a.channel_names.len()
            )));
        }
        if !a.emission_wavelengths.is_empty() && a.emission_wavelengths.len() != per_cycle {
            return Err(Error::Configuration(format!(
                "expected {} emission wavelengths, got {}",
                per_cycle,
                a.emission_wavelengths.len()
            )));
        }
        let mut map = ChannelMap::new();
        for (i, name) in a.channel_names.iter().enumerate() {
            if is_placeholder(name) {
                continue;
            }
            let channel = (i % per_cycle) as u32;
            let entry = ChannelRef {
                cycle: (i / per_cycle) as u32,
                channel,
                emission_wavelength: a.emission_wavelengths.get(channel as usize).copied(),
            };
            if map.insert(name.clone(), entry).is_some() {
                return Err(Error::Configuration(format!(
                    "channel name {:?} appears more than once",
                    name
                )));
            }
        }
        Ok(map)
    }

    pub fn optics(&self) -> Result<Optics> {
        let a = &self.acquisition;
        Ok(Optics {
            magnification: a.magnification,
            numerical_aperture: a.numerical_aperture,
            axial_resolution_nm: a.axial_resolution,
            lateral_resolution_nm: a.lateral_resolution,
            objective_type: a.objective_type.clone(),
            immersion_refractive_index: immersion_refractive_index(&a.objective_type)?,
        })
    }

    pub fn focal_strategy(&self) -> Result<FocalStrategy> {
        let stats = self
            .analysis
            .iter()
            .find_map(|a| a.aggregate_cytometry_statistics.as_ref());
        match stats {
            Some(AggregateStatistics {
                mode: StatisticsMode::FixedZPlane,
                z_plane: Some(z),
            }) => Ok(FocalStrategy::Fixed(*z)),
            Some(AggregateStatistics {
                mode: StatisticsMode::FixedZPlane,
                z_plane: None,
            }) => Err(Error::Configuration(
                "fixed_z_plane mode needs a z_plane".into(),
            )),
            _ if self.processor.args.run_best_focus => Ok(FocalStrategy::BestZPlane),
            _ => Ok(FocalStrategy::Middle),
        }
    }

    /// Channel driving best-focus selection: the configured one, else the
    /// nucleus channel, else the first acquired channel.
    pub fn focus_channel(&self) -> Result<String> {
        if let Some(bf) = &self.processor.best_focus {
            return Ok(bf.channel.clone());
        }
        if let Some(c) = &self.processor.cytometry {
            return Ok(c.nuclei_channel_name.clone());
        }
        self.channel_map()?
            .keys()
            .next()
            .cloned()
            .ok_or_else(|| Error::Configuration("no acquired channels".into()))
    }

    pub fn montages(&self) -> impl Iterator<Item = &MontageOp> {
        self.operator.iter().filter_map(|o| o.montage.as_ref())
    }
}
