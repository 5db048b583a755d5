//! Per-channel plane corrections.
//!
//! Each correction is a [`CorrectionOp`]: deterministic for fixed parameters
//! and shape-preserving. The fitted models (illumination surfaces, PSFs) come
//! from outside; this module only applies them.

use ndarray::{s, Array2, ArrayView2};
use std::collections::BTreeMap;

use crate::config::{ChannelMap, DeconvolutionParams, IlluminationParams, Optics};
use crate::error::{Error, Result};
use crate::grid::{GridModel, TileGeometry};
use crate::plane::{convolve_separable, gaussian_kernel, Plane};

const U16_MAX: f32 = 65535.0;
const RL_EPS: f32 = 1e-6;

/// What a correction needs to know about the plane it is handed.
#[derive(Debug, Clone, Copy)]
pub struct ChannelParams<'a> {
    pub channel: &'a str,
    pub geometry: &'a TileGeometry,
    pub emission_wavelength: Option<f64>,
    pub optics: &'a Optics,
}

pub trait CorrectionOp: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, plane: ArrayView2<f32>, params: &ChannelParams<'_>) -> Result<Plane>;
}

/// Divides target planes by a fitted illumination surface.
///
/// Surfaces are fitted on the tiles laid side by side without overlap, so a
/// surface is `region_height * tile_height` by `region_width * tile_width`
/// and the patch of tile (row, col) starts at `(row * tile_height, col * tile_width)`.
pub struct IlluminationCorrection {
    /// Source channel -> target channel name or `all`.
    mapping: BTreeMap<String, String>,
    images: BTreeMap<String, Array2<f32>>,
}

impl IlluminationCorrection {
    pub fn new(
        mapping: BTreeMap<String, String>,
        images: BTreeMap<String, Array2<f32>>,
        grid: &GridModel,
    ) -> Result<Self> {
        let expected = (
            grid.region_height as usize * grid.tile_height,
            grid.region_width as usize * grid.tile_width,
        );
        for source in mapping.keys() {
            let Some(img) = images.get(source) else {
                return Err(Error::Configuration(format!(
                    "no illumination image for source channel {:?}",
                    source
                )));
            };
            if img.dim() != expected {
                return Err(Error::Configuration(format!(
                    "illumination image for {:?} is {}x{}, expected {}x{} (tiles laid side by side)",
                    source,
                    img.dim().1,
                    img.dim().0,
                    expected.1,
                    expected.0
                )));
            }
        }
        Ok(Self { mapping, images })
    }

    pub fn from_params(
        params: &IlluminationParams,
        images: BTreeMap<String, Array2<f32>>,
        grid: &GridModel,
    ) -> Result<Self> {
        Self::new(params.channel_mapping.clone(), images, grid)
    }

    fn sources_for<'a>(&'a self, channel: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.mapping
            .iter()
            .filter(move |(_, target)| target.as_str() == "all" || target.as_str() == channel)
            .map(|(source, _)| source.as_str())
    }
}

impl CorrectionOp for IlluminationCorrection {
    fn name(&self) -> &'static str {
        "illumination_correction"
    }

    /// Channels not named by any mapping pass through unchanged.
    fn apply(&self, plane: ArrayView2<f32>, params: &ChannelParams<'_>) -> Result<Plane> {
        let mut out = plane.to_owned();
        let g = params.geometry;
        let r = g.coord.row as usize * g.height;
        let c = g.coord.col as usize * g.width;
        for source in self.sources_for(params.channel) {
            let Some(img) = self.images.get(source) else {
                continue;
            };
            let (ih, iw) = img.dim();
            if r + g.height > ih || c + g.width > iw {
                return Err(Error::InsufficientData(format!(
                    "illumination image for {:?} ({}x{}) does not cover tile {}",
                    source, iw, ih, g.coord
                )));
            }
            let patch = img.slice(s![r..r + g.height, c..c + g.width]);
            tracing::trace!(source, target = params.channel, "applying illumination correction");
            ndarray::Zip::from(&mut out).and(&patch).for_each(|v, &f| {
                if f.is_finite() && f > 0.0 {
                    *v = (*v / f).clamp(0.0, U16_MAX);
                }
            });
        }
        Ok(out)
    }
}

/// Richardson-Lucy deconvolution with a Gaussian approximation of the
/// widefield PSF (sigma = 0.21 * lambda / NA).
pub struct Deconvolution {
    n_iter: usize,
    scale_factor: f32,
}

impl Deconvolution {
    pub fn new(params: &DeconvolutionParams) -> Self {
        Self {
            n_iter: params.n_iter,
            scale_factor: params.scale_factor,
        }
    }

    pub fn psf_sigma_px(wavelength_nm: f64, optics: &Optics) -> f64 {
        0.21 * wavelength_nm / optics.numerical_aperture / optics.lateral_resolution_nm
    }
}

impl CorrectionOp for Deconvolution {
    fn name(&self) -> &'static str {
        "deconvolution"
    }

    fn apply(&self, plane: ArrayView2<f32>, params: &ChannelParams<'_>) -> Result<Plane> {
        let wavelength = params.emission_wavelength.ok_or_else(|| Error::UnmappedChannel {
            channel: params.channel.to_string(),
            mapping: "emission wavelength",
        })?;
        let kernel = gaussian_kernel(Self::psf_sigma_px(wavelength, params.optics));
        let observed = plane.mapv(|v| v.max(0.0));
        let mut estimate = observed.clone();
        for _ in 0..self.n_iter {
            let blurred = convolve_separable(estimate.view(), &kernel);
            let ratio = ndarray::Zip::from(&observed)
                .and(&blurred)
                .map_collect(|&o, &b| o / b.max(RL_EPS));
            // Symmetric kernel: the flipped PSF is the PSF.
            let correction = convolve_separable(ratio.view(), &kernel);
            estimate.zip_mut_with(&correction, |e, &c| *e *= c);
        }
        if self.scale_factor != 1.0 {
            estimate.mapv_inplace(|v| v * self.scale_factor);
        }
        Ok(estimate)
    }
}

/// Applies the enabled corrections, in order, to requested channels of a tile.
pub struct TileCorrector {
    ops: Vec<Box<dyn CorrectionOp>>,
    channels: ChannelMap,
    optics: Optics,
}

impl TileCorrector {
    pub fn new(channels: ChannelMap, optics: Optics) -> Self {
        Self {
            ops: Vec::new(),
            channels,
            optics,
        }
    }

    pub fn with_op(mut self, op: Box<dyn CorrectionOp>) -> Self {
        self.ops.push(op);
        self
    }

    pub fn op_names(&self) -> Vec<&'static str> {
        self.ops.iter().map(|o| o.name()).collect()
    }

    pub fn correct(
        &self,
        channel: &str,
        plane: ArrayView2<f32>,
        geometry: &TileGeometry,
    ) -> Result<Plane> {
        let entry = self.channels.get(channel).ok_or_else(|| Error::UnmappedChannel {
            channel: channel.to_string(),
            mapping: "acquisition channel",
        })?;
        let params = ChannelParams {
            channel,
            geometry,
            emission_wavelength: entry.emission_wavelength,
            optics: &self.optics,
        };
        let mut out = plane.to_owned();
        for op in &self.ops {
            out = op.apply(out.view(), &params)?;
            debug_assert_eq!(out.dim(), plane.dim(), "{} changed plane shape", op.name());
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelRef;
    use crate::grid::{GridModel, TilingMode};

    fn optics() -> Optics {
        Optics {
            magnification: 20.0,
            numerical_aperture: 0.75,
            axial_resolution_nm: 1000.0,
            lateral_resolution_nm: 100.0,
            objective_type: "air".into(),
            immersion_refractive_index: 1.0,
        }
    }

    fn channels() -> ChannelMap {
        let mut m = ChannelMap::new();
        m.insert(
            "DAPI".into(),
            ChannelRef { cycle: 0, channel: 0, emission_wavelength: Some(425.0) },
        );
        m.insert(
            "CD4".into(),
            ChannelRef { cycle: 1, channel: 1, emission_wavelength: None },
        );
        m
    }

    fn all_from_dapi(surface: Array2<f32>, grid: &GridModel) -> Result<IlluminationCorrection> {
        let mut images = BTreeMap::new();
        images.insert("DAPI".to_string(), surface);
        let mut mapping = BTreeMap::new();
        mapping.insert("DAPI".to_string(), "all".to_string());
        IlluminationCorrection::new(mapping, images, grid)
    }

    #[test]
    fn illumination_uses_the_patch_at_the_tile_origin() {
        let grid = GridModel::new(2, 1, 4, 4, 0, 0, TilingMode::Snake).unwrap();
        let mut surface = Array2::<f32>::from_elem((4, 8), 1.0);
        surface.slice_mut(s![.., 4..]).fill(2.0);
        let corrector = TileCorrector::new(channels(), optics())
            .with_op(Box::new(all_from_dapi(surface, &grid).unwrap()));

        let plane = Array2::<f32>::from_elem((4, 4), 10.0);
        let left = corrector.correct("DAPI", plane.view(), &grid.tile(0).unwrap()).unwrap();
        let right = corrector.correct("CD4", plane.view(), &grid.tile(1).unwrap()).unwrap();
        assert!(left.iter().all(|&v| v == 10.0));
        assert!(right.iter().all(|&v| v == 5.0));
    }

    #[test]
    fn overlapping_tiles_read_the_side_by_side_patch() {
        // 3x2 tiles with 1 px overlap: the surface is 6 rows by 9 columns and
        // each tile's patch is marked with its column.
        let grid = GridModel::new(3, 2, 3, 3, 1, 1, TilingMode::Snake).unwrap();
        let surface = Array2::from_shape_fn((6, 9), |(_, x)| (x / 3 + 1) as f32);
        let corrector = TileCorrector::new(channels(), optics())
            .with_op(Box::new(all_from_dapi(surface, &grid).unwrap()));
        let plane = Array2::<f32>::from_elem((3, 3), 12.0);
        for index in 0..grid.num_tiles() {
            let tile = grid.tile(index).unwrap();
            let out = corrector.correct("DAPI", plane.view(), &tile).unwrap();
            let expected = 12.0 / (tile.coord.col + 1) as f32;
            assert!(out.iter().all(|&v| v == expected), "tile {}", tile.coord);
        }
    }

    #[test]
    fn illumination_image_must_match_the_side_by_side_extent() {
        let grid = GridModel::new(2, 1, 4, 4, 2, 0, TilingMode::Snake).unwrap();
        // The stitched extent (6 px wide) is not the fitted frame.
        let stitched = Array2::<f32>::ones((4, 6));
        assert!(matches!(all_from_dapi(stitched, &grid), Err(Error::Configuration(_))));
        assert!(all_from_dapi(Array2::<f32>::ones((4, 8)), &grid).is_ok());
    }

    #[test]
    fn missing_illumination_image_is_a_configuration_error() {
        let grid = GridModel::new(1, 1, 4, 4, 0, 0, TilingMode::Snake).unwrap();
        let mut mapping = BTreeMap::new();
        mapping.insert("DAPI".to_string(), "all".to_string());
        assert!(matches!(
            IlluminationCorrection::new(mapping, BTreeMap::new(), &grid),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn deconvolution_preserves_shape_and_is_deterministic() {
        let grid = GridModel::new(1, 1, 12, 10, 0, 0, TilingMode::Snake).unwrap();
        let mut plane = Array2::<f32>::from_elem((10, 12), 5.0);
        plane[[5, 6]] = 200.0;
        let corrector = TileCorrector::new(channels(), optics())
            .with_op(Box::new(Deconvolution::new(&DeconvolutionParams::default())));
        let tile = grid.tile(0).unwrap();
        let a = corrector.correct("DAPI", plane.view(), &tile).unwrap();
        let b = corrector.correct("DAPI", plane.view(), &tile).unwrap();
        assert_eq!(a.dim(), plane.dim());
        assert_eq!(a, b);
    }

    #[test]
    fn unmapped_channels_fail() {
        let grid = GridModel::new(1, 1, 4, 4, 0, 0, TilingMode::Snake).unwrap();
        let tile = grid.tile(0).unwrap();
        let plane = Array2::<f32>::ones((4, 4));
        let corrector = TileCorrector::new(channels(), optics())
            .with_op(Box::new(Deconvolution::new(&DeconvolutionParams::default())));
        assert!(matches!(
            corrector.correct("CD4", plane.view(), &tile),
            Err(Error::UnmappedChannel { .. })
        ));
        assert!(matches!(
            corrector.correct("Ki67", plane.view(), &tile),
            Err(Error::UnmappedChannel { .. })
        ));
    }
}
