//! Run orchestration: per-tile stages on a worker pool, then one montage per
//! region once its task group has joined.
//!
//! Per tile: focal selection -> correction (holding a device) -> segmentation
//! -> quantification. Every stage output is recorded in the artifact store.

use ndarray::{ArrayView2, Axis};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::artifacts::{Artifact, ArtifactKey, ArtifactKind, ArtifactStore, MaskKind};
use crate::barrier::{OutcomeSummary, RegionBarrier, TileOutcome};
use crate::config::{
    ChannelMap, CytometryParams, ExperimentConfig, ExtractChannel, FailurePolicy, Optics,
};
use crate::correct::{Deconvolution, IlluminationCorrection, TileCorrector};
use crate::devices::DevicePool;
use crate::error::{Error, Result};
use crate::focus::{FocalStrategy, FocusSelector};
use crate::grid::{GridModel, TileGeometry};
use crate::montage::{FailedTile, Montage, Montager};
use crate::plane::Plane;
use crate::quantify::Quantifier;
use crate::segment::{Segmenter, TileMasks};
use crate::tile::{TileResult, TileSource};

/// Outcome of one region.
#[derive(Debug, Serialize)]
pub struct RegionReport {
    pub region: String,
    pub tiles: Vec<OutcomeSummary>,
    pub failed: Vec<FailedTile>,
    pub partial: bool,
    /// Set when a tile failed under the `abort` policy; no montage was built.
    pub aborted: bool,
    /// Region-fatal error (inconsistent geometry), if any.
    pub error: Option<String>,
    pub cells: usize,
    #[serde(skip)]
    pub montage: Option<Montage>,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub experiment: String,
    pub grid: GridModel,
    pub optics: Optics,
    pub regions: Vec<RegionReport>,
}

pub struct Pipeline {
    config: ExperimentConfig,
    grid: GridModel,
    channels: ChannelMap,
    strategy: FocalStrategy,
    focus: FocusSelector,
    corrector: TileCorrector,
    segmenter: Option<Segmenter>,
    quantifier: Quantifier,
    montager: Montager,
    devices: DevicePool,
    barrier: RegionBarrier,
    store: ArtifactStore,
    pool: rayon::ThreadPool,
    /// Channels corrected per tile.
    processed: Vec<String>,
    /// Channels measured per cell.
    quantified: Vec<String>,
    /// Corrected channels kept for image montages.
    retained: BTreeSet<String>,
    /// Mask overlays kept per tile.
    overlays: BTreeSet<MaskKind>,
}

impl Pipeline {
    /// `illumination` holds the fitted surface of every mapped source channel;
    /// it may be empty when illumination correction is off.
    pub fn new(config: ExperimentConfig, illumination: BTreeMap<String, Plane>) -> Result<Self> {
        config.validate()?;
        let grid = config.grid()?;
        let channels = config.channel_map()?;
        let optics = config.optics()?;
        let args = &config.processor.args;

        let mut corrector = TileCorrector::new(channels.clone(), optics);
        if args.run_illumination_correction {
            let params = config.processor.illumination_correction.as_ref().ok_or_else(|| {
                Error::Configuration(
                    "run_illumination_correction is set but processor.illumination_correction is missing"
                        .into(),
                )
            })?;
            corrector = corrector.with_op(Box::new(IlluminationCorrection::from_params(
                params,
                illumination,
                &grid,
            )?));
        }
        if args.run_deconvolution {
            corrector = corrector.with_op(Box::new(Deconvolution::new(&config.processor.deconvolution)));
        }

        let cytometry = config.processor.cytometry.as_ref().filter(|_| args.run_cytometry);
        let segmenter = cytometry.map(|c| Segmenter::new(c.segmentation_params.clone()));
        let quantifier = Quantifier::new(
            cytometry
                .map(|c| c.quantification_params.clone())
                .unwrap_or_default(),
        );

        let ChannelPlan {
            processed,
            quantified,
            retained,
            overlays,
        } = plan_channels(&config, &channels, cytometry)?;

        let workers = args.workers.unwrap_or_else(|| {
            if args.gpus.is_empty() {
                std::thread::available_parallelism().map_or(1, |n| n.get())
            } else {
                args.gpus.len()
            }
        });
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("tilecyte-worker-{}", i))
            .build()
            .map_err(|e| Error::Configuration(format!("cannot start worker pool: {}", e)))?;

        let devices = DevicePool::new(&args.gpus);
        tracing::info!(
            experiment = %config.name,
            workers,
            devices = devices.size(),
            corrections = ?corrector.op_names(),
            "pipeline ready"
        );

        Ok(Self {
            grid,
            strategy: config.focal_strategy()?,
            focus: FocusSelector::new(config.focus_channel()?),
            devices,
            montager: Montager::new(grid, config.processor.montage.clone()),
            corrector,
            segmenter,
            quantifier,
            barrier: RegionBarrier::new(),
            store: ArtifactStore::new(),
            pool,
            processed,
            quantified,
            retained,
            overlays,
            channels,
            config,
        })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn grid(&self) -> &GridModel {
        &self.grid
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    fn cytometry(&self) -> Option<&CytometryParams> {
        self.config.processor.cytometry.as_ref()
    }

    fn record(&self, region: &str, cycle: u32, tile: usize, kind: ArtifactKind, artifact: Artifact) -> Result<()> {
        self.store
            .record(ArtifactKey::new(region, cycle, tile, kind), artifact)
            .map(|_| ())
    }

    /// All stages for one tile.
    pub fn process_tile(
        &self,
        region: &str,
        geometry: &TileGeometry,
        source: &dyn TileSource,
    ) -> Result<TileResult> {
        let index = geometry.index;
        let tile = source.load(region, geometry)?;
        let focal = self.focus.resolve(&tile, self.strategy)?;
        self.record(region, 0, index, ArtifactKind::Focus, Artifact::Focus(focal.clone()))?;

        let mut corrected: BTreeMap<String, Plane> = BTreeMap::new();
        for name in &self.processed {
            let stack = tile.channel(name)?;
            if focal.z >= stack.dim().0 {
                return Err(Error::InsufficientData(format!(
                    "channel {:?} of {} has no z plane {}",
                    name,
                    tile.id(),
                    focal.z
                )));
            }
            let raw = stack.index_axis(Axis(0), focal.z);
            let plane = {
                let device = self.devices.acquire();
                tracing::trace!(channel = %name, device = ?device.as_ref().map(|d| d.device()), "correcting");
                self.corrector.correct(name, raw, geometry)?
            };
            let cycle = self.channels.get(name).map_or(0, |c| c.cycle);
            self.record(
                region,
                cycle,
                index,
                ArtifactKind::Corrected(name.clone()),
                Artifact::Corrected(plane.clone()),
            )?;
            corrected.insert(name.clone(), plane);
        }

        let (masks, records) = match (&self.segmenter, self.cytometry()) {
            (Some(segmenter), Some(cyto)) => {
                let nucleus = corrected_plane(&corrected, &cyto.nuclei_channel_name)?;
                let membrane = match &cyto.membrane_channel_name {
                    Some(m) => Some(corrected_plane(&corrected, m)?),
                    None => None,
                };
                let masks = segmenter.segment(nucleus, membrane)?;
                let planes = self
                    .quantified
                    .iter()
                    .map(|c| corrected_plane(&corrected, c).map(|p| (c.as_str(), p)))
                    .collect::<Result<Vec<_>>>()?;
                let records = self.quantifier.quantify(&masks, &planes)?;
                (masks, records)
            }
            _ => (TileMasks::empty(geometry.height, geometry.width), Vec::new()),
        };
        for &kind in &self.overlays {
            let labels = match kind {
                MaskKind::Nucleus => masks.nuclei.clone(),
                MaskKind::Cell => masks.cells.clone(),
            };
            self.record(region, 0, index, ArtifactKind::Mask(kind), Artifact::Labels(labels))?;
        }
        self.record(region, 0, index, ArtifactKind::Records, Artifact::Records(records.clone()))?;
        tracing::debug!(tile = %tile.id(), z = focal.z, cells = records.len(), "tile processed");

        let planes = corrected
            .into_iter()
            .filter(|(name, _)| self.retained.contains(name))
            .collect();
        Ok(TileResult {
            geometry: *geometry,
            focal,
            masks,
            records,
            planes,
        })
    }

    /// Process `tiles` of one region in parallel, join, then merge.
    pub fn run_region(
        &self,
        region: &str,
        tiles: &[usize],
        source: &dyn TileSource,
        progress: &(dyn Fn(f64, &str) + Sync),
    ) -> Result<RegionReport> {
        let geometries = tiles
            .iter()
            .map(|&i| self.grid.tile(i))
            .collect::<Result<Vec<_>>>()?;
        let abort = self.montager.params().on_tile_failure == FailurePolicy::Abort;
        let total = geometries.len();
        let done = AtomicUsize::new(0);
        self.barrier.open(region, total)?;

        let outcomes = self.pool.in_place_scope(|scope| {
            for g in &geometries {
                let done = &done;
                scope.spawn(move |_| {
                    let outcome = if self.barrier.is_cancelled(region) {
                        TileOutcome::Cancelled {
                            index: g.index,
                            coord: g.coord,
                        }
                    } else {
                        match self.process_tile(region, g, source) {
                            Ok(r) => TileOutcome::Completed(Box::new(r)),
                            Err(e) => {
                                if e.is_tile_local() {
                                    tracing::warn!(region, tile = g.index, error = %e, "tile failed");
                                } else {
                                    tracing::error!(region, tile = g.index, error = %e, "tile failed");
                                }
                                if abort {
                                    self.barrier.cancel(region);
                                }
                                TileOutcome::Failed {
                                    index: g.index,
                                    coord: g.coord,
                                    kind: e.kind(),
                                    reason: e.to_string(),
                                }
                            }
                        }
                    };
                    if let Err(e) = self.barrier.complete(region, outcome) {
                        tracing::error!(region, tile = g.index, error = %e, "outcome not recorded");
                    }
                    let n = done.fetch_add(1, Ordering::SeqCst) + 1;
                    progress(
                        n as f64 / total.max(1) as f64,
                        &format!("Processed tile {}/{} of {}", n, total, region),
                    );
                });
            }
            self.barrier.join(region)
        })?;

        let mut summaries = Vec::with_capacity(outcomes.len());
        let mut results = Vec::new();
        let mut failed = Vec::new();
        for outcome in outcomes {
            summaries.push(outcome.summary());
            match outcome {
                TileOutcome::Completed(r) => results.push(*r),
                TileOutcome::Failed {
                    index, coord, reason, ..
                } => failed.push(FailedTile {
                    index,
                    coord,
                    reason,
                }),
                TileOutcome::Cancelled { index, coord } => failed.push(FailedTile {
                    index,
                    coord,
                    reason: "cancelled after an earlier tile failed".into(),
                }),
            }
        }

        let mut report = RegionReport {
            region: region.to_string(),
            tiles: summaries,
            partial: !failed.is_empty(),
            aborted: abort && !failed.is_empty(),
            failed: failed.clone(),
            error: None,
            cells: 0,
            montage: None,
        };
        if report.aborted {
            tracing::warn!(region, failed = report.failed.len(), "region aborted; no montage");
            return Ok(report);
        }
        match self.montager.merge(region, &results, failed) {
            Ok(m) => {
                report.cells = m.cells.len();
                report.montage = Some(m);
            }
            Err(e @ Error::InconsistentGeometry(_)) => {
                tracing::error!(region, error = %e, "region geometry is inconsistent");
                report.error = Some(e.to_string());
            }
            Err(e) => return Err(e),
        }
        Ok(report)
    }

    /// Run the selected regions (indices into `region_names`) one after another.
    pub fn run(
        &self,
        regions: &[usize],
        tiles: &[usize],
        source: &dyn TileSource,
        progress: &(dyn Fn(f64, &str) + Sync),
    ) -> Result<RunReport> {
        let mut reports = Vec::with_capacity(regions.len());
        for &r in regions {
            let name = self.config.acquisition.region_names.get(r).ok_or_else(|| {
                Error::Configuration(format!("region index {} out of range", r))
            })?;
            tracing::info!(region = %name, tiles = tiles.len(), "processing region");
            reports.push(self.run_region(name, tiles, source, progress)?);
        }
        Ok(RunReport {
            experiment: self.config.name.clone(),
            grid: self.grid,
            optics: self.config.optics()?,
            regions: reports,
        })
    }
}

fn corrected_plane<'a>(corrected: &'a BTreeMap<String, Plane>, name: &str) -> Result<ArrayView2<'a, f32>> {
    corrected
        .get(name)
        .map(|p| p.view())
        .ok_or_else(|| Error::UnmappedChannel {
            channel: name.to_string(),
            mapping: "corrected plane",
        })
}

struct ChannelPlan {
    processed: Vec<String>,
    quantified: Vec<String>,
    retained: BTreeSet<String>,
    overlays: BTreeSet<MaskKind>,
}

/// Without extract operations every corrected channel and both overlays are
/// kept; otherwise only what some extract names.
fn plan_channels(
    config: &ExperimentConfig,
    channels: &ChannelMap,
    cytometry: Option<&CytometryParams>,
) -> Result<ChannelPlan> {
    let all: Vec<String> = channels.keys().cloned().collect();
    let mut processed = BTreeSet::new();
    let mut quantified = Vec::new();
    if let Some(c) = cytometry {
        processed.insert(c.nuclei_channel_name.clone());
        processed.extend(c.membrane_channel_name.iter().cloned());
        quantified = c.channels.clone().unwrap_or_else(|| all.clone());
        processed.extend(quantified.iter().cloned());
    }

    let mut montaged = BTreeSet::new();
    let mut overlays = BTreeSet::new();
    let montage_extracts: BTreeSet<&str> = config.montages().map(|m| m.extract_name.as_str()).collect();
    let extracts: Vec<_> = config.operator.iter().filter_map(|o| o.extract.as_ref()).collect();
    for op in &extracts {
        for c in &op.channels {
            match ExtractChannel::parse(c)? {
                ExtractChannel::Processed(name) => {
                    processed.insert(name.clone());
                    if montage_extracts.contains(op.name.as_str()) {
                        montaged.insert(name);
                    }
                }
                ExtractChannel::NucleusMask => {
                    overlays.insert(MaskKind::Nucleus);
                }
                ExtractChannel::CellMask => {
                    overlays.insert(MaskKind::Cell);
                }
            }
        }
    }
    if extracts.is_empty() {
        overlays.extend([MaskKind::Nucleus, MaskKind::Cell]);
    }
    if processed.is_empty() {
        processed.extend(all);
    }
    let retained = if montage_extracts.is_empty() {
        processed.clone()
    } else {
        montaged
    };
    Ok(ChannelPlan {
        processed: processed.into_iter().collect(),
        quantified,
        retained,
        overlays,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::EXAMPLE;
    use crate::test_utils::{membrane_plane, nuclei_plane};
    use crate::tile::TileStack;
    use ndarray::{stack, Array2, Array3};
    use parking_lot::Mutex;

    struct MemorySource {
        tiles: BTreeMap<usize, TileStack>,
    }

    impl TileSource for MemorySource {
        fn load(&self, region: &str, geometry: &TileGeometry) -> Result<TileStack> {
            self.tiles.get(&geometry.index).cloned().ok_or_else(|| {
                Error::InsufficientData(format!("no data for {}/tile{:05}", region, geometry.index))
            })
        }
    }

    /// Three z planes; only the middle one carries structure.
    fn z_stack(sharp: &Array2<f32>) -> Array3<f32> {
        let flat = Array2::<f32>::from_elem(sharp.dim(), 10.0);
        stack(Axis(0), &[flat.view(), sharp.view(), flat.view()]).unwrap()
    }

    fn source(grid: &GridModel, indices: &[usize], with_nucleus: bool) -> MemorySource {
        let (h, w) = (grid.tile_height, grid.tile_width);
        let centers = [(20.0, 16.0)];
        let nucleus = if with_nucleus {
            z_stack(&nuclei_plane(h, w, &centers, 4.0))
        } else {
            Array3::zeros((3, h, w))
        };
        let membrane = membrane_plane(h, w, &centers, 9.0);
        let marker = Array2::from_shape_fn((h, w), |(y, x)| (x + y) as f32);
        let tiles = indices
            .iter()
            .map(|&i| {
                let g = grid.tile(i).unwrap();
                let stack = TileStack::new("Region1", g)
                    .with_channel("DAPI1", nucleus.clone())
                    .unwrap()
                    .with_channel("CD45", z_stack(&membrane))
                    .unwrap()
                    .with_channel("CD4", z_stack(&marker))
                    .unwrap();
                (i, stack)
            })
            .collect();
        MemorySource { tiles }
    }

    fn config(doc: &str) -> ExperimentConfig {
        ExperimentConfig::from_yaml_str(&doc.replace("memb_max_dist: null", "memb_max_dist: 5")).unwrap()
    }

    fn quiet(_: f64, _: &str) {}

    #[test]
    fn empty_single_tile_region_yields_no_cells() {
        let cfg = config(&EXAMPLE.replace("region_width: 2", "region_width: 1"));
        let pipeline = Pipeline::new(cfg, BTreeMap::new()).unwrap();
        let src = source(pipeline.grid(), &[0], false);
        let report = pipeline.run(&[0], &[0], &src, &quiet).unwrap();
        let region = &report.regions[0];
        assert!(region.failed.is_empty(), "{:?}", region.failed);
        assert_eq!(region.cells, 0);
        let montage = region.montage.as_ref().unwrap();
        assert!(montage.cells.is_empty());
        assert!(!montage.partial);
    }

    #[test]
    fn two_tiles_two_nuclei() {
        let pipeline = Pipeline::new(config(EXAMPLE), BTreeMap::new()).unwrap();
        let grid = *pipeline.grid();
        let src = source(&grid, &[0, 1], true);
        let messages = Mutex::new(Vec::new());
        let progress = |p: f64, m: &str| messages.lock().push((p, m.to_string()));
        let report = pipeline.run(&[0], &[0, 1], &src, &progress).unwrap();

        let region = &report.regions[0];
        assert!(region.failed.is_empty(), "{:?}", region.failed);
        let montage = region.montage.as_ref().unwrap();
        assert_eq!(montage.cells.len(), 2);
        let (a, b) = (&montage.cells[0], &montage.cells[1]);
        assert_ne!(a.id, b.id);
        assert_eq!((a.tile_index, b.tile_index), (0, 1));
        let step = (grid.tile_width - grid.overlap_x) as f64;
        assert!((b.x - a.x - step).abs() < 1e-9);
        assert!((b.y - a.y).abs() < 1e-9);
        assert!(a.record.nucleus_intensity.is_some());
        assert_eq!(a.record.cell_intensity.len(), 3);

        // Extract/montage retains only the extracted processed channels.
        assert_eq!(
            montage.images.keys().cloned().collect::<Vec<_>>(),
            vec!["CD4".to_string(), "DAPI1".to_string()]
        );
        let focus = pipeline
            .store()
            .get(&ArtifactKey::new("Region1", 0, 0, ArtifactKind::Focus));
        match focus.as_deref() {
            Some(Artifact::Focus(f)) => assert_eq!(f.z, 1),
            other => panic!("unexpected {:?}", other),
        }
        assert!(pipeline
            .store()
            .get(&ArtifactKey::new("Region1", 1, 1, ArtifactKind::Corrected("CD4".into())))
            .is_some());
        assert_eq!(messages.lock().len(), 2);
    }

    #[test]
    fn overlap_free_tiles_offset_by_the_tile_width() {
        let doc = EXAMPLE.replace("tile_overlap_x: 8", "tile_overlap_x: 0");
        let pipeline = Pipeline::new(config(&doc), BTreeMap::new()).unwrap();
        let grid = *pipeline.grid();
        assert_eq!(grid.region_size(), (2 * grid.tile_width, grid.tile_height));
        let src = source(&grid, &[0, 1], true);
        let report = pipeline.run(&[0], &[0, 1], &src, &quiet).unwrap();

        let montage = report.regions[0].montage.as_ref().unwrap();
        assert_eq!(montage.cells.len(), 2);
        let (a, b) = (&montage.cells[0], &montage.cells[1]);
        assert_eq!((a.id, b.id), (1, 2));
        assert!((b.x - a.x - grid.tile_width as f64).abs() < 1e-9);
        assert!((b.y - a.y).abs() < 1e-9);
    }

    #[test]
    fn failed_tiles_make_a_partial_montage() {
        let pipeline = Pipeline::new(config(EXAMPLE), BTreeMap::new()).unwrap();
        let src = source(pipeline.grid(), &[1], true);
        let report = pipeline.run(&[0], &[0, 1], &src, &quiet).unwrap();
        let region = &report.regions[0];
        assert!(region.partial);
        assert!(!region.aborted);
        assert_eq!(region.failed.len(), 1);
        assert_eq!(region.failed[0].index, 0);
        let montage = region.montage.as_ref().unwrap();
        assert!(montage.partial);
        assert_eq!(montage.cells.len(), 1);
        assert_eq!(
            region.tiles[0],
            OutcomeSummary::Failed {
                index: 0,
                kind: "insufficient_data".into(),
                reason: "insufficient data: no data for Region1/tile00000".into(),
            }
        );
    }

    #[test]
    fn abort_policy_skips_the_montage() {
        let doc = EXAMPLE.replace(
            "  best_focus: {channel: DAPI1}",
            "  best_focus: {channel: DAPI1}\n  montage: {on_tile_failure: abort}",
        );
        let pipeline = Pipeline::new(config(&doc), BTreeMap::new()).unwrap();
        let src = source(pipeline.grid(), &[1], true);
        let report = pipeline.run(&[0], &[0, 1], &src, &quiet).unwrap();
        let region = &report.regions[0];
        assert!(region.aborted);
        assert!(region.montage.is_none());
        assert!(!region.failed.is_empty());
    }

    fn overlays_recorded(pipeline: &Pipeline) -> Vec<MaskKind> {
        [MaskKind::Nucleus, MaskKind::Cell]
            .into_iter()
            .filter(|&k| {
                pipeline
                    .store()
                    .get(&ArtifactKey::new("Region1", 0, 0, ArtifactKind::Mask(k)))
                    .is_some()
            })
            .collect()
    }

    #[test]
    fn extract_selects_the_mask_overlays() {
        // The example extract names only cyto_cell_mask.
        let pipeline = Pipeline::new(config(EXAMPLE), BTreeMap::new()).unwrap();
        let src = source(pipeline.grid(), &[0, 1], true);
        pipeline.run(&[0], &[0], &src, &quiet).unwrap();
        assert_eq!(overlays_recorded(&pipeline), vec![MaskKind::Cell]);

        let doc = EXAMPLE.replace("proc_CD4, cyto_cell_mask]", "proc_CD4, cyto_nucleus_mask]");
        let pipeline = Pipeline::new(config(&doc), BTreeMap::new()).unwrap();
        pipeline.run(&[0], &[0], &src, &quiet).unwrap();
        assert_eq!(overlays_recorded(&pipeline), vec![MaskKind::Nucleus]);

        let doc = EXAMPLE.replace("proc_CD4, cyto_cell_mask]", "proc_CD4]");
        let pipeline = Pipeline::new(config(&doc), BTreeMap::new()).unwrap();
        let report = pipeline.run(&[0], &[0], &src, &quiet).unwrap();
        assert!(overlays_recorded(&pipeline).is_empty());
        // The montage still sees the segmentation.
        assert_eq!(report.regions[0].cells, 1);
    }

    #[test]
    fn without_extracts_both_overlays_are_kept() {
        let start = EXAMPLE.find("operator:").unwrap();
        let end = EXAMPLE.find("analysis:").unwrap();
        let doc = format!("{}{}", &EXAMPLE[..start], &EXAMPLE[end..]);
        let pipeline = Pipeline::new(config(&doc), BTreeMap::new()).unwrap();
        let src = source(pipeline.grid(), &[0], true);
        pipeline.run(&[0], &[0], &src, &quiet).unwrap();
        assert_eq!(overlays_recorded(&pipeline), vec![MaskKind::Nucleus, MaskKind::Cell]);
    }

    #[test]
    fn illumination_requires_its_parameters() {
        let doc = EXAMPLE.replace("run_cytometry: true", "run_cytometry: true\n    run_illumination_correction: true");
        assert!(matches!(
            Pipeline::new(config(&doc), BTreeMap::new()),
            Err(Error::Configuration(_))
        ));
    }
}
