//! Nucleus detection and membrane-guided cell propagation for one tile.
//!
//! Pipeline:
//!   1. Smooth the nucleus plane, Otsu-threshold it, label 8-connected blobs,
//!      drop blobs under `nuclei_min_size`.
//!   2. Suppress seeds whose centroids sit closer than `memb_min_dist` to a
//!      larger seed.
//!   3. Grow every seed outward over the smoothed membrane plane with a
//!      Dijkstra front (cost mixes distance and membrane intensity), bounded
//!      by `memb_max_dist`.
//!   4. Fill small enclosed background holes in the cell mask.
//!
//! Cell label `k` is always grown from nucleus label `k`.

use ndarray::{Array2, ArrayView2};
use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap};

use crate::config::SegmentationParams;
use crate::error::{Error, Result};
use crate::plane::{
    all_finite, connected_components, gaussian_blur, is_uniform, normalize_unit, offset,
    otsu_threshold, NEIGHBORS_4, NEIGHBORS_8,
};

/// Nucleus and cell labels for one tile. 0 is background.
#[derive(Debug, Clone, PartialEq)]
pub struct TileMasks {
    pub nuclei: Array2<u32>,
    pub cells: Array2<u32>,
    pub count: u32,
}

impl TileMasks {
    pub fn empty(h: usize, w: usize) -> Self {
        Self {
            nuclei: Array2::zeros((h, w)),
            cells: Array2::zeros((h, w)),
            count: 0,
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.cells.dim()
    }
}

pub trait SegmentationOp: Send + Sync {
    fn name(&self) -> &'static str;

    /// Without a membrane plane every cell is its nucleus.
    fn segment(
        &self,
        nucleus: ArrayView2<f32>,
        membrane: Option<ArrayView2<f32>>,
        params: &SegmentationParams,
    ) -> Result<TileMasks>;
}

/// Threshold-seeded nuclei grown by membrane-weighted front propagation.
#[derive(Debug, Default, Clone, Copy)]
pub struct WatershedPropagation;

impl SegmentationOp for WatershedPropagation {
    fn name(&self) -> &'static str {
        "watershed_propagation"
    }

    fn segment(
        &self,
        nucleus: ArrayView2<f32>,
        membrane: Option<ArrayView2<f32>>,
        params: &SegmentationParams,
    ) -> Result<TileMasks> {
        let (h, w) = nucleus.dim();
        if h == 0 || w == 0 {
            return Err(Error::DegenerateInput("empty nucleus plane".into()));
        }
        if let Some(m) = membrane {
            if m.dim() != nucleus.dim() {
                return Err(Error::DegenerateInput(format!(
                    "membrane plane {:?} does not match nucleus plane {:?}",
                    m.dim(),
                    nucleus.dim()
                )));
            }
        }
        if !all_finite(nucleus) || !membrane.map_or(true, all_finite) {
            return Err(Error::DegenerateInput("plane contains non-finite values".into()));
        }
        if is_uniform(nucleus) {
            let level = nucleus[[0, 0]];
            if level <= params.nuclei_min_intensity {
                return Ok(TileMasks::empty(h, w));
            }
            return Err(Error::DegenerateInput(format!(
                "nucleus plane is uniform at {}",
                level
            )));
        }

        let nuclei = detect_nuclei(nucleus, params);
        let count = nuclei.iter().copied().max().unwrap_or(0);
        if count == 0 {
            return Ok(TileMasks::empty(h, w));
        }
        let Some(membrane) = membrane else {
            return Ok(TileMasks {
                cells: nuclei.clone(),
                nuclei,
                count,
            });
        };
        if is_uniform(membrane) {
            return Err(Error::DegenerateInput(
                "membrane plane is uniform; propagation has nothing to follow".into(),
            ));
        }

        let guide = normalize_unit(gaussian_blur(membrane, params.memb_sigma).view());
        let mut cells = propagate(
            nuclei.view(),
            guide.view(),
            params.memb_propagation_regularization,
            params.memb_max_dist,
        );
        fill_holes(&mut cells, params.memb_hole_size);
        Ok(TileMasks {
            nuclei,
            cells,
            count,
        })
    }
}

pub struct Segmenter {
    op: Box<dyn SegmentationOp>,
    params: SegmentationParams,
}

impl Segmenter {
    pub fn new(params: SegmentationParams) -> Self {
        Self::with_op(Box::new(WatershedPropagation), params)
    }

    pub fn with_op(op: Box<dyn SegmentationOp>, params: SegmentationParams) -> Self {
        Self { op, params }
    }

    pub fn segment(
        &self,
        nucleus: ArrayView2<f32>,
        membrane: Option<ArrayView2<f32>>,
    ) -> Result<TileMasks> {
        let masks = self.op.segment(nucleus, membrane, &self.params)?;
        tracing::debug!(op = self.op.name(), cells = masks.count, "segmented tile");
        Ok(masks)
    }
}

struct Seed {
    label: u32,
    size: usize,
    cy: f64,
    cx: f64,
}

/// Labels 1..=n for the nuclei that survive size filtering and seed
/// separation, in raster order of their first pixel.
fn detect_nuclei(nucleus: ArrayView2<f32>, params: &SegmentationParams) -> Array2<u32> {
    let smoothed = gaussian_blur(nucleus, params.nuclei_sigma);
    let threshold = otsu_threshold(smoothed.view()).max(params.nuclei_min_intensity);
    let foreground = smoothed.mapv(|v| v > threshold);
    let (labels, n) = connected_components(foreground.view(), true);

    let mut seeds: Vec<Seed> = (1..=n)
        .map(|label| Seed {
            label,
            size: 0,
            cy: 0.0,
            cx: 0.0,
        })
        .collect();
    for ((y, x), &l) in labels.indexed_iter() {
        if l > 0 {
            let s = &mut seeds[l as usize - 1];
            s.size += 1;
            s.cy += y as f64;
            s.cx += x as f64;
        }
    }
    for s in &mut seeds {
        if s.size > 0 {
            s.cy /= s.size as f64;
            s.cx /= s.size as f64;
        }
    }
    seeds.retain(|s| s.size >= params.nuclei_min_size.max(1));

    // Larger seeds win; equal sizes keep the lower label.
    seeds.sort_by(|a, b| b.size.cmp(&a.size).then(a.label.cmp(&b.label)));
    let min_d2 = params.memb_min_dist * params.memb_min_dist;
    let mut kept: Vec<&Seed> = Vec::new();
    for s in &seeds {
        let crowded = kept
            .iter()
            .any(|k| (k.cy - s.cy).powi(2) + (k.cx - s.cx).powi(2) < min_d2);
        if !crowded {
            kept.push(s);
        }
    }
    let kept: BTreeSet<u32> = kept.iter().map(|s| s.label).collect();

    let mut remap = vec![0u32; n as usize + 1];
    for (new, &old) in kept.iter().enumerate() {
        remap[old as usize] = new as u32 + 1;
    }
    labels.mapv(|l| remap[l as usize])
}

#[derive(Debug, Clone, Copy)]
struct Front {
    cost: f64,
    label: u32,
    y: usize,
    x: usize,
    spatial: f64,
}

impl PartialEq for Front {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Front {}

impl PartialOrd for Front {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Front {
    /// Reversed so `BinaryHeap` pops the cheapest front; ties go to the lower
    /// label, then raster position.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.label.cmp(&self.label))
            .then_with(|| other.y.cmp(&self.y))
            .then_with(|| other.x.cmp(&self.x))
    }
}

/// Grow nucleus labels over `guide` (membrane intensity in [0, 1]).
///
/// Step cost from p to q is `sqrt(len^2 * lambda + (g(p) - g(q))^2) + g(q)`.
/// Pixels farther than `max_dist` (path length) from their seed stay 0.
pub fn propagate(
    nuclei: ArrayView2<u32>,
    guide: ArrayView2<f32>,
    lambda: f64,
    max_dist: Option<f64>,
) -> Array2<u32> {
    let (h, w) = nuclei.dim();
    let mut cells = nuclei.to_owned();
    let mut best = Array2::<f64>::from_elem((h, w), f64::INFINITY);
    let mut done = Array2::<bool>::from_elem((h, w), false);
    let mut heap = BinaryHeap::new();
    let limit = max_dist.unwrap_or(f64::INFINITY);

    for ((y, x), &l) in nuclei.indexed_iter() {
        if l > 0 {
            best[[y, x]] = 0.0;
            heap.push(Front {
                cost: 0.0,
                label: l,
                y,
                x,
                spatial: 0.0,
            });
        }
    }

    while let Some(f) = heap.pop() {
        if done[[f.y, f.x]] {
            continue;
        }
        done[[f.y, f.x]] = true;
        if cells[[f.y, f.x]] == 0 {
            cells[[f.y, f.x]] = f.label;
        }
        let gp = guide[[f.y, f.x]] as f64;
        for &(dy, dx) in &NEIGHBORS_8 {
            let Some((ny, nx)) = offset(f.y, f.x, dy, dx, h, w) else {
                continue;
            };
            if done[[ny, nx]] || nuclei[[ny, nx]] != 0 {
                continue;
            }
            let len = if dy != 0 && dx != 0 { std::f64::consts::SQRT_2 } else { 1.0 };
            let spatial = f.spatial + len;
            if spatial > limit {
                continue;
            }
            let gq = guide[[ny, nx]] as f64;
            let cost = f.cost + (len * len * lambda + (gp - gq) * (gp - gq)).sqrt() + gq;
            if cost < best[[ny, nx]] {
                best[[ny, nx]] = cost;
                heap.push(Front {
                    cost,
                    label: f.label,
                    y: ny,
                    x: nx,
                    spatial,
                });
            }
        }
    }
    cells
}

/// Assign enclosed background components smaller than `max_size` to the
/// single label surrounding them. Components touching the border or bordering
/// several labels are left alone.
pub fn fill_holes(cells: &mut Array2<u32>, max_size: usize) {
    if max_size == 0 {
        return;
    }
    let (h, w) = cells.dim();
    let background = cells.mapv(|l| l == 0);
    let (holes, n) = connected_components(background.view(), false);
    if n == 0 {
        return;
    }

    let mut sizes = vec![0usize; n as usize + 1];
    let mut on_border = vec![false; n as usize + 1];
    let mut neighbors: Vec<BTreeSet<u32>> = vec![BTreeSet::new(); n as usize + 1];
    for ((y, x), &hole) in holes.indexed_iter() {
        if hole == 0 {
            continue;
        }
        let i = hole as usize;
        sizes[i] += 1;
        if y == 0 || x == 0 || y == h - 1 || x == w - 1 {
            on_border[i] = true;
        }
        for &(dy, dx) in &NEIGHBORS_4 {
            if let Some((ny, nx)) = offset(y, x, dy, dx, h, w) {
                let l = cells[[ny, nx]];
                if l != 0 {
                    neighbors[i].insert(l);
                }
            }
        }
    }

    for ((y, x), &hole) in holes.indexed_iter() {
        let i = hole as usize;
        if hole == 0 || on_border[i] || sizes[i] >= max_size || neighbors[i].len() != 1 {
            continue;
        }
        if let Some(&l) = neighbors[i].iter().next() {
            cells[[y, x]] = l;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{membrane_plane, nuclei_plane};
    use ndarray::array;

    fn params() -> SegmentationParams {
        SegmentationParams {
            nuclei_sigma: 0.5,
            nuclei_min_size: 5,
            memb_min_dist: 4.0,
            memb_sigma: 0.5,
            memb_max_dist: None,
            memb_hole_size: 10,
            ..SegmentationParams::default()
        }
    }

    fn is_connected(cells: &Array2<u32>, label: u32) -> bool {
        let mask = cells.mapv(|l| l == label);
        connected_components(mask.view(), true).1 == 1
    }

    #[test]
    fn every_cell_grows_from_its_nucleus() {
        let centers = [(10.0, 10.0), (10.0, 30.0), (30.0, 20.0)];
        let nuc = nuclei_plane(40, 40, &centers, 3.0);
        let mem = membrane_plane(40, 40, &centers, 7.0);
        let masks = Segmenter::new(params()).segment(nuc.view(), Some(mem.view())).unwrap();
        assert_eq!(masks.count, 3);

        let nucleus_labels: BTreeSet<u32> = masks.nuclei.iter().copied().filter(|&l| l > 0).collect();
        let cell_labels: BTreeSet<u32> = masks.cells.iter().copied().filter(|&l| l > 0).collect();
        assert_eq!(nucleus_labels, (1..=3).collect());
        assert!(cell_labels.is_subset(&nucleus_labels));
        for ((y, x), &n) in masks.nuclei.indexed_iter() {
            if n > 0 {
                assert_eq!(masks.cells[[y, x]], n);
            }
        }
        for l in cell_labels {
            assert!(is_connected(&masks.cells, l));
        }
    }

    #[test]
    fn close_seeds_are_suppressed() {
        let nuc = nuclei_plane(30, 30, &[(15.0, 10.0), (15.0, 18.0)], 3.0);
        let mem = membrane_plane(30, 30, &[(15.0, 14.0)], 9.0);
        let mut p = params();
        p.memb_min_dist = 12.0;
        let masks = Segmenter::new(p).segment(nuc.view(), Some(mem.view())).unwrap();
        assert_eq!(masks.count, 1);
    }

    #[test]
    fn max_distance_bounds_growth() {
        let nuc = nuclei_plane(40, 40, &[(20.0, 20.0)], 3.0);
        let mem = membrane_plane(40, 40, &[(20.0, 20.0)], 12.0);
        let mut p = params();
        p.memb_max_dist = Some(4.0);
        let masks = Segmenter::new(p).segment(nuc.view(), Some(mem.view())).unwrap();
        assert_eq!(masks.count, 1);
        assert_eq!(masks.cells[[0, 0]], 0);
        assert_eq!(masks.cells[[20, 20]], 1);
        for ((y, x), &l) in masks.cells.indexed_iter() {
            if l > 0 {
                let d = ((y as f32 - 20.0).powi(2) + (x as f32 - 20.0).powi(2)).sqrt();
                assert!(d < 3.5 + 4.0 * 1.5);
            }
        }
    }

    #[test]
    fn empty_and_degenerate_planes() {
        let zeros = Array2::<f32>::zeros((16, 16));
        let mem = membrane_plane(16, 16, &[], 1.0);
        let masks = Segmenter::new(params()).segment(zeros.view(), Some(mem.view())).unwrap();
        assert_eq!(masks.count, 0);
        assert!(masks.cells.iter().all(|&l| l == 0));

        let bright = Array2::<f32>::from_elem((16, 16), 50.0);
        assert!(matches!(
            Segmenter::new(params()).segment(bright.view(), Some(mem.view())),
            Err(Error::DegenerateInput(_))
        ));

        let nuc = nuclei_plane(16, 16, &[(8.0, 8.0)], 3.0);
        let flat = Array2::<f32>::from_elem((16, 16), 7.0);
        assert!(matches!(
            Segmenter::new(params()).segment(nuc.view(), Some(flat.view())),
            Err(Error::DegenerateInput(_))
        ));

        let mut nan = nuc.clone();
        nan[[0, 0]] = f32::NAN;
        assert!(matches!(
            Segmenter::new(params()).segment(nan.view(), Some(mem.view())),
            Err(Error::DegenerateInput(_))
        ));
    }

    #[test]
    fn without_membrane_cells_are_nuclei() {
        let nuc = nuclei_plane(24, 24, &[(8.0, 8.0), (16.0, 17.0)], 3.0);
        let masks = Segmenter::new(params()).segment(nuc.view(), None).unwrap();
        assert_eq!(masks.count, 2);
        assert_eq!(masks.cells, masks.nuclei);
    }

    #[test]
    fn small_enclosed_holes_are_filled() {
        let mut cells = array![
            [1, 1, 1, 1, 0],
            [1, 0, 0, 1, 0],
            [1, 1, 1, 1, 0],
            [2, 2, 2, 0, 0],
            [2, 0, 2, 0, 0]
        ];
        fill_holes(&mut cells, 3);
        assert_eq!(cells[[1, 1]], 1);
        assert_eq!(cells[[1, 2]], 1);
        // touches the border
        assert_eq!(cells[[4, 1]], 0);
        assert_eq!(cells[[0, 4]], 0);
    }

    #[test]
    fn regularization_trades_ridge_crossing_for_distance() {
        // Seeds at both ends, a membrane ridge two pixels from seed 1.
        let mut nuclei = Array2::<u32>::zeros((1, 11));
        nuclei[[0, 0]] = 1;
        nuclei[[0, 10]] = 2;
        let mut guide = Array2::<f32>::zeros((1, 11));
        guide[[0, 2]] = 1.0;

        // Intensity dominates: seed 1 stops at the ridge.
        let cells = propagate(nuclei.view(), guide.view(), 0.01, None);
        assert_eq!(cells.row(0).to_vec(), vec![1, 1, 1, 2, 2, 2, 2, 2, 2, 2, 2]);

        // Distance dominates: seed 1 crosses and splits the row near the middle.
        let cells = propagate(nuclei.view(), guide.view(), 100.0, None);
        assert_eq!(cells.row(0).to_vec(), vec![1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 2]);
    }

    #[test]
    fn propagation_respects_lower_label_on_ties() {
        let nuclei = array![[1u32, 0, 2]];
        let guide = Array2::<f32>::zeros((1, 3));
        let cells = propagate(nuclei.view(), guide.view(), 0.25, None);
        assert_eq!(cells, array![[1u32, 1, 2]]);
    }
}
