//! Per-cell measurements in tile-local coordinates.

use ndarray::ArrayView2;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::QuantificationParams;
use crate::error::{Error, Result};
use crate::grid::Rect;
use crate::plane::{offset, NEIGHBORS_4};
use crate::segment::TileMasks;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct IntensityStats {
    pub mean: f64,
    pub sum: f64,
}

/// One detected cell of one tile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellRecord {
    pub label: u32,
    pub centroid_x: f64,
    pub centroid_y: f64,
    pub bbox: Rect,
    pub area: usize,
    pub perimeter: usize,
    pub diameter: f64,
    pub eccentricity: f64,
    pub solidity: f64,
    pub nucleus_area: usize,
    pub nucleus_diameter: f64,
    pub cell_intensity: BTreeMap<String, IntensityStats>,
    /// Present when nucleus-restricted intensities were requested.
    pub nucleus_intensity: Option<BTreeMap<String, IntensityStats>>,
    /// Adjacent cell labels in the same tile (empty unless the cell graph is on).
    pub neighbors: Vec<u32>,
}

#[derive(Default, Clone)]
struct Accum {
    area: usize,
    sx: f64,
    sy: f64,
    sxx: f64,
    syy: f64,
    sxy: f64,
    x0: usize,
    y0: usize,
    x1: usize,
    y1: usize,
    perimeter: usize,
    nucleus_area: usize,
    cell_sums: Vec<f64>,
    nucleus_sums: Vec<f64>,
    /// Per row: leftmost and rightmost pixel column.
    rows: BTreeMap<usize, (usize, usize)>,
}

pub struct Quantifier {
    params: QuantificationParams,
}

impl Quantifier {
    pub fn new(params: QuantificationParams) -> Self {
        Self { params }
    }

    /// One record per non-zero cell label, ordered by label.
    pub fn quantify(
        &self,
        masks: &TileMasks,
        channels: &[(&str, ArrayView2<f32>)],
    ) -> Result<Vec<CellRecord>> {
        let (h, w) = masks.dim();
        if masks.nuclei.dim() != (h, w) {
            return Err(Error::InsufficientData(
                "nucleus and cell masks differ in shape".into(),
            ));
        }
        for (name, plane) in channels {
            if plane.dim() != (h, w) {
                return Err(Error::InsufficientData(format!(
                    "channel {:?} is {:?}, masks are {:?}",
                    name,
                    plane.dim(),
                    (h, w)
                )));
            }
        }
        let max_label = masks.cells.iter().copied().max().unwrap_or(0) as usize;
        if max_label == 0 {
            return Ok(Vec::new());
        }

        let n_ch = channels.len();
        let mut acc = vec![
            Accum {
                x0: usize::MAX,
                y0: usize::MAX,
                cell_sums: vec![0.0; n_ch],
                nucleus_sums: vec![0.0; n_ch],
                ..Accum::default()
            };
            max_label + 1
        ];

        for ((y, x), &l) in masks.cells.indexed_iter() {
            if l == 0 {
                continue;
            }
            let a = &mut acc[l as usize];
            let (fx, fy) = (x as f64, y as f64);
            a.area += 1;
            a.sx += fx;
            a.sy += fy;
            a.sxx += fx * fx;
            a.syy += fy * fy;
            a.sxy += fx * fy;
            a.x0 = a.x0.min(x);
            a.y0 = a.y0.min(y);
            a.x1 = a.x1.max(x);
            a.y1 = a.y1.max(y);
            let row = a.rows.entry(y).or_insert((x, x));
            row.0 = row.0.min(x);
            row.1 = row.1.max(x);
            for &(dy, dx) in &NEIGHBORS_4 {
                match offset(y, x, dy, dx, h, w) {
                    Some((ny, nx)) if masks.cells[[ny, nx]] == l => {}
                    _ => a.perimeter += 1,
                }
            }
            let in_nucleus = masks.nuclei[[y, x]] == l;
            if in_nucleus {
                a.nucleus_area += 1;
            }
            for (c, (_, plane)) in channels.iter().enumerate() {
                let v = plane[[y, x]] as f64;
                a.cell_sums[c] += v;
                if in_nucleus {
                    a.nucleus_sums[c] += v;
                }
            }
        }

        let adjacency = if self.params.cell_graph {
            cell_graph(masks.cells.view(), self.params.cell_graph_distance.max(1))
        } else {
            BTreeMap::new()
        };

        let mut records = Vec::new();
        for (label, a) in acc.iter().enumerate() {
            if a.area == 0 {
                continue;
            }
            let label = label as u32;
            let n = a.area as f64;
            let stats = |sums: &[f64], count: usize| -> BTreeMap<String, IntensityStats> {
                channels
                    .iter()
                    .zip(sums)
                    .map(|((name, _), &sum)| {
                        let mean = if count > 0 { sum / count as f64 } else { 0.0 };
                        (name.to_string(), IntensityStats { mean, sum })
                    })
                    .collect()
            };
            records.push(CellRecord {
                label,
                centroid_x: a.sx / n,
                centroid_y: a.sy / n,
                bbox: Rect {
                    x: a.x0,
                    y: a.y0,
                    width: a.x1 - a.x0 + 1,
                    height: a.y1 - a.y0 + 1,
                },
                area: a.area,
                perimeter: a.perimeter,
                diameter: equivalent_diameter(a.area),
                eccentricity: eccentricity(a),
                solidity: solidity(a),
                nucleus_area: a.nucleus_area,
                nucleus_diameter: equivalent_diameter(a.nucleus_area),
                cell_intensity: stats(&a.cell_sums, a.area),
                nucleus_intensity: self
                    .params
                    .nucleus_intensity
                    .then(|| stats(&a.nucleus_sums, a.nucleus_area)),
                neighbors: adjacency
                    .get(&label)
                    .map(|s| s.iter().copied().collect())
                    .unwrap_or_default(),
            });
        }
        Ok(records)
    }
}

fn equivalent_diameter(area: usize) -> f64 {
    (4.0 * area as f64 / std::f64::consts::PI).sqrt()
}

fn eccentricity(a: &Accum) -> f64 {
    let n = a.area as f64;
    let (cx, cy) = (a.sx / n, a.sy / n);
    let mu20 = a.sxx / n - cx * cx;
    let mu02 = a.syy / n - cy * cy;
    let mu11 = a.sxy / n - cx * cy;
    let half_trace = (mu20 + mu02) / 2.0;
    let root = (((mu20 - mu02) / 2.0).powi(2) + mu11 * mu11).sqrt();
    let (l1, l2) = (half_trace + root, half_trace - root);
    if l1 <= f64::EPSILON {
        return 0.0;
    }
    (1.0 - (l2 / l1).max(0.0)).max(0.0).sqrt()
}

/// Area over the area of the convex hull of the pixel corners.
fn solidity(a: &Accum) -> f64 {
    let mut pts = Vec::with_capacity(a.rows.len() * 4);
    for (&y, &(x0, x1)) in &a.rows {
        let (y0, y1) = (y as i64, y as i64 + 1);
        let (x0, x1) = (x0 as i64, x1 as i64 + 1);
        pts.extend_from_slice(&[(x0, y0), (x0, y1), (x1, y0), (x1, y1)]);
    }
    let hull = convex_hull(pts);
    let hull_area = polygon_area(&hull);
    if hull_area <= 0.0 {
        return 1.0;
    }
    (a.area as f64 / hull_area).min(1.0)
}

fn cross(o: (i64, i64), a: (i64, i64), b: (i64, i64)) -> i64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

/// Andrew's monotone chain; counter-clockwise, no repeated end point.
fn convex_hull(mut pts: Vec<(i64, i64)>) -> Vec<(i64, i64)> {
    pts.sort_unstable();
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }
    let mut lower: Vec<(i64, i64)> = Vec::new();
    for &p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<(i64, i64)> = Vec::new();
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

fn polygon_area(poly: &[(i64, i64)]) -> f64 {
    if poly.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for i in 0..poly.len() {
        let (a, b) = (poly[i], poly[(i + 1) % poly.len()]);
        twice += a.0 * b.1 - b.0 * a.1;
    }
    twice.abs() as f64 / 2.0
}

/// Symmetric adjacency between labels whose pixels lie within `distance`
/// (Chebyshev) of each other. No self loops.
pub fn cell_graph(cells: ArrayView2<u32>, distance: usize) -> BTreeMap<u32, BTreeSet<u32>> {
    let (h, w) = cells.dim();
    let d = distance as isize;
    let mut graph: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
    for ((y, x), &a) in cells.indexed_iter() {
        if a == 0 {
            continue;
        }
        for dy in -d..=d {
            for dx in -d..=d {
                let Some((ny, nx)) = offset(y, x, dy, dx, h, w) else {
                    continue;
                };
                let b = cells[[ny, nx]];
                if b != 0 && b != a {
                    graph.entry(a).or_default().insert(b);
                    graph.entry(b).or_default().insert(a);
                }
            }
        }
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn masks(cells: Array2<u32>, nuclei: Array2<u32>) -> TileMasks {
        let count = cells.iter().copied().max().unwrap_or(0);
        TileMasks {
            nuclei,
            cells,
            count,
        }
    }

    fn params(graph: bool, nucleus: bool) -> QuantificationParams {
        QuantificationParams {
            nucleus_intensity: nucleus,
            cell_graph: graph,
            cell_graph_distance: 1,
        }
    }

    #[test]
    fn measures_area_centroid_and_intensity() {
        let cells = array![[1u32, 1, 0, 2], [1, 1, 0, 2], [0, 0, 0, 2]];
        let nuclei = array![[1u32, 0, 0, 0], [0, 0, 0, 2], [0, 0, 0, 0]];
        let dapi = array![[4.0f32, 2.0, 0.0, 1.0], [2.0, 0.0, 0.0, 5.0], [0.0, 0.0, 0.0, 3.0]];
        let records = Quantifier::new(params(false, true))
            .quantify(&masks(cells, nuclei), &[("DAPI", dapi.view())])
            .unwrap();
        assert_eq!(records.len(), 2);
        let first = &records[0];
        assert_eq!(first.label, 1);
        assert_eq!(first.area, 4);
        assert_eq!((first.centroid_x, first.centroid_y), (0.5, 0.5));
        assert_eq!(first.cell_intensity["DAPI"], IntensityStats { mean: 2.0, sum: 8.0 });
        assert_eq!(first.perimeter, 8);
        assert!((first.solidity - 1.0).abs() < 1e-9);
        let nuc = first.nucleus_intensity.as_ref().unwrap();
        assert_eq!(nuc["DAPI"].sum, 4.0);
        assert_eq!(records[1].nucleus_area, 1);
        assert!(records[1].eccentricity > 0.9);
    }

    #[test]
    fn areas_never_exceed_tile() {
        let cells = array![[1u32, 1, 2], [3, 3, 2], [3, 0, 0]];
        let records = Quantifier::new(params(true, false))
            .quantify(&masks(cells.clone(), cells.clone()), &[])
            .unwrap();
        let total: usize = records.iter().map(|r| r.area).sum();
        assert!(total <= cells.len());
        assert!(records.iter().all(|r| r.nucleus_intensity.is_none()));
    }

    #[test]
    fn cell_graph_is_symmetric_without_self_loops() {
        let cells = array![
            [1u32, 1, 0, 0, 4],
            [1, 2, 2, 0, 4],
            [0, 2, 3, 3, 0],
            [0, 0, 0, 0, 0]
        ];
        let records = Quantifier::new(params(true, false))
            .quantify(&masks(cells.clone(), cells), &[])
            .unwrap();
        let by_label: BTreeMap<u32, &CellRecord> = records.iter().map(|r| (r.label, r)).collect();
        for r in &records {
            assert!(!r.neighbors.contains(&r.label));
            for n in &r.neighbors {
                assert!(by_label[n].neighbors.contains(&r.label));
            }
        }
        assert_eq!(by_label[&1].neighbors, vec![2]);
        assert_eq!(by_label[&2].neighbors, vec![1, 3]);
        assert_eq!(by_label[&3].neighbors, vec![2, 4]);
    }

    #[test]
    fn quantification_is_deterministic() {
        let cells = array![[2u32, 2, 1], [0, 1, 1]];
        let plane = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let q = Quantifier::new(params(true, true));
        let m = masks(cells.clone(), cells);
        let a = q.quantify(&m, &[("CD4", plane.view())]).unwrap();
        let b = q.quantify(&m, &[("CD4", plane.view())]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.iter().map(|r| r.label).collect::<Vec<_>>(), vec![1, 2]);
    }
}
