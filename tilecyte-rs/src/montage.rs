//! Region reassembly: tile records, masks and planes into one frame.
//!
//! Cells seen by more than one tile are matched through shared footprint
//! pixels in the overlap bands and merged into one global record owned by a
//! single tile. A pair matches only when each cell is the other's largest
//! in-band partner and their in-band footprints agree (IoU); a group never
//! holds two cells of the same tile. Global ids run 1..N in (owner
//! acquisition index, local label) order.

use ndarray::{s, Array2};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::{BlendPolicy, MontageParams, OwnershipPolicy};
use crate::error::{Error, Result};
use crate::grid::{GridModel, Rect, TileCoord, TileGeometry};
use crate::plane::Plane;
use crate::quantify::CellRecord;
use crate::tile::TileResult;

const NO_TILE: usize = usize::MAX;

/// A cell in region-absolute coordinates with a region-unique id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalCellRecord {
    pub id: u32,
    pub tile_index: usize,
    pub tile_coord: TileCoord,
    pub local_label: u32,
    pub x: f64,
    pub y: f64,
    pub bbox: Rect,
    pub neighbors: Vec<u32>,
    /// Measurements from the owning tile, in its local frame.
    pub record: CellRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedTile {
    pub index: usize,
    pub coord: TileCoord,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Montage {
    pub region: String,
    pub width: usize,
    pub height: usize,
    pub cells: Vec<GlobalCellRecord>,
    /// (tile index, local label) -> global id, duplicates included.
    pub id_map: BTreeMap<(usize, u32), u32>,
    pub images: BTreeMap<String, Plane>,
    pub nucleus_labels: Array2<u32>,
    pub cell_labels: Array2<u32>,
    pub failed: Vec<FailedTile>,
    pub partial: bool,
}

pub struct Montager {
    grid: GridModel,
    params: MontageParams,
}

/// Union-find over cells; each root tracks the tile slots its group spans.
struct UnionFind {
    parent: Vec<usize>,
    slots: Vec<BTreeSet<usize>>,
}

impl UnionFind {
    fn new(slots: impl Iterator<Item = usize>) -> Self {
        let slots: Vec<BTreeSet<usize>> = slots.map(|s| BTreeSet::from([s])).collect();
        Self {
            parent: (0..slots.len()).collect(),
            slots,
        }
    }

    fn find(&mut self, mut a: usize) -> usize {
        while self.parent[a] != a {
            self.parent[a] = self.parent[self.parent[a]];
            a = self.parent[a];
        }
        a
    }

    /// Joins the groups of `a` and `b` unless they already share a tile.
    fn union(&mut self, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return true;
        }
        if !self.slots[ra].is_disjoint(&self.slots[rb]) {
            return false;
        }
        let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
        let moved = std::mem::take(&mut self.slots[hi]);
        self.slots[lo].extend(moved);
        self.parent[hi] = lo;
        true
    }
}

/// Two cells of different tiles judged to be the same physical cell.
#[derive(Debug, Clone, Copy)]
struct Match {
    a: (usize, u32),
    b: (usize, u32),
    shared: usize,
}

/// One local cell of one tile.
#[derive(Debug, Clone, Copy)]
struct Node<'a> {
    /// Position in the acquisition-ordered tile list.
    slot: usize,
    label: u32,
    area: u64,
    core: u64,
    record: &'a CellRecord,
}

impl Montager {
    pub fn new(grid: GridModel, params: MontageParams) -> Self {
        Self { grid, params }
    }

    pub fn params(&self) -> &MontageParams {
        &self.params
    }

    /// Every tile must sit on its configured grid slot with the configured
    /// shape, and no slot may be claimed twice.
    pub fn validate(&self, tiles: &[&TileResult]) -> Result<()> {
        let mut seen = BTreeSet::new();
        let tol = self.params.origin_tolerance_px;
        for t in tiles {
            let g = &t.geometry;
            let expected = self.grid.tile(g.index).map_err(|_| {
                Error::InconsistentGeometry(format!("tile index {} is outside the grid", g.index))
            })?;
            if g.coord != expected.coord {
                return Err(Error::InconsistentGeometry(format!(
                    "tile {} reports slot {}, the scan order puts it at {}",
                    g.index, g.coord, expected.coord
                )));
            }
            if !seen.insert(g.coord) {
                return Err(Error::InconsistentGeometry(format!(
                    "grid slot {} is claimed by more than one tile",
                    g.coord
                )));
            }
            let dx = (g.origin_x as f64 - expected.origin_x as f64).abs();
            let dy = (g.origin_y as f64 - expected.origin_y as f64).abs();
            if dx > tol || dy > tol {
                return Err(Error::InconsistentGeometry(format!(
                    "tile {} origin ({}, {}) is off the grid origin ({}, {})",
                    g.index, g.origin_x, g.origin_y, expected.origin_x, expected.origin_y
                )));
            }
            let shape = (self.grid.tile_height, self.grid.tile_width);
            if (g.height, g.width) != shape || t.masks.dim() != shape {
                return Err(Error::InconsistentGeometry(format!(
                    "tile {} is {}x{}, configured tiles are {}x{}",
                    g.index, g.width, g.height, shape.1, shape.0
                )));
            }
            if let Some((name, _)) = t.planes.iter().find(|(_, p)| p.dim() != shape) {
                return Err(Error::InconsistentGeometry(format!(
                    "plane {:?} of tile {} does not match the tile shape",
                    name, g.index
                )));
            }
        }
        Ok(())
    }

    pub fn merge(
        &self,
        region: &str,
        tiles: &[TileResult],
        failed: Vec<FailedTile>,
    ) -> Result<Montage> {
        let mut ordered: Vec<&TileResult> = tiles.iter().collect();
        ordered.sort_by_key(|t| t.geometry.index);
        self.validate(&ordered)?;

        let (nodes, lookup) = self.collect_nodes(&ordered);
        let mut uf = UnionFind::new(nodes.iter().map(|n| n.slot));
        let mut matches = self.matches(&ordered);
        // Strongest agreement first, so a rejected join is always the weaker one.
        matches.sort_by(|x, y| y.shared.cmp(&x.shared).then((x.a, x.b).cmp(&(y.a, y.b))));
        for m in matches {
            if let (Some(&na), Some(&nb)) = (lookup.get(&m.a), lookup.get(&m.b)) {
                if !uf.union(na, nb) {
                    tracing::debug!(region, a = ?m.a, b = ?m.b, "match would join two cells of one tile");
                }
            }
        }

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for n in 0..nodes.len() {
            let root = uf.find(n);
            groups.entry(root).or_default().push(n);
        }
        let mut owned: Vec<(usize, Vec<usize>)> = groups
            .into_values()
            .map(|members| (self.owner(&nodes, &ordered, &members), members))
            .collect();
        owned.sort_by_key(|(owner, _)| {
            let n = &nodes[*owner];
            (ordered[n.slot].geometry.index, n.label)
        });

        let mut id_map = BTreeMap::new();
        for (i, (_, members)) in owned.iter().enumerate() {
            for &m in members {
                let n = &nodes[m];
                id_map.insert((ordered[n.slot].geometry.index, n.label), i as u32 + 1);
            }
        }

        let mut cells = Vec::with_capacity(owned.len());
        for (i, (owner, members)) in owned.iter().enumerate() {
            let id = i as u32 + 1;
            let n = &nodes[*owner];
            let g = &ordered[n.slot].geometry;
            let record = n.record;
            let mut neighbors = BTreeSet::new();
            for &m in members {
                let mn = &nodes[m];
                let mt = ordered[mn.slot];
                for nb in &mn.record.neighbors {
                    if let Some(&gid) = id_map.get(&(mt.geometry.index, *nb)) {
                        if gid != id {
                            neighbors.insert(gid);
                        }
                    }
                }
            }
            cells.push(GlobalCellRecord {
                id,
                tile_index: g.index,
                tile_coord: g.coord,
                local_label: n.label,
                x: record.centroid_x + g.origin_x as f64,
                y: record.centroid_y + g.origin_y as f64,
                bbox: Rect {
                    x: record.bbox.x + g.origin_x,
                    y: record.bbox.y + g.origin_y,
                    ..record.bbox
                },
                neighbors: neighbors.into_iter().collect(),
                record: record.clone(),
            });
        }

        let (width, height) = self.grid.region_size();
        let geometries: Vec<TileGeometry> = ordered.iter().map(|t| t.geometry).collect();
        let owners = pixel_owners(&geometries, width, height);
        let mut nucleus_labels = Array2::<u32>::zeros((height, width));
        let mut cell_labels = Array2::<u32>::zeros((height, width));
        for ((y, x), &slot) in owners.indexed_iter() {
            if slot == NO_TILE {
                continue;
            }
            let t = ordered[slot];
            let (ly, lx) = (y - t.geometry.origin_y, x - t.geometry.origin_x);
            let idx = t.geometry.index;
            let relabel = |l: u32| if l == 0 { 0 } else { id_map.get(&(idx, l)).copied().unwrap_or(0) };
            nucleus_labels[[y, x]] = relabel(t.masks.nuclei[[ly, lx]]);
            cell_labels[[y, x]] = relabel(t.masks.cells[[ly, lx]]);
        }

        let channels: BTreeSet<&str> = ordered
            .iter()
            .flat_map(|t| t.planes.keys().map(String::as_str))
            .collect();
        let mut images = BTreeMap::new();
        for channel in channels {
            let image = match self.params.blend {
                BlendPolicy::HardCut => stitch_hard_cut(&ordered, &owners, channel),
                BlendPolicy::Linear => stitch_linear(&ordered, channel, width, height),
            };
            images.insert(channel.to_string(), image);
        }

        let partial = !failed.is_empty();
        if partial {
            tracing::warn!(region, failed = failed.len(), "montage is partial");
        }
        tracing::info!(region, cells = cells.len(), tiles = ordered.len(), "merged region");
        Ok(Montage {
            region: region.to_string(),
            width,
            height,
            cells,
            id_map,
            images,
            nucleus_labels,
            cell_labels,
            failed,
            partial,
        })
    }

    fn collect_nodes<'a>(&self, tiles: &[&'a TileResult]) -> (Vec<Node<'a>>, HashMap<(usize, u32), usize>) {
        let mut nodes = Vec::new();
        let mut lookup = HashMap::new();
        for (slot, t) in tiles.iter().enumerate() {
            let core = self.grid.core_rect(t.geometry.coord);
            let mut area: BTreeMap<u32, (u64, u64)> = BTreeMap::new();
            for ((y, x), &l) in t.masks.cells.indexed_iter() {
                if l == 0 {
                    continue;
                }
                let e = area.entry(l).or_default();
                e.0 += 1;
                if core.contains(x + t.geometry.origin_x, y + t.geometry.origin_y) {
                    e.1 += 1;
                }
            }
            for r in &t.records {
                let (a, c) = area.get(&r.label).copied().unwrap_or((r.area as u64, 0));
                lookup.insert((slot, r.label), nodes.len());
                nodes.push(Node {
                    slot,
                    label: r.label,
                    area: a,
                    core: c,
                    record: r,
                });
            }
        }
        (nodes, lookup)
    }

    /// Cell pairs of overlapping tiles that are mutual best partners in the
    /// shared band, share at least `match_min_overlap_px` pixels and whose
    /// in-band footprints reach `match_min_iou`.
    fn matches(&self, tiles: &[&TileResult]) -> Vec<Match> {
        let min = self.params.match_min_overlap_px.max(1);
        let mut out = Vec::new();
        for i in 0..tiles.len() {
            for j in i + 1..tiles.len() {
                let (a, b) = (&tiles[i].geometry, &tiles[j].geometry);
                let Some(band) = a.rect().intersect(&b.rect()) else {
                    continue;
                };
                let mut shared: BTreeMap<(u32, u32), usize> = BTreeMap::new();
                let mut in_band_a: HashMap<u32, usize> = HashMap::new();
                let mut in_band_b: HashMap<u32, usize> = HashMap::new();
                for y in band.y..band.bottom() {
                    for x in band.x..band.right() {
                        let la = tiles[i].masks.cells[[y - a.origin_y, x - a.origin_x]];
                        let lb = tiles[j].masks.cells[[y - b.origin_y, x - b.origin_x]];
                        if la != 0 {
                            *in_band_a.entry(la).or_default() += 1;
                        }
                        if lb != 0 {
                            *in_band_b.entry(lb).or_default() += 1;
                        }
                        if la != 0 && lb != 0 {
                            *shared.entry((la, lb)).or_default() += 1;
                        }
                    }
                }

                // Largest partner per cell; BTreeMap order keeps the lower label on ties.
                let mut best_a: HashMap<u32, (usize, u32)> = HashMap::new();
                let mut best_b: HashMap<u32, (usize, u32)> = HashMap::new();
                for (&(la, lb), &n) in &shared {
                    let ea = best_a.entry(la).or_insert((n, lb));
                    if n > ea.0 {
                        *ea = (n, lb);
                    }
                    let eb = best_b.entry(lb).or_insert((n, la));
                    if n > eb.0 {
                        *eb = (n, la);
                    }
                }

                for (&(la, lb), &n) in &shared {
                    let mutual = best_a.get(&la).map(|e| e.1) == Some(lb)
                        && best_b.get(&lb).map(|e| e.1) == Some(la);
                    if !mutual || n < min {
                        continue;
                    }
                    let union = in_band_a[&la] + in_band_b[&lb] - n;
                    if (n as f64) < self.params.match_min_iou * union as f64 {
                        continue;
                    }
                    out.push(Match {
                        a: (i, la),
                        b: (j, lb),
                        shared: n,
                    });
                }
            }
        }
        out
    }

    fn owner(&self, nodes: &[Node], tiles: &[&TileResult], members: &[usize]) -> usize {
        let key = |m: usize| {
            let n = &nodes[m];
            (tiles[n.slot].geometry.index, n.label)
        };
        let mut best = members[0];
        for &m in &members[1..] {
            let better = match self.params.ownership {
                OwnershipPolicy::LowestIndex => key(m) < key(best),
                OwnershipPolicy::CoreFraction => {
                    let (a, b) = (&nodes[m], &nodes[best]);
                    // Compare core/area fractions without division.
                    let lhs = a.core as u128 * b.area.max(1) as u128;
                    let rhs = b.core as u128 * a.area.max(1) as u128;
                    lhs > rhs || (lhs == rhs && key(m) < key(best))
                }
            };
            if better {
                best = m;
            }
        }
        best
    }
}

/// For every region pixel, the slot of the tile whose center is nearest
/// (lower acquisition index on ties), or `NO_TILE` where no tile covers it.
fn pixel_owners(tiles: &[TileGeometry], width: usize, height: usize) -> Array2<usize> {
    let mut owners = Array2::from_elem((height, width), NO_TILE);
    let mut best = Array2::from_elem((height, width), f64::INFINITY);
    for (slot, g) in tiles.iter().enumerate() {
        let (cx, cy) = g.center();
        let bottom = g.rect().bottom().min(height);
        let right = g.rect().right().min(width);
        for y in g.origin_y..bottom {
            for x in g.origin_x..right {
                let d = (x as f64 + 0.5 - cx).powi(2) + (y as f64 + 0.5 - cy).powi(2);
                if d < best[[y, x]] {
                    best[[y, x]] = d;
                    owners[[y, x]] = slot;
                }
            }
        }
    }
    owners
}

fn stitch_hard_cut(tiles: &[&TileResult], owners: &Array2<usize>, channel: &str) -> Plane {
    let mut out = Plane::zeros(owners.dim());
    for ((y, x), &slot) in owners.indexed_iter() {
        if slot == NO_TILE {
            continue;
        }
        let t = tiles[slot];
        if let Some(p) = t.planes.get(channel) {
            out[[y, x]] = p[[y - t.geometry.origin_y, x - t.geometry.origin_x]];
        }
    }
    out
}

/// Weighted average with weight `1 + distance to the nearest tile edge`.
fn stitch_linear(tiles: &[&TileResult], channel: &str, width: usize, height: usize) -> Plane {
    let mut acc = Array2::<f64>::zeros((height, width));
    let mut wsum = Array2::<f64>::zeros((height, width));
    for t in tiles {
        let Some(p) = t.planes.get(channel) else {
            continue;
        };
        let g = &t.geometry;
        let mut acc_view = acc.slice_mut(s![g.origin_y..g.rect().bottom(), g.origin_x..g.rect().right()]);
        for ((ly, lx), a) in acc_view.indexed_iter_mut() {
            *a += edge_weight(ly, lx, g) * p[[ly, lx]] as f64;
        }
        let mut w_view = wsum.slice_mut(s![g.origin_y..g.rect().bottom(), g.origin_x..g.rect().right()]);
        for ((ly, lx), w) in w_view.indexed_iter_mut() {
            *w += edge_weight(ly, lx, g);
        }
    }
    ndarray::Zip::from(&acc)
        .and(&wsum)
        .map_collect(|&a, &w| if w > 0.0 { (a / w) as f32 } else { 0.0 })
}

fn edge_weight(ly: usize, lx: usize, g: &TileGeometry) -> f64 {
    let d = lx.min(ly).min(g.width - 1 - lx).min(g.height - 1 - ly);
    1.0 + d as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuantificationParams;
    use crate::focus::FocalSelection;
    use crate::grid::TilingMode;
    use crate::quantify::Quantifier;
    use crate::segment::TileMasks;

    fn grid() -> GridModel {
        GridModel::new(2, 1, 10, 10, 4, 0, TilingMode::Snake).unwrap()
    }

    /// Tile `index` with cells painted as (label, x0..x1, y0..y1) boxes.
    fn tile(index: usize, boxes: &[(u32, usize, usize, usize, usize)], fill: f32) -> TileResult {
        let geometry = grid().tile(index).unwrap();
        let mut cells = Array2::<u32>::zeros((10, 10));
        for &(l, x0, x1, y0, y1) in boxes {
            cells.slice_mut(s![y0..y1, x0..x1]).fill(l);
        }
        let masks = TileMasks {
            nuclei: cells.clone(),
            count: boxes.len() as u32,
            cells,
        };
        let params = QuantificationParams {
            cell_graph: true,
            ..QuantificationParams::default()
        };
        let records = Quantifier::new(params).quantify(&masks, &[]).unwrap();
        let mut planes = BTreeMap::new();
        planes.insert("DAPI".to_string(), Plane::from_elem((10, 10), fill));
        TileResult {
            geometry,
            focal: FocalSelection {
                channel: "DAPI".into(),
                z: 0,
                scores: vec![],
            },
            masks,
            records,
            planes,
        }
    }

    fn montager(params: MontageParams) -> Montager {
        Montager::new(grid(), params)
    }

    #[test]
    fn straddling_cell_is_reported_once() {
        // Absolute footprint x 3..9; tile 1 starts at x = 6.
        let left = tile(0, &[(1, 3, 9, 3, 6)], 1.0);
        let right = tile(1, &[(1, 0, 3, 3, 6)], 2.0);
        let m = montager(MontageParams::default())
            .merge("reg1", &[left, right], vec![])
            .unwrap();
        assert_eq!(m.cells.len(), 1);
        let c = &m.cells[0];
        assert_eq!((c.id, c.tile_index), (1, 0));
        assert!(c.x >= 0.0 && c.x < m.width as f64 && c.y < m.height as f64);
        assert_eq!(m.id_map[&(0, 1)], 1);
        assert_eq!(m.id_map[&(1, 1)], 1);
        assert!(!m.partial);
        assert!(m.cell_labels.iter().all(|&l| l <= 1));
    }

    #[test]
    fn adjacent_cells_with_shifted_boundaries_stay_distinct() {
        // Band at absolute x 6..10. The two tiles split the same pair of cells
        // one row apart, so every cell touches both cells of the other tile.
        let left = tile(0, &[(1, 0, 10, 0, 5), (2, 0, 10, 5, 10)], 1.0);
        let right = tile(1, &[(1, 0, 10, 0, 6), (2, 0, 10, 6, 10)], 1.0);
        let m = montager(MontageParams::default())
            .merge("reg1", &[left, right], vec![])
            .unwrap();
        assert_eq!(m.cells.len(), 2);
        assert_eq!(m.id_map[&(0, 1)], m.id_map[&(1, 1)]);
        assert_eq!(m.id_map[&(0, 2)], m.id_map[&(1, 2)]);
        assert_ne!(m.id_map[&(0, 1)], m.id_map[&(0, 2)]);
        assert_eq!(m.cells[0].neighbors, vec![2]);
    }

    #[test]
    fn weak_band_agreement_is_not_a_match() {
        // One shared column out of four: IoU 0.25.
        let left = tile(0, &[(1, 6, 10, 0, 3)], 1.0);
        let right = tile(1, &[(1, 3, 6, 0, 3)], 1.0);
        let strict = montager(MontageParams::default())
            .merge("reg1", &[left.clone(), right.clone()], vec![])
            .unwrap();
        assert_eq!(strict.cells.len(), 2);
        let loose = montager(MontageParams {
            match_min_iou: 0.2,
            ..MontageParams::default()
        })
        .merge("reg1", &[left, right], vec![])
        .unwrap();
        assert_eq!(loose.cells.len(), 1);
    }

    #[test]
    fn groups_never_span_two_cells_of_one_tile() {
        // Nodes 0 and 2 live in slot 0, node 1 in slot 1.
        let mut uf = UnionFind::new([0, 1, 0].into_iter());
        assert!(uf.union(0, 1));
        assert!(!uf.union(1, 2));
        assert_ne!(uf.find(0), uf.find(2));
        assert_eq!(uf.find(0), uf.find(1));
    }

    #[test]
    fn separate_cells_keep_distinct_ids_and_offsets() {
        let left = tile(0, &[(1, 1, 3, 4, 6)], 1.0);
        let right = tile(1, &[(1, 1, 3, 4, 6)], 1.0);
        let m = montager(MontageParams::default())
            .merge("reg1", &[right, left], vec![])
            .unwrap();
        assert_eq!(m.cells.len(), 2);
        assert_eq!(m.cells[0].id, 1);
        assert_eq!(m.cells[1].id, 2);
        assert_eq!(m.cells[0].tile_index, 0);
        assert_eq!(m.cells[1].x - m.cells[0].x, 6.0);
        assert_eq!(m.cells[1].bbox.x, 7);
    }

    #[test]
    fn ownership_policies() {
        // Mostly inside tile 1's core.
        let left = tile(0, &[(1, 7, 10, 0, 2)], 1.0);
        let right = tile(1, &[(1, 1, 9, 0, 2)], 1.0);
        let core = montager(MontageParams::default())
            .merge("reg1", &[left.clone(), right.clone()], vec![])
            .unwrap();
        assert_eq!(core.cells.len(), 1);
        assert_eq!(core.cells[0].tile_index, 1);
        let lowest = montager(MontageParams {
            ownership: OwnershipPolicy::LowestIndex,
            ..MontageParams::default()
        })
        .merge("reg1", &[left, right], vec![])
        .unwrap();
        assert_eq!(lowest.cells[0].tile_index, 0);
    }

    #[test]
    fn neighbors_are_remapped_to_global_ids() {
        let left = tile(0, &[(1, 0, 2, 0, 2), (2, 2, 4, 0, 2)], 1.0);
        let right = tile(1, &[(1, 4, 6, 0, 2)], 1.0);
        let m = montager(MontageParams::default())
            .merge("reg1", &[left, right], vec![])
            .unwrap();
        assert_eq!(m.cells.len(), 3);
        assert_eq!(m.cells[0].neighbors, vec![2]);
        assert_eq!(m.cells[1].neighbors, vec![1]);
        assert!(m.cells[2].neighbors.is_empty());
    }

    #[test]
    fn hard_cut_and_linear_blending() {
        let left = tile(0, &[], 1.0);
        let right = tile(1, &[], 2.0);
        let hard = montager(MontageParams::default())
            .merge("reg1", &[left.clone(), right.clone()], vec![])
            .unwrap();
        let img = &hard.images["DAPI"];
        assert_eq!(img.dim(), (10, 16));
        assert_eq!(img[[5, 7]], 1.0);
        assert_eq!(img[[5, 8]], 2.0);

        let linear = montager(MontageParams {
            blend: BlendPolicy::Linear,
            ..MontageParams::default()
        })
        .merge("reg1", &[left, right], vec![])
        .unwrap();
        let img = &linear.images["DAPI"];
        assert!((img[[5, 7]] - 1.4).abs() < 1e-6);
        assert_eq!(img[[5, 0]], 1.0);
        assert_eq!(img[[5, 15]], 2.0);
    }

    #[test]
    fn failed_tiles_leave_gaps() {
        let right = tile(1, &[(1, 4, 6, 0, 2)], 3.0);
        let failed = vec![FailedTile {
            index: 0,
            coord: TileCoord { row: 0, col: 0 },
            reason: "degenerate input".into(),
        }];
        let m = montager(MontageParams::default())
            .merge("reg1", &[right], failed)
            .unwrap();
        assert!(m.partial);
        assert_eq!(m.failed.len(), 1);
        assert_eq!(m.images["DAPI"][[0, 0]], 0.0);
        assert_eq!(m.images["DAPI"][[0, 10]], 3.0);
        assert_eq!(m.cells.len(), 1);
    }

    #[test]
    fn inconsistent_geometry_is_rejected() {
        let mut shifted = tile(1, &[], 1.0);
        shifted.geometry.origin_x += 2;
        let err = montager(MontageParams::default())
            .merge("reg1", &[tile(0, &[], 1.0), shifted], vec![])
            .unwrap_err();
        assert!(matches!(err, Error::InconsistentGeometry(_)));

        let err = montager(MontageParams::default())
            .merge("reg1", &[tile(0, &[], 1.0), tile(0, &[], 1.0)], vec![])
            .unwrap_err();
        assert!(matches!(err, Error::InconsistentGeometry(_)));

        let mut small = tile(1, &[], 1.0);
        small.planes.insert("CD4".into(), Plane::zeros((4, 4)));
        let err = montager(MontageParams::default())
            .merge("reg1", &[small], vec![])
            .unwrap_err();
        assert!(matches!(err, Error::InconsistentGeometry(_)));
    }
}
