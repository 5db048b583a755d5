//! Best focal plane selection per tile.

use ndarray::{ArrayView2, ArrayView3, Axis};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::tile::TileStack;

/// Chosen z plane for one tile and the score of every slice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FocalSelection {
    pub channel: String,
    pub z: usize,
    pub scores: Vec<f64>,
}

/// How the focal plane is chosen for quantification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocalStrategy {
    BestZPlane,
    Fixed(usize),
    Middle,
}

/// Brightness-normalized gradient energy: mean squared central-difference
/// gradient magnitude over the squared mean intensity. 0.0 when undefined.
pub fn focus_score(plane: ArrayView2<f32>) -> f64 {
    let (h, w) = plane.dim();
    if h < 3 || w < 3 {
        return 0.0;
    }
    let mut energy = 0.0f64;
    let mut total = 0.0f64;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let gx = (plane[[y, x + 1]] - plane[[y, x - 1]]) as f64 * 0.5;
            let gy = (plane[[y + 1, x]] - plane[[y - 1, x]]) as f64 * 0.5;
            energy += gx * gx + gy * gy;
            total += plane[[y, x]] as f64;
        }
    }
    let n = ((h - 2) * (w - 2)) as f64;
    let mean = total / n;
    let score = if mean.abs() > f64::EPSILON {
        (energy / n) / (mean * mean)
    } else {
        energy / n
    };
    if score.is_finite() {
        score
    } else {
        0.0
    }
}

/// Index of the sharpest slice (lowest index on ties) and all slice scores.
pub fn select_best_plane(stack: ArrayView3<f32>) -> (usize, Vec<f64>) {
    let scores: Vec<f64> = stack.axis_iter(Axis(0)).map(focus_score).collect();
    if scores.len() <= 1 {
        return (0, scores);
    }
    let mut best = 0usize;
    for (z, &s) in scores.iter().enumerate().skip(1) {
        if s > scores[best] {
            best = z;
        }
    }
    (best, scores)
}

pub struct FocusSelector {
    channel: String,
}

impl FocusSelector {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }

    pub fn select(&self, tile: &TileStack) -> Result<FocalSelection> {
        let stack = tile.channel(&self.channel)?;
        let (z, scores) = select_best_plane(stack);
        tracing::debug!(tile = %tile.id(), z, "selected focal plane");
        Ok(FocalSelection {
            channel: self.channel.clone(),
            z,
            scores,
        })
    }

    /// Resolve a focal plane for `tile` according to `strategy`.
    pub fn resolve(&self, tile: &TileStack, strategy: FocalStrategy) -> Result<FocalSelection> {
        let nz = tile.num_z();
        match strategy {
            FocalStrategy::BestZPlane => self.select(tile),
            FocalStrategy::Fixed(z) if z < nz => Ok(FocalSelection {
                channel: self.channel.clone(),
                z,
                scores: Vec::new(),
            }),
            FocalStrategy::Fixed(z) => Err(Error::InsufficientData(format!(
                "{} has {} z planes, fixed plane {} requested",
                tile.id(),
                nz,
                z
            ))),
            FocalStrategy::Middle => Ok(FocalSelection {
                channel: self.channel.clone(),
                z: nz / 2,
                scores: Vec::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridModel, TilingMode};
    use ndarray::Array3;

    fn checker(z: usize, contrast: f32) -> Array3<f32> {
        let mut s = Array3::<f32>::from_elem((z, 16, 16), 100.0);
        for ((k, y, x), v) in s.indexed_iter_mut() {
            if (x / 2 + y / 2) % 2 == 0 {
                *v += contrast * (k as f32 + 1.0);
            }
        }
        s
    }

    fn tile_with(stack: Array3<f32>) -> TileStack {
        let g = GridModel::new(1, 1, 16, 16, 0, 0, TilingMode::Snake).unwrap();
        TileStack::new("reg1", g.tile(0).unwrap())
            .with_channel("DAPI", stack)
            .unwrap()
    }

    #[test]
    fn picks_the_sharpest_slice() {
        let mut stack = checker(5, 1.0);
        // slice 2 gets the strongest texture
        for v in stack.index_axis_mut(Axis(0), 2).iter_mut() {
            if *v > 100.0 {
                *v += 60.0;
            }
        }
        let (z, scores) = select_best_plane(stack.view());
        assert_eq!(z, 2);
        assert_eq!(scores.len(), 5);
    }

    #[test]
    fn selection_is_repeatable() {
        let tile = tile_with(checker(4, 3.0));
        let sel = FocusSelector::new("DAPI");
        let a = sel.select(&tile).unwrap();
        let b = sel.select(&tile).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn single_slice_returns_zero() {
        let flat = Array3::<f32>::zeros((1, 16, 16));
        let (z, scores) = select_best_plane(flat.view());
        assert_eq!(z, 0);
        assert!(scores.iter().all(|s| !s.is_nan()));
    }

    #[test]
    fn fixed_plane_outside_the_stack_is_not_clamped() {
        let tile = tile_with(checker(3, 1.0));
        let sel = FocusSelector::new("DAPI");
        assert_eq!(sel.resolve(&tile, FocalStrategy::Fixed(2)).unwrap().z, 2);
        assert!(matches!(
            sel.resolve(&tile, FocalStrategy::Fixed(3)),
            Err(Error::InsufficientData(_))
        ));
        assert_eq!(sel.resolve(&tile, FocalStrategy::Middle).unwrap().z, 1);
    }

    #[test]
    fn missing_channel_is_insufficient_data() {
        let tile = tile_with(checker(2, 1.0));
        let err = FocusSelector::new("CD45").select(&tile).unwrap_err();
        assert!(matches!(err, Error::InsufficientData(_)));
    }
}
