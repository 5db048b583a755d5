//! Small image primitives shared by the correction, focus and segmentation stages.
//! Planes are `(y, x)` arrays of `f32`.

use ndarray::{Array2, ArrayView2};

pub type Plane = Array2<f32>;

const OTSU_BINS: usize = 256;

pub fn all_finite(plane: ArrayView2<f32>) -> bool {
    plane.iter().all(|v| v.is_finite())
}

/// (min, max) over the plane; `None` when empty.
pub fn min_max(plane: ArrayView2<f32>) -> Option<(f32, f32)> {
    let mut it = plane.iter().copied();
    let first = it.next()?;
    Some(it.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
}

pub fn is_uniform(plane: ArrayView2<f32>) -> bool {
    match min_max(plane) {
        Some((lo, hi)) => lo == hi,
        None => true,
    }
}

/// Min-max rescale into [0, 1]. A uniform plane maps to zeros.
pub fn normalize_unit(plane: ArrayView2<f32>) -> Plane {
    let Some((lo, hi)) = min_max(plane) else {
        return plane.to_owned();
    };
    let range = hi - lo;
    plane.mapv(|v| if range > 0.0 { (v - lo) / range } else { 0.0 })
}

pub fn gaussian_kernel(sigma: f64) -> Vec<f32> {
    if sigma <= 0.0 {
        return vec![1.0];
    }
    let radius = (3.0 * sigma).ceil() as isize;
    let mut k: Vec<f32> = (-radius..=radius)
        .map(|i| (-(i * i) as f64 / (2.0 * sigma * sigma)).exp() as f32)
        .collect();
    let total: f32 = k.iter().sum();
    for v in &mut k {
        *v /= total;
    }
    k
}

/// Separable convolution with a symmetric 1D kernel, clamped borders.
pub fn convolve_separable(plane: ArrayView2<f32>, kernel: &[f32]) -> Plane {
    let (h, w) = plane.dim();
    if kernel.len() <= 1 || h == 0 || w == 0 {
        return plane.to_owned();
    }
    let r = (kernel.len() / 2) as isize;
    let mut tmp = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (k, &kv) in kernel.iter().enumerate() {
                let sx = (x as isize + k as isize - r).clamp(0, w as isize - 1) as usize;
                acc += kv * plane[[y, sx]];
            }
            tmp[[y, x]] = acc;
        }
    }
    let mut out = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0f32;
            for (k, &kv) in kernel.iter().enumerate() {
                let sy = (y as isize + k as isize - r).clamp(0, h as isize - 1) as usize;
                acc += kv * tmp[[sy, x]];
            }
            out[[y, x]] = acc;
        }
    }
    out
}

pub fn gaussian_blur(plane: ArrayView2<f32>, sigma: f64) -> Plane {
    convolve_separable(plane, &gaussian_kernel(sigma))
}

/// Otsu threshold over a 256-bin histogram spanning [min, max].
/// Pixels strictly above the returned value are foreground.
pub fn otsu_threshold(plane: ArrayView2<f32>) -> f32 {
    let Some((lo, hi)) = min_max(plane) else {
        return 0.0;
    };
    if hi <= lo {
        return hi;
    }
    let scale = (OTSU_BINS - 1) as f32 / (hi - lo);
    let mut hist = [0u64; OTSU_BINS];
    for &v in plane.iter() {
        hist[((v - lo) * scale) as usize] += 1;
    }
    let total = plane.len() as f64;
    let sum_all: f64 = hist.iter().enumerate().map(|(i, &c)| i as f64 * c as f64).sum();

    let mut best_bin = 0usize;
    let mut best_var = -1.0f64;
    let mut w_bg = 0.0f64;
    let mut sum_bg = 0.0f64;
    for (i, &c) in hist.iter().enumerate() {
        w_bg += c as f64;
        if w_bg == 0.0 {
            continue;
        }
        let w_fg = total - w_bg;
        if w_fg == 0.0 {
            break;
        }
        sum_bg += i as f64 * c as f64;
        let m_bg = sum_bg / w_bg;
        let m_fg = (sum_all - sum_bg) / w_fg;
        let between = w_bg * w_fg * (m_bg - m_fg) * (m_bg - m_fg);
        if between > best_var {
            best_var = between;
            best_bin = i;
        }
    }
    lo + (best_bin as f32 + 1.0) / scale
}

pub const NEIGHBORS_4: [(isize, isize); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
pub const NEIGHBORS_8: [(isize, isize); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// Label connected `true` regions 1..=n in raster order of their first pixel.
pub fn connected_components(mask: ArrayView2<bool>, eight: bool) -> (Array2<u32>, u32) {
    let (h, w) = mask.dim();
    let mut labels = Array2::<u32>::zeros((h, w));
    let offsets: &[(isize, isize)] = if eight { &NEIGHBORS_8 } else { &NEIGHBORS_4 };
    let mut next = 0u32;
    let mut stack = Vec::new();
    for y in 0..h {
        for x in 0..w {
            if !mask[[y, x]] || labels[[y, x]] != 0 {
                continue;
            }
            next += 1;
            labels[[y, x]] = next;
            stack.push((y, x));
            while let Some((cy, cx)) = stack.pop() {
                for &(dy, dx) in offsets {
                    let Some((ny, nx)) = offset(cy, cx, dy, dx, h, w) else {
                        continue;
                    };
                    if mask[[ny, nx]] && labels[[ny, nx]] == 0 {
                        labels[[ny, nx]] = next;
                        stack.push((ny, nx));
                    }
                }
            }
        }
    }
    (labels, next)
}

#[inline]
pub fn offset(y: usize, x: usize, dy: isize, dx: isize, h: usize, w: usize) -> Option<(usize, usize)> {
    let ny = y as isize + dy;
    let nx = x as isize + dx;
    if ny < 0 || nx < 0 || ny >= h as isize || nx >= w as isize {
        return None;
    }
    Some((ny as usize, nx as usize))
}
