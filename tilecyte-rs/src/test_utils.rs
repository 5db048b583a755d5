//! Synthetic planes for unit tests.

use ndarray::Array2;

/// Paint a filled disk of `value` onto `plane`.
pub(crate) fn draw_disk(plane: &mut Array2<f32>, cy: f32, cx: f32, radius: f32, value: f32) {
    let (h, w) = plane.dim();
    for y in 0..h {
        for x in 0..w {
            let dy = y as f32 - cy;
            let dx = x as f32 - cx;
            if dx * dx + dy * dy <= radius * radius {
                plane[[y, x]] = value;
            }
        }
    }
}

/// Background plane with one bright disk per `(cy, cx)` center.
pub(crate) fn nuclei_plane(h: usize, w: usize, centers: &[(f32, f32)], radius: f32) -> Array2<f32> {
    let mut p = Array2::<f32>::from_elem((h, w), 10.0);
    for &(cy, cx) in centers {
        draw_disk(&mut p, cy, cx, radius, 200.0);
    }
    p
}

/// Membrane-like plane: a ring of `value` at `radius` around each center on a
/// smooth ramp so it is never uniform.
pub(crate) fn membrane_plane(h: usize, w: usize, centers: &[(f32, f32)], radius: f32) -> Array2<f32> {
    let mut p = Array2::<f32>::zeros((h, w));
    for ((y, x), v) in p.indexed_iter_mut() {
        *v = 5.0 + (x + y) as f32 * 0.01;
        for &(cy, cx) in centers {
            let d = ((y as f32 - cy).powi(2) + (x as f32 - cx).powi(2)).sqrt();
            if (d - radius).abs() < 1.0 {
                *v = 120.0;
            }
        }
    }
    p
}
