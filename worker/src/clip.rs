use log::warn;
use rayon::prelude::*;

/// The euclidean norm of the whole gradient, accumulated in `f64`.
pub fn global_norm(grad: &[f32]) -> f32 {
    grad.par_iter()
        .map(|&g| f64::from(g) * f64::from(g))
        .sum::<f64>()
        .sqrt() as f32
}

/// Rescales `grad` so its global norm is at most `clip_norm`.
///
/// A non finite norm leaves the gradient untouched.
///
/// # Returns
/// The norm before clipping.
pub fn clip_by_global_norm(grad: &mut [f32], clip_norm: f32) -> f32 {
    let norm = global_norm(grad);

    if !norm.is_finite() {
        warn!("non finite gradient norm {norm}, skipping clipping");
        return norm;
    }

    if norm > clip_norm {
        let scale = clip_norm / norm;
        grad.par_iter_mut().for_each(|g| *g *= scale);
    }

    norm
}
