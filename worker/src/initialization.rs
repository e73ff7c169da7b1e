use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Uniform};

use crate::Result;

/// Half width of the range fresh parameters are drawn from.
pub const INIT_SCALE: f32 = 0.1;

/// Draws `len` parameters uniformly from `[-limit, limit)` with a seeded generator.
///
/// # Returns
/// An error if `limit` isn't a positive finite number.
pub fn uniform(len: usize, limit: f32, seed: u64) -> Result<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let distribution = Uniform::new(-limit, limit)?;
    Ok(distribution.sample_iter(&mut rng).take(len).collect())
}
