//! Adam with bias-corrected moment estimates.
//!
//! For every parameter `p` with gradient `g`, at update `t`:
//!
//! ```text
//! m <- b1 * m + (1 - b1) * g
//! v <- b2 * v + (1 - b2) * g^2
//! p <- p - lr * sqrt(1 - b2^t) / (1 - b1^t) * m / (sqrt(v) + eps)
//! ```
//!
//! The two correction factors are folded into a single per-update step size, so the
//! moment buffers themselves are never rescaled.

use super::Optimizer;
use crate::storage::{Result, SizeMismatchErr};

/// Decay of the first moment estimate.
pub const BETA1: f32 = 0.9;
/// Decay of the second moment estimate.
pub const BETA2: f32 = 0.999;
/// Added to the root of the second moment so silent parameters don't divide by zero.
pub const EPSILON: f32 = 1e-8;

/// Adam over one store shard.
///
/// Only the learning rate is configurable from `params.json`, the decays and epsilon are
/// [`BETA1`], [`BETA2`] and [`EPSILON`] unless built through [`Adam::new`].
#[derive(Debug)]
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    eps: f32,
    /// `beta1^t` and `beta2^t`, advanced once per update.
    decay1: f32,
    decay2: f32,
    m: Box<[f32]>,
    v: Box<[f32]>,
}

impl Adam {
    /// Adam over `len` parameters with the default decays.
    pub fn with_learning_rate(len: usize, lr: f32) -> Self {
        Self::new(len, lr, BETA1, BETA2, EPSILON)
    }

    /// # Arguments
    /// * `len` - The amount of parameters this instance updates.
    /// * `lr` - The learning rate.
    /// * `beta1`, `beta2` - Decays of the first and second moment estimates.
    /// * `eps` - Denominator offset.
    pub fn new(len: usize, lr: f32, beta1: f32, beta2: f32, eps: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            eps,
            decay1: 1.,
            decay2: 1.,
            m: vec![0.; len].into_boxed_slice(),
            v: vec![0.; len].into_boxed_slice(),
        }
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        if grad.len() != params.len() || params.len() != self.m.len() {
            return Err(SizeMismatchErr {
                expected: self.m.len(),
                got: grad.len().max(params.len()),
            });
        }

        let (b1, b2, eps) = (self.beta1, self.beta2, self.eps);
        self.decay1 *= b1;
        self.decay2 *= b2;
        let step = self.lr * (1. - self.decay2).sqrt() / (1. - self.decay1);

        for (((p, &g), m), v) in params
            .iter_mut()
            .zip(grad)
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
        {
            *m = b1 * *m + (1. - b1) * g;
            *v = b2 * *v + (1. - b2) * g * g;
            *p -= step * *m / (v.sqrt() + eps);
        }

        Ok(())
    }
}
