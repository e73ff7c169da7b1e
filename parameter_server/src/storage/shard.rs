use parking_lot::{Mutex, RwLock};

use super::{Result, SizeMismatchErr};
use crate::optimization::Optimizer;

/// A gradient sum and the amount of gradients added into it since the last update.
#[derive(Debug)]
struct GradBuffer {
    sum: Box<[f32]>,
    count: usize,
}

impl GradBuffer {
    fn zeros(len: usize) -> Self {
        Self {
            sum: vec![0.; len].into_boxed_slice(),
            count: 0,
        }
    }
}

/// A buffer for accumulating gradients and parameters across multiple threads.
#[derive(Debug)]
pub struct ParameterShard<O: Optimizer> {
    len: usize,
    grads: [Mutex<GradBuffer>; 2],
    params: RwLock<Box<[f32]>>,
    optimizer: Mutex<O>,
}

impl<O: Optimizer> ParameterShard<O> {
    /// Creates a new `ParameterShard`.
    ///
    /// # Arguments
    /// * `params` - The initial state of the parameters.
    /// * `optimizer` - The optimization algorithm.
    pub fn new(params: Vec<f32>, optimizer: O) -> Self {
        let len = params.len();

        Self {
            len,
            grads: [Mutex::new(GradBuffer::zeros(len)), Mutex::new(GradBuffer::zeros(len))],
            params: RwLock::new(params.into_boxed_slice()),
            optimizer: Mutex::new(optimizer),
        }
    }

    fn check(&self, got: usize) -> Result<()> {
        if got != self.len {
            return Err(SizeMismatchErr {
                expected: self.len,
                got,
            });
        }

        Ok(())
    }

    /// Accumulates `grad` into the active gradient.
    ///
    /// # Arguments
    /// * `active_idx` - The index of the active gradient, must be `0` or `1`.
    /// * `grad` - The gradient to accumulate to the active gradient.
    pub fn accumulate(&self, active_idx: usize, grad: &[f32]) -> Result<()> {
        self.check(grad.len())?;

        let mut active = self.grads[active_idx].lock();
        active.sum.iter_mut().zip(grad).for_each(|(acc, g)| *acc += g);
        active.count += 1;

        Ok(())
    }

    /// Updates the parameters using the frozen gradient via the optimizer and clears it.
    ///
    /// An empty buffer leaves both the parameters and the optimizer state untouched.
    ///
    /// # Arguments
    /// * `frozen_idx` - The index of the frozen gradient, must be `0` or `1`.
    pub fn update_params(&self, frozen_idx: usize) -> Result<()> {
        let mut frozen = self.grads[frozen_idx].lock();
        if frozen.count == 0 {
            return Ok(());
        }

        let mut params = self.params.write();
        self.optimizer.lock().update_params(&frozen.sum, &mut params)?;
        frozen.sum.fill(0.);
        frozen.count = 0;
        Ok(())
    }

    /// Copies the shard's parameters into `out`.
    ///
    /// # Returns
    /// A `SizeMismatchErr` if `out` isn't the same size as this shard.
    pub fn pull_params(&self, out: &mut [f32]) -> Result<()> {
        self.check(out.len())?;
        out.copy_from_slice(&self.params.read());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AddOptimizer;

    impl Optimizer for AddOptimizer {
        fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
            params.iter_mut().zip(grad).for_each(|(p, g)| *p += g);
            Ok(())
        }
    }

    #[test]
    fn test_accumulation_and_update() {
        let shard = ParameterShard::new(vec![0.; 3], AddOptimizer);

        shard.accumulate(0, &[1.0, 2.0, 3.0]).unwrap();
        shard.accumulate(0, &[1.0, 1.0, 1.0]).unwrap();

        assert_eq!(*shard.grads[0].lock().sum, [2., 3., 4.]);
        assert_eq!(*shard.grads[1].lock().sum, [0., 0., 0.]);

        shard.update_params(0).unwrap();

        let mut out = [0.; 3];
        shard.pull_params(&mut out).unwrap();
        assert_eq!(out, [2., 3., 4.]);
        assert_eq!(*shard.grads[0].lock().sum, [0., 0., 0.]);
    }

    #[test]
    fn test_double_buffering_flow() {
        let shard = ParameterShard::new(vec![0.], AddOptimizer);

        shard.accumulate(0, &[10.]).unwrap();
        shard.accumulate(1, &[5.]).unwrap();
        shard.update_params(0).unwrap();

        let mut out = [0.];
        shard.pull_params(&mut out).unwrap();
        assert_eq!(out, [10.]);

        shard.update_params(1).unwrap();
        shard.pull_params(&mut out).unwrap();
        assert_eq!(out, [15.]);
    }

    #[test]
    fn test_empty_buffer_skips_the_optimizer() {
        struct CountingOptimizer(usize);

        impl Optimizer for CountingOptimizer {
            fn update_params(&mut self, _grad: &[f32], _params: &mut [f32]) -> Result<()> {
                self.0 += 1;
                Ok(())
            }
        }

        let shard = ParameterShard::new(vec![0.; 2], CountingOptimizer(0));
        shard.update_params(0).unwrap();
        assert_eq!(shard.optimizer.lock().0, 0);

        shard.accumulate(0, &[0., 0.]).unwrap();
        shard.update_params(0).unwrap();
        assert_eq!(shard.optimizer.lock().0, 1);
    }

    #[test]
    fn test_size_mismatch() {
        let shard = ParameterShard::new(vec![0.; 2], AddOptimizer);

        let err = shard.accumulate(0, &[1.]).unwrap_err();
        assert_eq!(err, SizeMismatchErr { expected: 2, got: 1 });
        assert!(shard.pull_params(&mut [0.; 3]).is_err());
    }
}
