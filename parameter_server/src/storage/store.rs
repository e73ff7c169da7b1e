use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use parking_lot::RwLock;
use rayon::prelude::*;

use super::{ParameterShard, Result, SizeMismatchErr};
use crate::optimization::Optimizer;

/// The primary storage of parameters and accumulated gradients.
///
/// The mutating methods are private to the module, they become available
/// through the async interface of a `ParameterHandle`.
#[derive(Debug)]
pub struct ParameterStore<O: Optimizer> {
    len: usize,
    /// Index of the buffer gradients go into. Accumulations hold it shared, a swap holds
    /// it exclusively, so no gradient is split across both buffers.
    active_idx: Arc<RwLock<usize>>,
    updating: Arc<AtomicBool>,
    /// Gradients accumulated since the last buffer swap.
    pending: Arc<AtomicUsize>,
    shards: Arc<[ParameterShard<O>]>,
    shard_size: NonZeroUsize,
}

impl<O: Optimizer> Clone for ParameterStore<O> {
    fn clone(&self) -> Self {
        Self {
            len: self.len,
            active_idx: Arc::clone(&self.active_idx),
            updating: Arc::clone(&self.updating),
            pending: Arc::clone(&self.pending),
            shards: Arc::clone(&self.shards),
            shard_size: self.shard_size,
        }
    }
}

impl<O: Optimizer> ParameterStore<O> {
    /// Creates a new `ParameterStore`.
    ///
    /// # Arguments
    /// * `params` - The initial parameters, split in chunks of `shard_size`.
    /// * `shard_size` - The maximum amount of parameters per shard.
    /// * `optimizer_factory` - An `Optimizer` factory closure, called once per shard.
    pub fn new<F>(params: Vec<f32>, shard_size: NonZeroUsize, optimizer_factory: F) -> Self
    where
        F: FnMut(usize) -> O,
    {
        let len = params.len();
        let mut optimizer_factory = optimizer_factory;

        let shards: Vec<_> = params
            .chunks(shard_size.get())
            .map(|chunk| ParameterShard::new(chunk.to_vec(), optimizer_factory(chunk.len())))
            .collect();

        Self {
            len,
            active_idx: Arc::new(RwLock::new(0)),
            updating: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(AtomicUsize::new(0)),
            shards: Arc::from(shards),
            shard_size,
        }
    }

    /// Returns the amount of parameters in the storage.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the storage holds no parameters.
    pub fn is_empty(&self) -> bool {
        self.len == 0
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
}

impl<O: Optimizer + Send> ParameterStore<O> {
    /// Accumulates a new gradient into the active gradient buffer.
    ///
    /// # Arguments
    /// * `grad` - A flat slice containing a new gradient for the whole store.
    ///
    /// # Returns
    /// A `SizeMismatchErr` if the length of `grad` doesn't match the store.
    pub(super) fn accumulate(&self, grad: &[f32]) -> Result<()> {
        self.check(grad.len())?;
        let guard = self.active_idx.read();
        let active_idx = *guard;

        self.shards
            .par_iter()
            .zip(grad.par_chunks(self.shard_size.get()))
            .try_for_each(|(shard, grad_slice)| shard.accumulate(active_idx, grad_slice))?;

        self.pending.fetch_add(1, Ordering::SeqCst);
        drop(guard);
        Ok(())
    }

    /// Swaps the active gradient buffer and applies the frozen gradient to the parameters.
    ///
    /// This triggers a parallel update across all shards. If another thread is already
    /// updating, the call returns right away and that thread, which checks `pending` again
    /// after releasing the flag, applies the gradient instead.
    pub(super) fn update_params(&self) -> Result<()> {
        while self.pending.load(Ordering::SeqCst) > 0 {
            if self
                .updating
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return Ok(());
            }

            let frozen_idx = {
                let mut active_idx = self.active_idx.write();
                self.pending.store(0, Ordering::SeqCst);
                let frozen_idx = *active_idx;
                *active_idx ^= 1;
                frozen_idx
            };

            let res = self
                .shards
                .par_iter()
                .try_for_each(|shard| shard.update_params(frozen_idx));

            self.updating.store(false, Ordering::SeqCst);
            res?;
        }

        Ok(())
    }

    /// Gathers all the sharded parameters into a local buffer.
    ///
    /// # Arguments
    /// * `out` - A mutable slice where the parameters will be copied.
    ///
    /// # Returns
    /// A `SizeMismatchErr` if `out` isn't the size of the store.
    pub(super) fn pull_params(&self, out: &mut [f32]) -> Result<()> {
        self.check(out.len())?;

        self.shards
            .par_iter()
            .zip(out.par_chunks_mut(self.shard_size.get()))
            .try_for_each(|(shard, out_slice)| shard.pull_params(out_slice))
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

    fn create_test_store(params: usize, shard_size: usize) -> ParameterStore<AddOptimizer> {
        let shard_size = NonZeroUsize::new(shard_size).unwrap();
        ParameterStore::new(vec![0.; params], shard_size, |_| AddOptimizer)
    }

    #[test]
    fn test_handle_ragged_shards() {
        const PARAMS: usize = 15;
        const SHARD_SIZE: usize = 8;

        let store = create_test_store(PARAMS, SHARD_SIZE);
        assert_eq!(store.shards.len(), 2);

        store.accumulate(&[1.0; PARAMS]).unwrap();
        store.update_params().unwrap();

        let mut out = [0.0; PARAMS];
        store.pull_params(&mut out).unwrap();
        assert_eq!(out, [1.0; PARAMS]);
    }

    #[test]
    fn test_handle_buffer_swap() {
        const PARAMS: usize = 10;
        const SHARD_SIZE: usize = 1;

        let store = create_test_store(PARAMS, SHARD_SIZE);
        store.accumulate(&[1.0; PARAMS]).unwrap();

        store.update_params().unwrap();
        assert_eq!(*store.active_idx.read(), 1);
        store.accumulate(&[5.0; PARAMS]).unwrap();

        let mut params = [0.0; PARAMS];
        store.pull_params(&mut params).unwrap();
        assert_eq!(params, [1.0; PARAMS]);

        store.update_params().unwrap();
        store.pull_params(&mut params).unwrap();
        assert_eq!(params, [6.0; PARAMS]);
    }

    #[test]
    fn test_update_locking_mechanism() {
        let store = create_test_store(10, 1);
        store.accumulate(&[1.0; 10]).unwrap();
        store.updating.store(true, Ordering::SeqCst);

        let active_idx = *store.active_idx.read();
        store.update_params().unwrap();
        assert_eq!(*store.active_idx.read(), active_idx);

        store.updating.store(false, Ordering::Release);
        store.update_params().unwrap();
        assert_ne!(*store.active_idx.read(), active_idx);
        assert_eq!(store.pending.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_update_without_gradients_keeps_buffers() {
        let store = create_test_store(4, 2);

        store.update_params().unwrap();
        assert_eq!(*store.active_idx.read(), 0);
    }

    #[test]
    fn test_concurrent_pushes_are_all_applied() {
        const PARAMS: usize = 64;
        const THREADS: usize = 8;
        const PUSHES: usize = 200;

        let store = create_test_store(PARAMS, 16);

        std::thread::scope(|scope| {
            for _ in 0..THREADS {
                scope.spawn(|| {
                    for _ in 0..PUSHES {
                        store.accumulate(&[1.0; PARAMS]).unwrap();
                        store.update_params().unwrap();
                    }
                });
            }
        });

        let mut out = [0.0; PARAMS];
        store.pull_params(&mut out).unwrap();
        assert_eq!(out, [(THREADS * PUSHES) as f32; PARAMS]);
        assert_eq!(store.pending.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_keeps_initial_params() {
        let shard_size = NonZeroUsize::new(2).unwrap();
        let store = ParameterStore::new(vec![1., 2., 3.], shard_size, |_| AddOptimizer);

        let mut out = [0.; 3];
        store.pull_params(&mut out).unwrap();
        assert_eq!(out, [1., 2., 3.]);
    }

    #[test]
    fn test_rejects_wrong_sizes() {
        let store = create_test_store(4, 3);

        assert!(store.accumulate(&[1.; 5]).is_err());
        assert!(store.pull_params(&mut [0.; 3]).is_err());
    }
}
