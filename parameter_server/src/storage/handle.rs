use std::ops::Deref;

use tokio::task;

use super::{ParameterStore, Result};
use crate::optimization::Optimizer;

/// The actual interface to interact with a `ParameterStore`.
///
/// It bridges the async runtime with the blocking CPU-bound implementation of the
/// `ParameterStore`, so it must be used from a multi threaded runtime.
pub struct ParameterHandle<O: Optimizer>(ParameterStore<O>);

impl<O: Optimizer> Clone for ParameterHandle<O> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<O: Optimizer> Deref for ParameterHandle<O> {
    type Target = ParameterStore<O>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<O: Optimizer> ParameterHandle<O> {
    /// Creates a new `ParameterHandle`
    ///
    /// # Arguments
    /// * `store` - The underlying parameter store.
    pub fn new(store: ParameterStore<O>) -> Self {
        Self(store)
    }
}

impl<O: Optimizer + Send> ParameterHandle<O> {
    /// Applies a gradient right away, without waiting for any other worker.
    ///
    /// When another push is mid-update the gradient is left pending and that push applies
    /// it before returning, so it is in the parameters by the time both calls are done.
    ///
    /// # Arguments
    /// * `grad` - A flat slice containing a new gradient for the whole store.
    ///
    /// # Returns
    /// A `SizeMismatchErr` if `grad` isn't the same size as the store.
    pub async fn apply(&self, grad: &[f32]) -> Result<()> {
        task::block_in_place(|| {
            self.0.accumulate(grad)?;
            self.0.update_params()
        })
    }

    /// Async call to the synchronous implementation of `ParameterStore::pull_params`.
    ///
    /// # Arguments
    /// * `out` - A mutable slice where the parameters will be copied.
    pub async fn pull_params(&self, out: &mut [f32]) -> Result<()> {
        task::block_in_place(|| self.0.pull_params(out))
    }
}
