use std::sync::atomic::{AtomicU64, Ordering};

/// The cluster wide training step, hosted by parameter server task 0.
#[derive(Debug, Default)]
pub struct GlobalStep(AtomicU64);

impl GlobalStep {
    /// Creates a new `GlobalStep` starting at `step`.
    pub fn new(step: u64) -> Self {
        Self(AtomicU64::new(step))
    }

    /// Returns the current step.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Counts one applied gradient.
    ///
    /// # Returns
    /// The step after the increment.
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}
