//! Positional train/eval split and worker sharding.
//!
//! Both are pure functions of a record's position, so every process derives the same
//! partitions from the same file without talking to anyone and without keeping an
//! assignment table around.

use std::num::NonZeroUsize;

use crate::{CorpusErr, Result};

/// One in every `EVAL_EVERY` lines belongs to the evaluation partition.
pub const EVAL_EVERY: usize = 10;

/// The partition a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Returns the partition of the line at raw position `pos`.
#[inline]
pub fn partition_of(pos: usize) -> Mode {
    if pos % EVAL_EVERY == 0 {
        Mode::Eval
    } else {
        Mode::Train
    }
}

/// The slice of a partition a worker is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    index: usize,
    count: NonZeroUsize,
}

impl Shard {
    /// Creates the shard of worker `index` out of `count` workers.
    ///
    /// # Errors
    /// `CorpusErr::InvalidShard` if `count` is zero or `index` isn't below it.
    pub fn new(index: usize, count: usize) -> Result<Self> {
        match NonZeroUsize::new(count) {
            Some(count) if index < count.get() => Ok(Self { index, count }),
            _ => Err(CorpusErr::InvalidShard { index, count }),
        }
    }

    /// The shard that owns the whole partition, used when there's a single process.
    pub fn whole() -> Self {
        Self {
            index: 0,
            count: NonZeroUsize::MIN,
        }
    }

    #[inline]
    pub fn index(self) -> usize {
        self.index
    }

    #[inline]
    pub fn count(self) -> usize {
        self.count.get()
    }

    /// Whether this shard owns the record at position `pos` *within its partition*.
    ///
    /// Sharding is applied after the train/eval filter, so the union of every worker's
    /// shard is exactly the partition.
    #[inline]
    pub fn owns(self, pos: usize) -> bool {
        pos % self.count.get() == self.index
    }
}
