use std::{
    fs::{File, OpenOptions},
    io::{self, BufWriter, Write},
    path::Path,
    time::Duration,
};

use serde::{Deserialize, Serialize};

/// Counters a worker accumulates over a training run.
#[derive(Debug, Default, Clone)]
pub struct WorkerMetrics {
    pub pull_time: Duration,
    pub compute_time: Duration,
    pub push_time: Duration,

    /// Steps this worker contributed.
    pub steps: u64,
    /// Target tokens this worker learned from.
    pub tokens: u64,
    /// The last global step a parameter server reported.
    pub global_step: u64,
}

impl WorkerMetrics {
    #[inline]
    pub fn bump_step(&mut self, global_step: u64) {
        self.steps += 1;
        self.global_step = global_step;
    }

    #[inline]
    pub fn add_tokens(&mut self, n: usize) {
        self.tokens += n as u64;
    }
}

/// One line of a worker's training log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
    /// The global step.
    pub iter: u64,
    /// Mean loss per target token of the batch.
    pub cost: f32,
    /// Seconds since training started.
    pub time: f64,
}

/// An append only JSON lines file of `TrainingRecord`s.
pub struct TrainingLog {
    out: BufWriter<File>,
}

impl TrainingLog {
    /// Opens `path` for appending, creating it if needed.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            out: BufWriter::new(file),
        })
    }

    /// Appends a record and flushes it.
    pub fn write(&mut self, record: &TrainingRecord) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")?;
        self.out.flush()
    }
}

/// Whether moving the global step from `prev` to `next` crosses a multiple of `every`.
///
/// Steps are shared by every worker, so a single worker rarely sees each multiple.
pub fn crosses_multiple(prev: u64, next: u64, every: u64) -> bool {
    every > 0 && next / every > prev / every
}
