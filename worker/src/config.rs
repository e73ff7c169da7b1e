use std::{path::PathBuf, time::Duration};

/// Immutable execution bounds for a worker instance.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// This worker's task index, task 0 is the chief.
    pub task_index: usize,
    /// The experiment directory, home of the checkpoints and the training log.
    pub expdir: PathBuf,
    /// Training stops once the global step reaches this value.
    pub max_steps: u64,
    /// Wall clock time between two chief checkpoints.
    pub checkpoint_every: Duration,
    /// A training record is written every time the global step crosses a multiple of this.
    pub log_every: u64,
    /// Global gradient norm ceiling.
    pub clip_norm: f32,
    pub dropout_keep_prob: f32,
    /// How long to wait between retries while the parameter servers are uninitialized.
    pub poll_interval: Duration,
    /// Seed for the random initialization and the dropout masks.
    pub seed: u64,
}

impl WorkerConfig {
    /// Creates a new worker configuration with the default training bounds.
    ///
    /// # Args
    /// * `task_index` - This worker's index in the cluster's worker list.
    /// * `expdir` - The experiment directory.
    ///
    /// # Returns
    /// A `WorkerConfig` instance.
    pub fn new(task_index: usize, expdir: impl Into<PathBuf>) -> Self {
        Self {
            task_index,
            expdir: expdir.into(),
            max_steps: 1_000_000,
            checkpoint_every: Duration::from_secs(900),
            log_every: 10,
            clip_norm: 5.0,
            dropout_keep_prob: 1.0,
            poll_interval: Duration::from_secs(1),
            seed: 0,
        }
    }

    /// Whether this worker owns checkpointing and initialization.
    pub fn is_chief(&self) -> bool {
        self.task_index == 0
    }

    /// The directory holding the chief's checkpoints.
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.expdir.join("checkpoints")
    }

    /// The path of this worker's JSON lines training log.
    pub fn log_path(&self) -> PathBuf {
        self.expdir.join(format!("worker{}.log", self.task_index))
    }
}
