use std::{fs, num::NonZeroUsize, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use corpus::{CorpusReader, Dataset, Mode, Vocab};
use parameter_server::optimization::{OptimizerKind, OptimizerSpec};
use serde::{Deserialize, Serialize};
use worker::{ModelKind, RnnLm, WorkerConfig};

/// The experiment's copy of the configuration.
pub const PARAMS_FILE: &str = "params.json";

/// Hyperparameters of an experiment, read from `params.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Params {
    pub max_len: usize,
    pub batch_size: usize,
    pub model: ModelKind,
    pub dropout_keep_prob: f32,
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    #[serde(default)]
    pub optimizer: OptimizerKind,
    #[serde(default = "default_word_min_count")]
    pub word_min_count: usize,
    #[serde(default = "default_username_min_count")]
    pub username_min_count: usize,
    /// Upper bound on the corpus lines read by every reader.
    #[serde(default = "default_record_limit")]
    pub record_limit: usize,
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,
    #[serde(default = "default_checkpoint_secs")]
    pub checkpoint_secs: u64,
    #[serde(default = "default_log_every")]
    pub log_every: u64,
    #[serde(default = "default_clip_norm")]
    pub clip_norm: f32,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_preshuffle")]
    pub preshuffle: bool,
    /// Length of the parameter store shards every server updates in parallel.
    #[serde(default = "default_store_shard_size")]
    pub store_shard_size: usize,
}

fn default_hidden_size() -> usize {
    150
}

fn default_learning_rate() -> f32 {
    1e-4
}

fn default_word_min_count() -> usize {
    20
}

fn default_username_min_count() -> usize {
    50
}

fn default_record_limit() -> usize {
    2_500_000
}

fn default_max_steps() -> u64 {
    1_000_000
}

fn default_checkpoint_secs() -> u64 {
    900
}

fn default_log_every() -> u64 {
    10
}

fn default_clip_norm() -> f32 {
    5.0
}

fn default_preshuffle() -> bool {
    true
}

fn default_store_shard_size() -> usize {
    4096
}

impl Params {
    /// Reads and validates the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading params file {}", path.display()))?;

        Self::parse(&text).with_context(|| format!("invalid params file {}", path.display()))
    }

    /// Parses and validates a configuration.
    pub fn parse(text: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(text)?;
        params.validate()?;
        Ok(params)
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.max_len >= 1, "max_len must be positive");
        ensure!(self.batch_size > 0, "batch_size must be positive");
        ensure!(self.hidden_size > 0, "hidden_size must be positive");
        ensure!(
            self.dropout_keep_prob > 0.0 && self.dropout_keep_prob <= 1.0,
            "dropout_keep_prob must be in (0, 1], got {}",
            self.dropout_keep_prob
        );
        ensure!(self.log_every > 0, "log_every must be positive");
        ensure!(self.clip_norm > 0.0, "clip_norm must be positive");
        ensure!(self.store_shard_size > 0, "store_shard_size must be positive");
        Ok(())
    }

    /// Copies the configuration file verbatim into the experiment directory.
    pub fn copy_into(source: &Path, expdir: &Path) -> Result<()> {
        fs::create_dir_all(expdir)
            .with_context(|| format!("creating experiment directory {}", expdir.display()))?;

        let target = expdir.join(PARAMS_FILE);
        if fs::canonicalize(source).ok() == fs::canonicalize(&target).ok() {
            return Ok(());
        }

        fs::copy(source, &target)
            .with_context(|| format!("copying params into {}", target.display()))?;
        Ok(())
    }

    /// A corpus reader over `mode`, bounded by `record_limit`.
    pub fn reader(&self, corpus: &Path, mode: Mode) -> CorpusReader {
        CorpusReader::new(corpus, mode).with_limit(self.record_limit)
    }

    /// An empty dataset batching with this configuration.
    ///
    /// Rows are one token wider than `max_len` so inputs and targets can both hold
    /// `max_len` positions after the shift.
    pub fn dataset(&self, preshuffle: bool) -> Dataset {
        Dataset::new(self.max_len + 1, self.batch_size, preshuffle).with_seed(self.seed)
    }

    pub fn model(&self, words: &Vocab, users: &Vocab) -> RnnLm {
        RnnLm::new(self.model, words.len(), users.len(), self.hidden_size)
    }

    pub fn optimizer(&self) -> OptimizerSpec {
        OptimizerSpec::new(self.optimizer, self.learning_rate)
    }

    pub fn store_shard_size(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.store_shard_size).unwrap_or(NonZeroUsize::MIN)
    }

    /// The training loop bounds of worker `task_index`.
    pub fn worker_config(&self, task_index: usize, expdir: &Path) -> WorkerConfig {
        let mut cfg = WorkerConfig::new(task_index, expdir);
        cfg.max_steps = self.max_steps;
        cfg.checkpoint_every = Duration::from_secs(self.checkpoint_secs);
        cfg.log_every = self.log_every;
        cfg.clip_norm = self.clip_norm;
        cfg.dropout_keep_prob = self.dropout_keep_prob;
        cfg.seed = self.seed;
        cfg
    }
}
