use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use corpus::PreparedDataset;
use log::{debug, info, warn};
use rand::{SeedableRng, rngs::StdRng};
use tokio::{task, time};

use crate::{
    Result, WorkerConfig,
    checkpoint::CheckpointManager,
    clip,
    error::WorkerErr,
    initialization,
    metrics::{self, TrainingLog, TrainingRecord, WorkerMetrics},
    model::LanguageModel,
    params::ParamService,
    state::WorkerState,
};

/// A cooperative stop request, checked between training steps.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Orchestrates the worker lifecycle.
///
/// - Keeps persistent buffers in `WorkerState`.
/// - Pulls the parameters into `state.params`, computes the gradient into `state.grads`
///   and pushes it, with no per-step allocations.
/// - The chief initializes the parameter servers and checkpoints them.
pub struct WorkerLoop<M> {
    cfg: WorkerConfig,
    state: WorkerState,
    metrics: WorkerMetrics,
    model: M,
    stop: StopFlag,
}

impl<M: LanguageModel> WorkerLoop<M> {
    pub fn new(cfg: WorkerConfig, model: M) -> Self {
        Self {
            state: WorkerState::new(model.num_params()),
            metrics: WorkerMetrics::default(),
            stop: StopFlag::default(),
            cfg,
            model,
        }
    }

    /// A handle to request a stop from another task.
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    pub fn metrics(&self) -> &WorkerMetrics {
        &self.metrics
    }

    /// Chief only: initializes the servers from the latest checkpoint, or randomly.
    async fn initialize<P: ParamService>(&mut self, params: &mut P) -> Result<u64> {
        let manager = CheckpointManager::new(self.cfg.checkpoint_dir());
        let num_params = self.model.num_params();

        let (step, init) = match manager.restore_latest()? {
            Some(checkpoint) => {
                if checkpoint.params.len() != num_params {
                    return Err(WorkerErr::Checkpoint {
                        path: manager.dir().to_path_buf(),
                        detail: format!(
                            "holds {} parameters, the model has {num_params}",
                            checkpoint.params.len()
                        ),
                    });
                }

                info!(step = checkpoint.step; "restoring from checkpoint");
                (checkpoint.step, checkpoint.params)
            }
            None => {
                info!("no checkpoint found, starting from scratch");
                let init = initialization::uniform(num_params, initialization::INIT_SCALE, self.cfg.seed)?;
                (0, init)
            }
        };

        params.init(step, &init).await?;
        Ok(step)
    }

    /// Pulls until every server is initialized.
    ///
    /// # Returns
    /// `false` if a stop was requested while waiting.
    async fn pull_ready<P: ParamService>(&mut self, params: &mut P) -> Result<bool> {
        loop {
            if params.pull(&mut self.state.params).await? {
                return Ok(true);
            }

            if self.stop.is_stopped() {
                return Ok(false);
            }

            info!(task_index = self.cfg.task_index; "parameter servers uninitialized, retrying");
            time::sleep(self.cfg.poll_interval).await;
        }
    }

    /// Periodic save, a failure is logged and training goes on.
    fn checkpoint(&self, manager: &CheckpointManager, step: u64) {
        if let Err(e) = manager.save(step, &self.state.params) {
            warn!(step = step; "checkpoint failed: {e}");
        }
    }

    /// Trains until the global step reaches `max_steps` or a stop is requested.
    ///
    /// # Arguments
    /// * `params` - The parameter servers.
    /// * `dataset` - This worker's prepared shard.
    ///
    /// # Returns
    /// The worker's metrics on a graceful stop.
    pub async fn run<P: ParamService>(
        mut self,
        params: &mut P,
        dataset: &mut PreparedDataset,
    ) -> Result<WorkerMetrics> {
        let cfg = self.cfg.clone();
        let manager = CheckpointManager::new(cfg.checkpoint_dir());
        let mut log = TrainingLog::open(&cfg.log_path())?;
        let mut rng = StdRng::seed_from_u64(cfg.seed.wrapping_add(cfg.task_index as u64));

        let mut global_step = if cfg.is_chief() {
            self.initialize(params).await?
        } else {
            0
        };

        let start = Instant::now();
        let mut last_checkpoint = Instant::now();

        while global_step < cfg.max_steps {
            if self.stop.is_stopped() {
                info!(step = global_step; "stop requested");
                break;
            }

            let t = Instant::now();
            if !self.pull_ready(params).await? {
                break;
            }
            self.metrics.pull_time += t.elapsed();

            let batch = dataset.next_batch()?;

            let t = Instant::now();
            let WorkerState { params: snapshot, grads } = &mut self.state;
            let loss = task::block_in_place(|| {
                self.model
                    .loss_and_grad(snapshot, &batch, cfg.dropout_keep_prob, &mut rng, grads)
            })?;
            let norm = clip::clip_by_global_norm(grads, cfg.clip_norm);
            self.metrics.compute_time += t.elapsed();

            let t = Instant::now();
            let step = params.push(&self.state.grads).await?;
            self.metrics.push_time += t.elapsed();

            self.metrics.add_tokens(loss.tokens);
            self.metrics.bump_step(step);
            debug!(step = step, tokens = loss.tokens; "loss {:.4}, grad norm {norm:.4}", loss.loss);

            if metrics::crosses_multiple(global_step, step, cfg.log_every) {
                let record = TrainingRecord {
                    iter: step,
                    cost: loss.loss,
                    time: start.elapsed().as_secs_f64(),
                };

                log.write(&record)?;
                info!(step = step, task_index = cfg.task_index; "cost {:.4}", loss.loss);
            }

            global_step = global_step.max(step);

            if cfg.is_chief() && last_checkpoint.elapsed() >= cfg.checkpoint_every {
                if params.pull(&mut self.state.params).await? {
                    self.checkpoint(&manager, global_step);
                }
                last_checkpoint = Instant::now();
            }
        }

        if cfg.is_chief() && params.pull(&mut self.state.params).await? {
            manager.save(global_step, &self.state.params)?;
        }

        params.disconnect().await?;
        info!(steps = self.metrics.steps, step = global_step; "worker finished");

        Ok(self.metrics)
    }
}
