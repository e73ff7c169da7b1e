//! Worker side of the distributed trainer: the training loop that pulls parameters from the
//! parameter servers, computes a clipped gradient on its shard and pushes it back, together
//! with the model, checkpointing, evaluation and generation pieces the `node` binary drives.

pub mod checkpoint;
pub mod clip;
pub mod config;
pub mod error;
pub mod eval;
pub mod generate;
pub mod initialization;
mod loop_;
pub mod metrics;
pub mod model;
pub mod net;
pub mod params;
pub mod readiness;
mod state;

pub use checkpoint::{Checkpoint, CheckpointManager};
pub use config::WorkerConfig;
pub use error::{Result, WorkerErr};
pub use loop_::{StopFlag, WorkerLoop};
pub use metrics::WorkerMetrics;
pub use model::{LanguageModel, ModelKind, RnnLm, StepLoss};
pub use net::{InProcessCluster, PsClient, PsCluster, TcpCluster};
pub use params::ParamService;
