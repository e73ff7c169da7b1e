use serde::{Deserialize, Serialize};

use super::{Adam, GradientDescent, Optimizer};

/// The optimization algorithms a parameter server can run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    #[default]
    Adam,
    GradientDescent,
}

/// Everything needed to build an optimizer for one shard of parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizerSpec {
    pub kind: OptimizerKind,
    pub learning_rate: f32,
}

impl OptimizerSpec {
    /// Creates a new `OptimizerSpec`.
    pub fn new(kind: OptimizerKind, learning_rate: f32) -> Self {
        Self {
            kind,
            learning_rate,
        }
    }

    /// Builds an optimizer for a shard of `len` parameters.
    pub fn build(&self, len: usize) -> Box<dyn Optimizer + Send> {
        match self.kind {
            OptimizerKind::Adam => Box::new(Adam::with_learning_rate(len, self.learning_rate)),
            OptimizerKind::GradientDescent => Box::new(GradientDescent::new(self.learning_rate)),
        }
    }
}
