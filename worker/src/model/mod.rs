//! The language model interface the training loop drives, plus the reference recurrent
//! model behind the `hyper` and `mikolov` configurations.

mod rnn;

use corpus::Batch;
use ndarray::{Array1, ArrayView1};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use rnn::RnnLm;

/// The model variants a `params.json` may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Recurrent state conditioned on a per-user embedding.
    Hyper,
    /// Plain recurrent model, the username is ignored.
    Mikolov,
}

/// The outcome of evaluating a model on one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepLoss {
    /// Mean negative log likelihood per target token.
    pub loss: f32,
    /// Amount of target tokens the mean was taken over.
    pub tokens: usize,
}

impl StepLoss {
    /// The summed negative log likelihood.
    pub fn total(&self) -> f64 {
        f64::from(self.loss) * self.tokens as f64
    }
}

/// A next-token model over a flat parameter vector.
///
/// Parameters live outside the model, in the parameter servers, so every call receives the
/// current snapshot.
pub trait LanguageModel: Send + Sync {
    /// The length of the flat parameter vector.
    fn num_params(&self) -> usize;

    /// Computes the batch loss and writes its gradient into `grad`.
    ///
    /// # Arguments
    /// * `params` - The current parameters.
    /// * `batch` - The batch to learn from.
    /// * `dropout_keep_prob` - Probability of keeping a hidden unit, `1.0` disables dropout.
    /// * `rng` - Source of the dropout masks.
    /// * `grad` - Where the gradient of the mean loss is written, same length as `params`.
    fn loss_and_grad(
        &self,
        params: &[f32],
        batch: &Batch,
        dropout_keep_prob: f32,
        rng: &mut StdRng,
        grad: &mut [f32],
    ) -> Result<StepLoss>;

    /// Computes the batch loss without dropout.
    fn loss(&self, params: &[f32], batch: &Batch) -> Result<StepLoss>;

    /// The recurrent state before the first token.
    fn initial_state(&self) -> Array1<f32>;

    /// Feeds one token and returns the next token distribution and the new state.
    fn next_token(
        &self,
        params: &[f32],
        token: u32,
        username: u32,
        state: ArrayView1<f32>,
    ) -> Result<(Array1<f32>, Array1<f32>)>;
}
