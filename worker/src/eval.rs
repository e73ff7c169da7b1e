use corpus::PreparedDataset;
use log::info;

use crate::{
    Result,
    model::{LanguageModel, StepLoss},
};

/// A running perplexity, `exp(total nll / total target tokens)`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Perplexity {
    nll: f64,
    tokens: usize,
}

impl Perplexity {
    pub fn add(&mut self, loss: StepLoss) {
        self.nll += loss.total();
        self.tokens += loss.tokens;
    }

    pub fn tokens(&self) -> usize {
        self.tokens
    }

    /// The perplexity so far, `None` before any target token was seen.
    pub fn value(&self) -> Option<f64> {
        (self.tokens > 0).then(|| (self.nll / self.tokens as f64).exp())
    }
}

/// Walks every evaluation batch once and returns the corpus perplexity.
///
/// # Arguments
/// * `model` - The model to evaluate.
/// * `params` - The restored parameters.
/// * `dataset` - The prepared evaluation partition.
pub fn evaluate<M: LanguageModel>(
    model: &M,
    params: &[f32],
    dataset: &PreparedDataset,
) -> Result<Perplexity> {
    let mut perplexity = Perplexity::default();
    let total = dataset.num_batches();

    for (i, batch) in dataset.eval_batches().enumerate() {
        perplexity.add(model.loss(params, &batch)?);

        if let Some(value) = perplexity.value() {
            info!(batch = i + 1, batches = total; "running perplexity {value:.3}");
        }
    }

    Ok(perplexity)
}
