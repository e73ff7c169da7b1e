use corpus::Batch;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis, Zip, linalg};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rayon::prelude::*;

use super::{LanguageModel, ModelKind, StepLoss};
use crate::{Result, error::WorkerErr};

/// An Elman recurrent language model.
///
/// Flat parameter layout, in order:
/// `embedding (V x H) | w_x (H x H) | w_h (H x H) | b_h (H) | users (U x H, hyper only) |
/// w_out (H x V) | b_out (V)`.
#[derive(Debug, Clone)]
pub struct RnnLm {
    kind: ModelKind,
    vocab: usize,
    users: usize,
    hidden: usize,
}

struct Weights<'a> {
    emb: ArrayView2<'a, f32>,
    w_x: ArrayView2<'a, f32>,
    w_h: ArrayView2<'a, f32>,
    b_h: ArrayView1<'a, f32>,
    users: Option<ArrayView2<'a, f32>>,
    w_out: ArrayView2<'a, f32>,
    b_out: ArrayView1<'a, f32>,
}

struct Grads<'a> {
    emb: ArrayViewMut2<'a, f32>,
    w_x: ArrayViewMut2<'a, f32>,
    w_h: ArrayViewMut2<'a, f32>,
    b_h: ArrayViewMut1<'a, f32>,
    users: Option<ArrayViewMut2<'a, f32>>,
    w_out: ArrayViewMut2<'a, f32>,
    b_out: ArrayViewMut1<'a, f32>,
}

/// Everything the backward pass needs from the forward pass over one row.
struct Trace {
    tokens: Vec<usize>,
    targets: Vec<usize>,
    user: usize,
    /// Hidden states, row 0 is the initial state.
    h: Array2<f32>,
    /// Inverted dropout masks, one row per step.
    masks: Option<Array2<f32>>,
    probs: Array2<f32>,
    nll: f64,
}

impl RnnLm {
    /// Creates a new `RnnLm`.
    ///
    /// # Arguments
    /// * `kind` - Whether the recurrence is conditioned on the username.
    /// * `vocab` - Size of the word vocabulary.
    /// * `users` - Size of the username vocabulary.
    /// * `hidden` - Size of the embeddings and the recurrent state.
    pub fn new(kind: ModelKind, vocab: usize, users: usize, hidden: usize) -> Self {
        Self {
            kind,
            vocab,
            users,
            hidden,
        }
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    fn user_rows(&self) -> usize {
        match self.kind {
            ModelKind::Hyper => self.users,
            ModelKind::Mikolov => 0,
        }
    }

    /// Maps ids the model has no row for onto the unknown token.
    fn clamp(id: u32, len: usize) -> usize {
        let id = id as usize;
        if id < len { id } else { 0 }
    }

    /// Gives a view of the raw parameter slice as the model's matrices.
    fn view_params<'a>(&self, params: &'a [f32]) -> Result<Weights<'a>> {
        let (v, u, h) = (self.vocab, self.user_rows(), self.hidden);

        if params.len() != self.num_params() {
            return Err(WorkerErr::ParamsLengthMismatch {
                got: params.len(),
                expected: self.num_params(),
            });
        }

        let (emb, rest) = params.split_at(v * h);
        let (w_x, rest) = rest.split_at(h * h);
        let (w_h, rest) = rest.split_at(h * h);
        let (b_h, rest) = rest.split_at(h);
        let (users, rest) = rest.split_at(u * h);
        let (w_out, b_out) = rest.split_at(h * v);

        let users = match self.kind {
            ModelKind::Hyper => Some(ArrayView2::from_shape((u, h), users)?),
            ModelKind::Mikolov => None,
        };

        Ok(Weights {
            emb: ArrayView2::from_shape((v, h), emb)?,
            w_x: ArrayView2::from_shape((h, h), w_x)?,
            w_h: ArrayView2::from_shape((h, h), w_h)?,
            b_h: ArrayView1::from_shape(h, b_h)?,
            users,
            w_out: ArrayView2::from_shape((h, v), w_out)?,
            b_out: ArrayView1::from_shape(v, b_out)?,
        })
    }

    /// Gives a view of the raw gradient slice as the model's matrices.
    fn view_grad<'a>(&self, grad: &'a mut [f32]) -> Result<Grads<'a>> {
        let (v, u, h) = (self.vocab, self.user_rows(), self.hidden);

        if grad.len() != self.num_params() {
            return Err(WorkerErr::GradientLengthMismatch {
                got: grad.len(),
                expected: self.num_params(),
            });
        }

        let (emb, rest) = grad.split_at_mut(v * h);
        let (w_x, rest) = rest.split_at_mut(h * h);
        let (w_h, rest) = rest.split_at_mut(h * h);
        let (b_h, rest) = rest.split_at_mut(h);
        let (users, rest) = rest.split_at_mut(u * h);
        let (w_out, b_out) = rest.split_at_mut(h * v);

        let users = match self.kind {
            ModelKind::Hyper => Some(ArrayViewMut2::from_shape((u, h), users)?),
            ModelKind::Mikolov => None,
        };

        Ok(Grads {
            emb: ArrayViewMut2::from_shape((v, h), emb)?,
            w_x: ArrayViewMut2::from_shape((h, h), w_x)?,
            w_h: ArrayViewMut2::from_shape((h, h), w_h)?,
            b_h: ArrayViewMut1::from_shape(h, b_h)?,
            users,
            w_out: ArrayViewMut2::from_shape((h, v), w_out)?,
            b_out: ArrayViewMut1::from_shape(v, b_out)?,
        })
    }

    /// One recurrent step: `h = tanh(x W_x + h_prev W_h + b_h [+ user])`.
    fn cell(&self, w: &Weights, token: usize, user: usize, h_prev: ArrayView1<f32>) -> Array1<f32> {
        let mut a = w.b_h.to_owned();
        a += &w.emb.row(token).dot(&w.w_x);
        a += &h_prev.dot(&w.w_h);

        if let Some(users) = &w.users {
            a += &users.row(user);
        }

        a.mapv_inplace(f32::tanh);
        a
    }

    /// Turns logits into probabilities in place.
    ///
    /// # Returns
    /// The log of the softmax normalizer, `max + ln(sum(exp(x - max)))`.
    fn softmax(logits: &mut Array1<f32>) -> f32 {
        let max = logits.fold(f32::NEG_INFINITY, |m, &x| m.max(x));
        logits.mapv_inplace(|x| (x - max).exp());
        let sum = logits.sum();
        *logits /= sum;
        max + sum.ln()
    }

    fn forward_row(
        &self,
        w: &Weights,
        batch: &Batch,
        row: usize,
        keep: f32,
        mut rng: Option<&mut StdRng>,
    ) -> Trace {
        let (v, h_dim) = (self.vocab, self.hidden);
        let len = batch.target_len(row);

        let inputs = batch.inputs();
        let targets = batch.targets();
        let tokens: Vec<_> = (0..len).map(|t| Self::clamp(inputs[[row, t]], v)).collect();
        let targets: Vec<_> = (0..len).map(|t| Self::clamp(targets[[row, t]], v)).collect();
        let user = Self::clamp(batch.usernames[row], self.users.max(1));

        let mut h = Array2::zeros((len + 1, h_dim));
        let mut probs = Array2::zeros((len, v));
        let mut masks = (keep < 1.0 && rng.is_some()).then(|| Array2::zeros((len, h_dim)));
        let mut nll = 0.0;

        for t in 0..len {
            let next = self.cell(w, tokens[t], user, h.row(t));
            h.row_mut(t + 1).assign(&next);

            let mut out = next;
            if let (Some(masks), Some(rng)) = (masks.as_mut(), rng.as_deref_mut()) {
                let mut mask = masks.row_mut(t);
                mask.mapv_inplace(|_| if rng.random_bool(f64::from(keep)) { 1.0 / keep } else { 0.0 });
                out *= &mask;
            }

            let mut logits = out.dot(&w.w_out);
            logits += &w.b_out;
            let target_logit = logits[targets[t]];
            let log_norm = Self::softmax(&mut logits);
            nll += f64::from(log_norm - target_logit);

            probs.row_mut(t).assign(&logits);
        }

        Trace {
            tokens,
            targets,
            user,
            h,
            masks,
            probs,
            nll,
        }
    }

    /// Backpropagates through time over one row, accumulating into `g`.
    fn backward_row(&self, w: &Weights, trace: &Trace, g: &mut Grads, scale: f32) {
        let mut dh_next = Array1::<f32>::zeros(self.hidden);

        for t in (0..trace.tokens.len()).rev() {
            let mut dlogits = trace.probs.row(t).to_owned();
            dlogits[trace.targets[t]] -= 1.0;
            dlogits *= scale;

            let h_t = trace.h.row(t + 1);
            let out = match &trace.masks {
                Some(masks) => &h_t * &masks.row(t),
                None => h_t.to_owned(),
            };

            linalg::general_mat_mul(
                1.0,
                &out.view().insert_axis(Axis(1)),
                &dlogits.view().insert_axis(Axis(0)),
                1.0,
                &mut g.w_out,
            );
            g.b_out += &dlogits;

            let mut dh = w.w_out.dot(&dlogits);
            if let Some(masks) = &trace.masks {
                dh *= &masks.row(t);
            }
            dh += &dh_next;

            let da = Zip::from(&dh).and(&h_t).map_collect(|&d, &h| d * (1.0 - h * h));
            let da_row = da.view().insert_axis(Axis(0));
            let token = trace.tokens[t];

            linalg::general_mat_mul(
                1.0,
                &w.emb.row(token).insert_axis(Axis(1)),
                &da_row,
                1.0,
                &mut g.w_x,
            );
            linalg::general_mat_mul(
                1.0,
                &trace.h.row(t).insert_axis(Axis(1)),
                &da_row,
                1.0,
                &mut g.w_h,
            );
            g.b_h += &da;

            if let Some(users) = g.users.as_mut() {
                let mut row = users.row_mut(trace.user);
                row += &da;
            }

            let mut emb = g.emb.row_mut(token);
            emb += &w.w_x.dot(&da);

            dh_next = w.w_h.dot(&da);
        }
    }
}

impl LanguageModel for RnnLm {
    fn num_params(&self) -> usize {
        let (v, u, h) = (self.vocab, self.user_rows(), self.hidden);
        v * h + 2 * h * h + h + u * h + h * v + v
    }

    fn loss_and_grad(
        &self,
        params: &[f32],
        batch: &Batch,
        dropout_keep_prob: f32,
        rng: &mut StdRng,
        grad: &mut [f32],
    ) -> Result<StepLoss> {
        let w = self.view_params(params)?;
        let n = self.num_params();

        if grad.len() != n {
            return Err(WorkerErr::GradientLengthMismatch {
                got: grad.len(),
                expected: n,
            });
        }

        grad.fill(0.);
        let tokens = batch.target_tokens();
        if tokens == 0 {
            return Ok(StepLoss::default());
        }

        let scale = 1.0 / tokens as f32;
        let seeds: Vec<u64> = (0..batch.batch_size()).map(|_| rng.random()).collect();

        let (nll, acc) = (0..batch.batch_size())
            .into_par_iter()
            .filter(|&row| batch.target_len(row) > 0)
            .try_fold(
                || (0.0, vec![0.0; n]),
                |(nll, mut acc), row| -> Result<(f64, Vec<f32>)> {
                    let mut row_rng = StdRng::seed_from_u64(seeds[row]);
                    let trace = self.forward_row(&w, batch, row, dropout_keep_prob, Some(&mut row_rng));

                    let mut g = self.view_grad(&mut acc)?;
                    self.backward_row(&w, &trace, &mut g, scale);

                    Ok((nll + trace.nll, acc))
                },
            )
            .try_reduce(
                || (0.0, vec![0.0; n]),
                |(a_nll, mut a), (b_nll, b)| {
                    a.iter_mut().zip(&b).for_each(|(x, y)| *x += y);
                    Ok((a_nll + b_nll, a))
                },
            )?;

        grad.copy_from_slice(&acc);

        Ok(StepLoss {
            loss: (nll / tokens as f64) as f32,
            tokens,
        })
    }

    fn loss(&self, params: &[f32], batch: &Batch) -> Result<StepLoss> {
        let w = self.view_params(params)?;
        let tokens = batch.target_tokens();

        if tokens == 0 {
            return Ok(StepLoss::default());
        }

        let nll: f64 = (0..batch.batch_size())
            .into_par_iter()
            .filter(|&row| batch.target_len(row) > 0)
            .map(|row| self.forward_row(&w, batch, row, 1.0, None).nll)
            .sum();

        Ok(StepLoss {
            loss: (nll / tokens as f64) as f32,
            tokens,
        })
    }

    fn initial_state(&self) -> Array1<f32> {
        Array1::zeros(self.hidden)
    }

    fn next_token(
        &self,
        params: &[f32],
        token: u32,
        username: u32,
        state: ArrayView1<f32>,
    ) -> Result<(Array1<f32>, Array1<f32>)> {
        let w = self.view_params(params)?;
        let token = Self::clamp(token, self.vocab);
        let user = Self::clamp(username, self.users.max(1));

        let h = self.cell(&w, token, user, state);
        let mut dist = h.dot(&w.w_out);
        dist += &w.b_out;
        Self::softmax(&mut dist);

        Ok((dist, h))
    }
}
