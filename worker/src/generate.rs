use corpus::{BOS, EOS, UNK, Vocab};

use crate::{Result, model::LanguageModel};

/// Default amount of tokens a greedy decode produces.
pub const MAX_TOKENS: usize = 10;

/// Greedily decodes from `<S>`, always taking the most likely next token.
///
/// # Arguments
/// * `model` - The model to decode with.
/// * `params` - The restored parameters.
/// * `vocab` - The word vocabulary.
/// * `username` - The username id to condition on.
/// * `max_tokens` - Upper bound on the produced tokens.
///
/// # Returns
/// The produced tokens, stopping before `</S>`.
pub fn greedy<M: LanguageModel>(
    model: &M,
    params: &[f32],
    vocab: &Vocab,
    username: u32,
    max_tokens: usize,
) -> Result<Vec<String>> {
    let eos = vocab.lookup(EOS);
    let mut token = vocab.lookup(BOS);
    let mut state = model.initial_state();
    let mut out = Vec::new();

    for _ in 0..max_tokens {
        let (dist, next_state) = model.next_token(params, token, username, state.view())?;
        state = next_state;

        token = dist
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
            .0 as u32;

        if token == eos {
            break;
        }

        out.push(vocab.token(token).unwrap_or(UNK).to_string());
    }

    Ok(out)
}
