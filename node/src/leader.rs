//! Shared experiment setup done once by parameter server task 0.

use std::path::Path;

use anyhow::{Context, Result};
use corpus::{Dataset, Mode, Vocab};
use log::info;
use worker::readiness::{self, Readiness};

use crate::config::Params;

pub const WORD_VOCAB: &str = "word_vocab.json";
pub const USERNAME_VOCAB: &str = "username_vocab.json";

/// Reads the whole training partition into an unprepared dataset.
pub fn read_train(params: &Params, corpus: &Path, preshuffle: bool) -> Result<Dataset> {
    let mut dataset = params.dataset(preshuffle);
    let records = params
        .reader(corpus, Mode::Train)
        .records()
        .with_context(|| format!("opening corpus {}", corpus.display()))?;

    let n = dataset.add_source(records)?;
    info!(records = n; "read training partition");
    Ok(dataset)
}

/// Builds the word and username vocabularies out of a training dataset.
pub fn build_vocabularies(params: &Params, dataset: &Dataset) -> (Vocab, Vocab) {
    let words = Vocab::build(dataset.tokens(), params.word_min_count);
    let users = Vocab::build([dataset.usernames()], params.username_min_count);

    info!(words = words.len(), usernames = users.len(); "built vocabularies");
    (words, users)
}

pub fn save_vocabularies(expdir: &Path, words: &Vocab, users: &Vocab) -> Result<()> {
    words.save(expdir.join(WORD_VOCAB))?;
    users.save(expdir.join(USERNAME_VOCAB))?;
    Ok(())
}

pub fn load_vocabularies(expdir: &Path) -> Result<(Vocab, Vocab)> {
    let words = Vocab::load(expdir.join(WORD_VOCAB))
        .with_context(|| format!("loading {WORD_VOCAB} from {}", expdir.display()))?;
    let users = Vocab::load(expdir.join(USERNAME_VOCAB))
        .with_context(|| format!("loading {USERNAME_VOCAB} from {}", expdir.display()))?;

    Ok((words, users))
}

/// Builds and saves both vocabularies, then raises the readiness marker.
///
/// A marker left by a previous run means the setup already happened and is kept as is.
pub fn prepare_experiment(params: &Params, corpus: &Path, expdir: &Path) -> Result<()> {
    if readiness::check(expdir)? == Readiness::Ready {
        info!("readiness marker found, keeping the existing vocabularies");
        return Ok(());
    }

    let dataset = read_train(params, corpus, false)?;
    let (words, users) = build_vocabularies(params, &dataset);
    save_vocabularies(expdir, &words, &users)?;

    readiness::mark_ready(expdir)?;
    info!("experiment ready");
    Ok(())
}
