use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{CorpusErr, Result};

/// The token every out of vocabulary word maps to.
pub const UNK: &str = "<UNK>";
/// The index reserved for `UNK`.
pub const UNK_ID: u32 = 0;

/// A closed vocabulary: a dense, deterministic token <-> index mapping.
///
/// Index `0` is always `UNK`, the rest are the tokens that reached the minimum count
/// sorted by descending frequency and then by the token itself, so building twice from the
/// same data yields the same mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocab {
    tokens: Vec<String>,
    index: HashMap<String, u32>,
}

/// On-disk representation, the index of a token is its position.
#[derive(Serialize, Deserialize)]
struct VocabFile {
    tokens: Vec<String>,
}

impl Vocab {
    /// Builds a vocabulary from a set of token streams.
    ///
    /// Runs in a single pass over the tokens and keeps one counter per distinct token.
    ///
    /// # Arguments
    /// * `streams` - The sentences to count tokens from.
    /// * `min_count` - The minimum amount of occurrences for a token to get its own index.
    ///
    /// # Returns
    /// The built vocabulary, just `UNK` when `streams` is empty.
    pub fn build<I, S, T>(streams: I, min_count: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut counts: HashMap<String, usize> = HashMap::new();

        for token in streams.into_iter().flatten() {
            let token = token.as_ref();
            match counts.get_mut(token) {
                Some(count) => *count += 1,
                None => {
                    counts.insert(token.to_owned(), 1);
                }
            }
        }

        let distinct = counts.len();
        let mut kept: Vec<_> = counts
            .into_iter()
            .filter(|(token, count)| *count >= min_count && token != UNK)
            .collect();

        kept.sort_unstable_by(|(a, ca), (b, cb)| cb.cmp(ca).then_with(|| a.cmp(b)));

        let tokens = std::iter::once(UNK.to_owned())
            .chain(kept.into_iter().map(|(token, _)| token))
            .collect();

        let vocab = Self::from_tokens(tokens);
        debug!(distinct = distinct, kept = vocab.len(), min_count = min_count; "built vocabulary");
        vocab
    }

    fn from_tokens(tokens: Vec<String>) -> Self {
        let index = tokens
            .iter()
            .enumerate()
            .map(|(i, token)| (token.clone(), i as u32))
            .collect();

        Self { tokens, index }
    }

    /// Returns the index of `token`, `UNK_ID` if it isn't part of the vocabulary.
    #[inline]
    pub fn lookup(&self, token: &str) -> u32 {
        self.index.get(token).copied().unwrap_or(UNK_ID)
    }

    /// Returns the token at `index`, if any.
    #[inline]
    pub fn token(&self, index: u32) -> Option<&str> {
        self.tokens.get(index as usize).map(String::as_str)
    }

    /// The amount of entries, `UNK` included.
    #[inline]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// A vocabulary always holds `UNK`, so it is never empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Persists the vocabulary at `path`.
    ///
    /// The file is written next to its destination and renamed into place, so a reader
    /// polling for it never observes a partial write.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = VocabFile {
            tokens: self.tokens.clone(),
        };

        let bytes = serde_json::to_vec(&file).map_err(|e| Self::corrupt(path, e))?;
        let tmp = tmp_path(path);
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Loads a vocabulary previously written with `save`.
    ///
    /// # Errors
    /// `CorpusErr::Vocab` if the file is missing or isn't a valid vocabulary, a worker must
    /// never continue with a vocabulary that differs from the rest of the cluster.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| Self::corrupt(path, e))?;
        let file: VocabFile = serde_json::from_slice(&bytes).map_err(|e| Self::corrupt(path, e))?;

        if file.tokens.first().map(String::as_str) != Some(UNK) {
            return Err(Self::corrupt(path, "the first entry isn't the unknown token"));
        }

        let vocab = Self::from_tokens(file.tokens);

        if vocab.index.len() != vocab.tokens.len() {
            return Err(Self::corrupt(path, "duplicated tokens"));
        }

        Ok(vocab)
    }

    fn corrupt(path: &Path, detail: impl ToString) -> CorpusErr {
        CorpusErr::Vocab {
            path: path.to_owned(),
            detail: detail.to_string(),
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
