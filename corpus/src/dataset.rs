use log::{info, warn};
use ndarray::Array2;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use crate::{Batch, CorpusErr, PAD_ID, Record, Result, Vocab};

/// Buffered records waiting for their vocabularies.
///
/// This is the raw half of the dataset lifecycle: records go in through `add_source` and
/// `prepare` turns the buffer into a `PreparedDataset`, the only type batches can be
/// taken from.
#[derive(Debug, Clone)]
pub struct Dataset {
    max_len: usize,
    batch_size: usize,
    preshuffle: bool,
    seed: u64,
    records: Vec<Record>,
}

impl Dataset {
    /// Creates an empty dataset.
    ///
    /// # Arguments
    /// * `max_len` - The width of every batch row. Training uses the maximum sequence
    ///   length plus one, so inputs and targets can be shifted views of the same row.
    /// * `batch_size` - The amount of rows per batch.
    /// * `preshuffle` - Whether to permute the records once prepared and on every epoch.
    ///
    /// # Panics
    /// If `max_len < 2` or `batch_size == 0`.
    pub fn new(max_len: usize, batch_size: usize, preshuffle: bool) -> Self {
        assert!(max_len >= 2, "max_len must leave room for an input and a target");
        assert!(batch_size > 0, "batch_size must be > 0");

        Self {
            max_len,
            batch_size,
            preshuffle,
            seed: 0,
            records: Vec::new(),
        }
    }

    /// Sets the seed of the shuffling rng.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Appends every record of `source` to the buffer.
    ///
    /// # Returns
    /// The amount of records added, or the first error yielded by `source`.
    pub fn add_source<I>(&mut self, source: I) -> Result<usize>
    where
        I: IntoIterator<Item = Result<Record>>,
    {
        let before = self.records.len();

        for record in source {
            self.records.push(record?);
        }

        Ok(self.records.len() - before)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The token streams of the buffered records, in arrival order.
    pub fn tokens(&self) -> impl Iterator<Item = &[String]> {
        self.records.iter().map(|r| r.tokens.as_slice())
    }

    /// The usernames of the buffered records, in arrival order.
    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.username.as_str())
    }

    /// Converts every record to ids, fixing their width to `max_len`.
    ///
    /// Sequences longer than `max_len` are truncated from the tail: the leading tokens,
    /// sentence start included, are kept.
    ///
    /// # Arguments
    /// * `vocab` - The word vocabulary.
    /// * `username_vocab` - The username vocabulary.
    pub fn prepare(self, vocab: &Vocab, username_vocab: &Vocab) -> PreparedDataset {
        let Self {
            max_len,
            batch_size,
            preshuffle,
            seed,
            records,
        } = self;

        let n = records.len();
        let mut ids = Array2::from_elem((n, max_len), PAD_ID);
        let mut seq_len = Vec::with_capacity(n);
        let mut usernames = Vec::with_capacity(n);
        let mut truncated = 0;

        for (mut row, record) in ids.rows_mut().into_iter().zip(&records) {
            let len = record.tokens.len().min(max_len);
            if len < record.tokens.len() {
                truncated += 1;
            }

            for (slot, token) in row.iter_mut().zip(&record.tokens[..len]) {
                *slot = vocab.lookup(token);
            }

            seq_len.push(len);
            usernames.push(username_vocab.lookup(&record.username));
        }

        if truncated > 0 {
            warn!(truncated = truncated, max_len = max_len; "truncated over-length sequences");
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..n).collect();
        if preshuffle {
            order.shuffle(&mut rng);
        }

        info!(records = n, batch_size = batch_size; "dataset prepared");

        PreparedDataset {
            max_len,
            batch_size,
            preshuffle,
            ids,
            seq_len,
            usernames,
            order,
            cursor: 0,
            epoch: 0,
            rng,
        }
    }
}

/// Numeric records ready to be batched.
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    max_len: usize,
    batch_size: usize,
    preshuffle: bool,
    ids: Array2<u32>,
    seq_len: Vec<usize>,
    usernames: Vec<u32>,
    order: Vec<usize>,
    cursor: usize,
    epoch: usize,
    rng: StdRng,
}

impl PreparedDataset {
    #[inline]
    pub fn len(&self) -> usize {
        self.seq_len.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.seq_len.is_empty()
    }

    #[inline]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[inline]
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// The amount of completed passes over the records.
    #[inline]
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// The amount of batches needed to go over every record once.
    pub fn num_batches(&self) -> usize {
        self.len().div_ceil(self.batch_size)
    }

    /// Returns the next `batch_size` records, cycling over the dataset forever.
    ///
    /// Once every record was handed out a new epoch starts, reshuffled if the dataset
    /// preshuffles. A batch may straddle two epochs.
    ///
    /// # Errors
    /// `CorpusErr::EmptyDataset` if there are no records to cycle over.
    pub fn next_batch(&mut self) -> Result<Batch> {
        if self.is_empty() {
            return Err(CorpusErr::EmptyDataset);
        }

        let mut rows = Vec::with_capacity(self.batch_size);

        while rows.len() < self.batch_size {
            if self.cursor == self.order.len() {
                self.cursor = 0;
                self.epoch += 1;

                if self.preshuffle {
                    self.order.shuffle(&mut self.rng);
                }
            }

            rows.push(self.order[self.cursor]);
            self.cursor += 1;
        }

        Ok(self.gather(&rows))
    }

    /// Walks the records exactly once, in storage order and without wrapping around.
    ///
    /// Yields `num_batches` batches, the last one padded with empty rows when the records
    /// don't fill it.
    pub fn eval_batches(&self) -> impl Iterator<Item = Batch> + '_ {
        let indices: Vec<usize> = (0..self.len()).collect();

        (0..self.num_batches()).map(move |b| {
            let start = b * self.batch_size;
            let end = (start + self.batch_size).min(self.len());
            self.gather(&indices[start..end])
        })
    }

    fn gather(&self, indices: &[usize]) -> Batch {
        let mut batch = Batch::empty(self.batch_size, self.max_len);

        for (row, &idx) in indices.iter().enumerate() {
            batch.token_ids.row_mut(row).assign(&self.ids.row(idx));
            batch.seq_len[row] = self.seq_len[idx];
            batch.usernames[row] = self.usernames[idx];
        }

        batch.rows = indices.len();
        batch
    }
}
