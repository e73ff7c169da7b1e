use ndarray::{Array2, ArrayView2, s};

/// Token id used to right-pad rows.
///
/// It shares its value with `UNK_ID`: padded positions are never looked at because every
/// consumer masks positions at or beyond `seq_len`.
pub const PAD_ID: u32 = 0;

/// A fixed-shape batch ready for the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// `batch_size x max_len` token ids, right-padded with `PAD_ID`.
    pub token_ids: Array2<u32>,
    /// True length of every row, sentence markers included.
    pub seq_len: Vec<usize>,
    /// Username id of every row.
    pub usernames: Vec<u32>,
    /// Amount of leading rows backed by a record; the rest are empty filler rows.
    pub rows: usize,
}

impl Batch {
    /// Creates an all padding batch.
    pub(crate) fn empty(batch_size: usize, max_len: usize) -> Self {
        Self {
            token_ids: Array2::from_elem((batch_size, max_len), PAD_ID),
            seq_len: vec![0; batch_size],
            usernames: vec![0; batch_size],
            rows: 0,
        }
    }

    #[inline]
    pub fn batch_size(&self) -> usize {
        self.token_ids.nrows()
    }

    #[inline]
    pub fn max_len(&self) -> usize {
        self.token_ids.ncols()
    }

    /// The model inputs, every row but its last position.
    pub fn inputs(&self) -> ArrayView2<'_, u32> {
        self.token_ids.slice(s![.., ..-1])
    }

    /// The next-token targets, every row shifted one position to the left.
    pub fn targets(&self) -> ArrayView2<'_, u32> {
        self.token_ids.slice(s![.., 1..])
    }

    /// Amount of valid target positions in `row`.
    #[inline]
    pub fn target_len(&self, row: usize) -> usize {
        self.seq_len[row].saturating_sub(1)
    }

    /// Amount of valid target positions in the whole batch.
    pub fn target_tokens(&self) -> usize {
        (0..self.batch_size()).map(|row| self.target_len(row)).sum()
    }
}
