//! Data side of the training pipeline: vocabularies, the user-attributed corpus reader with
//! its positional train/eval split and worker sharding, and the padded batcher.

pub mod batch;
pub mod dataset;
pub mod error;
pub mod reader;
pub mod split;
pub mod vocab;

pub use batch::{Batch, PAD_ID};
pub use dataset::{Dataset, PreparedDataset};
pub use error::{CorpusErr, Result};
pub use reader::{BOS, CorpusReader, EOS, Record, Records, tokenize};
pub use split::{Mode, Shard};
pub use vocab::{UNK, UNK_ID, Vocab};
