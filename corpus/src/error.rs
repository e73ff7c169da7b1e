use std::{error::Error, fmt, io, path::PathBuf};

/// The corpus module's result type.
pub type Result<T> = std::result::Result<T, CorpusErr>;

/// Failures while reading, indexing or batching the corpus.
#[derive(Debug)]
pub enum CorpusErr {
    Io(io::Error),
    /// A corpus line without the username/text separator.
    MalformedLine {
        line: usize,
    },
    /// A vocabulary file that can't be read back.
    Vocab {
        path: PathBuf,
        detail: String,
    },
    InvalidShard {
        index: usize,
        count: usize,
    },
    /// Batches were requested from a dataset without records.
    EmptyDataset,
}

impl fmt::Display for CorpusErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorpusErr::Io(e) => write!(f, "io error: {e}"),
            CorpusErr::MalformedLine { line } => {
                write!(f, "malformed corpus line {line}: missing tab separator")
            }
            CorpusErr::Vocab { path, detail } => {
                write!(f, "can't load vocabulary {}: {detail}", path.display())
            }
            CorpusErr::InvalidShard { index, count } => {
                write!(f, "invalid shard {index} of {count}")
            }
            CorpusErr::EmptyDataset => f.write_str("the dataset has no records"),
        }
    }
}

impl Error for CorpusErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CorpusErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CorpusErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<CorpusErr> for io::Error {
    fn from(value: CorpusErr) -> Self {
        match value {
            CorpusErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
