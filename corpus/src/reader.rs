use std::{
    fs::File,
    io::{BufRead, BufReader, Lines, Read},
    path::{Path, PathBuf},
};

use bzip2::read::MultiBzDecoder;
use log::{debug, info};

use crate::{
    CorpusErr, Result,
    split::{Mode, Shard, partition_of},
};

/// Sentence start marker.
pub const BOS: &str = "<S>";
/// Sentence end marker.
pub const EOS: &str = "</S>";

/// Raw position of the last line read, unless configured otherwise.
pub const DEFAULT_LIMIT: usize = 2_500_000;

const PROGRESS_EVERY: usize = 30_000;

/// A user-attributed sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub username: String,
    pub tokens: Vec<String>,
}

/// Lowercases `text`, splits it on whitespace and wraps it in sentence markers.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();

    std::iter::once(BOS.to_owned())
        .chain(lower.split_whitespace().map(str::to_owned))
        .chain(std::iter::once(EOS.to_owned()))
        .collect()
}

/// Reads `username<TAB>text` records out of a (possibly bzip2 compressed) corpus file.
///
/// The reader is a recipe rather than an open handle: every call to `records` starts from
/// the top of the file, which keeps the sequence restartable.
#[derive(Debug, Clone)]
pub struct CorpusReader {
    path: PathBuf,
    mode: Mode,
    shard: Shard,
    limit: usize,
}

impl CorpusReader {
    /// Creates a reader for the `mode` partition of the whole corpus.
    pub fn new<P: AsRef<Path>>(path: P, mode: Mode) -> Self {
        Self {
            path: path.as_ref().to_owned(),
            mode,
            shard: Shard::whole(),
            limit: DEFAULT_LIMIT,
        }
    }

    /// Restricts the reader to one worker's shard of the partition.
    pub fn with_shard(mut self, shard: Shard) -> Self {
        self.shard = shard;
        self
    }

    /// Stops reading after the line at raw position `limit`.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the corpus and returns a lazy iterator over this reader's records.
    ///
    /// Files ending in `.bz2` or `.bz` are decompressed on the fly.
    pub fn records(&self) -> Result<Records> {
        let file = File::open(&self.path)?;

        let compressed = matches!(
            self.path.extension().and_then(|ext| ext.to_str()),
            Some("bz2" | "bz")
        );

        let source: Box<dyn Read + Send> = if compressed {
            Box::new(MultiBzDecoder::new(file))
        } else {
            Box::new(file)
        };

        info!(
            shard = self.shard.index(),
            shards = self.shard.count();
            "reading {:?} records from {}", self.mode, self.path.display()
        );

        Ok(Records {
            lines: BufReader::new(source).lines(),
            mode: self.mode,
            shard: self.shard,
            limit: self.limit,
            pos: 0,
            partition_pos: 0,
            done: false,
        })
    }
}

/// Lazy, finite sequence of records produced by `CorpusReader::records`.
///
/// It stops after the first error.
pub struct Records {
    lines: Lines<BufReader<Box<dyn Read + Send>>>,
    mode: Mode,
    shard: Shard,
    limit: usize,
    pos: usize,
    partition_pos: usize,
    done: bool,
}

impl Records {
    fn fail(&mut self, err: CorpusErr) -> Option<Result<Record>> {
        self.done = true;
        Some(Err(err))
    }
}

impl Iterator for Records {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done && self.pos <= self.limit {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return self.fail(e.into()),
            };

            let pos = self.pos;
            self.pos += 1;

            if pos % PROGRESS_EVERY == 0 {
                debug!("read {pos} lines");
            }

            // Every line is checked, owned or not, so that all readers of the same file
            // fail at the same place.
            let Some((username, text)) = line.split_once('\t') else {
                return self.fail(CorpusErr::MalformedLine { line: pos });
            };

            if partition_of(pos) != self.mode {
                continue;
            }

            let partition_pos = self.partition_pos;
            self.partition_pos += 1;

            if !self.shard.owns(partition_pos) {
                continue;
            }

            let text = text.strip_suffix('\r').unwrap_or(text);
            return Some(Ok(Record {
                username: username.to_owned(),
                tokens: tokenize(text),
            }));
        }

        None
    }
}
