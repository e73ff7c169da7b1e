use std::{
    collections::HashSet,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use bzip2::{Compression, write::BzEncoder};
use corpus::{CorpusErr, CorpusReader, Dataset, Mode, Record, Shard, UNK_ID, Vocab};
use tempfile::TempDir;

fn write_corpus(dir: &Path, name: &str, lines: &[String]) -> PathBuf {
    let path = dir.join(name);
    let file = File::create(&path).unwrap();
    let mut encoder = BzEncoder::new(file, Compression::fast());

    for line in lines {
        writeln!(encoder, "{line}").unwrap();
    }

    encoder.finish().unwrap();
    path
}

fn lines(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("user{}\tLine {i} of The corpus", i % 4)).collect()
}

fn read_all(reader: &CorpusReader) -> Vec<Record> {
    reader.records().unwrap().collect::<Result<_, _>>().unwrap()
}

fn line_number(record: &Record) -> usize {
    record.tokens[2].parse().unwrap()
}

#[test]
fn eval_partition_is_every_tenth_line() {
    let dir = TempDir::new().unwrap();
    let path = write_corpus(dir.path(), "clean.tsv.bz2", &lines(30));

    let eval = read_all(&CorpusReader::new(&path, Mode::Eval));
    let train = read_all(&CorpusReader::new(&path, Mode::Train));

    let eval_lines: Vec<_> = eval.iter().map(line_number).collect();
    assert_eq!(eval_lines, [0, 10, 20]);
    assert_eq!(train.len(), 27);
    assert!(train.iter().all(|r| line_number(r) % 10 != 0));

    assert_eq!(eval[1].username, "user2");
    assert_eq!(eval[1].tokens, ["<S>", "line", "10", "of", "the", "corpus", "</S>"]);
}

#[test]
fn rereading_reproduces_the_partitions() {
    let dir = TempDir::new().unwrap();
    let path = write_corpus(dir.path(), "clean.tsv.bz2", &lines(57));
    let reader = CorpusReader::new(&path, Mode::Train);

    assert_eq!(read_all(&reader), read_all(&reader));
}

#[test]
fn worker_shards_reconstruct_the_train_partition() {
    let dir = TempDir::new().unwrap();
    let path = write_corpus(dir.path(), "clean.tsv.bz2", &lines(30));

    let train: Vec<_> = read_all(&CorpusReader::new(&path, Mode::Train))
        .iter()
        .map(line_number)
        .collect();

    let mut union = HashSet::new();
    let mut sizes = Vec::new();

    for worker in 0..4 {
        let shard = Shard::new(worker, 4).unwrap();
        let records = read_all(&CorpusReader::new(&path, Mode::Train).with_shard(shard));
        sizes.push(records.len());

        for record in &records {
            assert!(union.insert(line_number(record)), "record in two shards");
        }
    }

    sizes.sort_unstable();
    assert_eq!(sizes, [6, 7, 7, 7]);
    assert_eq!(union, train.into_iter().collect());
}

#[test]
fn malformed_lines_are_fatal() {
    let dir = TempDir::new().unwrap();
    let mut content = lines(12);
    content[10] = "no separator here".into();
    let path = write_corpus(dir.path(), "bad.tsv.bz2", &content);

    // Line 10 belongs to the eval partition but train readers fail on it as well.
    let mut records = CorpusReader::new(&path, Mode::Train).records().unwrap();
    let results: Vec<_> = records.by_ref().collect();

    assert_eq!(results.len(), 10);
    assert!(results[..9].iter().all(Result::is_ok));
    assert!(matches!(results[9], Err(CorpusErr::MalformedLine { line: 10 })));
    assert!(records.next().is_none());
}

#[test]
fn limit_caps_the_lines_read() {
    let dir = TempDir::new().unwrap();
    let path = write_corpus(dir.path(), "clean.tsv.bz2", &lines(100));

    let records = read_all(&CorpusReader::new(&path, Mode::Train).with_limit(25));
    assert_eq!(records.len(), 23);
    assert!(records.iter().all(|r| line_number(r) <= 25));
    assert!(records.iter().any(|r| line_number(r) == 25));
}

#[test]
fn uncompressed_files_are_read_as_is() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plain.tsv");
    fs::write(&path, "ann\tHi there\r\nbob\tBye\r\n").unwrap();

    let records = read_all(&CorpusReader::new(&path, Mode::Eval));
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tokens, ["<S>", "hi", "there", "</S>"]);
}

#[test]
fn vocabulary_size_is_distinct_tokens_plus_unknown() {
    let dir = TempDir::new().unwrap();
    let content: Vec<_> = (0..100).map(|i| format!("u{i}\tw{} shared", i % 37)).collect();
    let path = write_corpus(dir.path(), "c.tsv.bz2", &content);

    let mut dataset = Dataset::new(10, 8, true);
    dataset
        .add_source(CorpusReader::new(&path, Mode::Train).records().unwrap())
        .unwrap();
    dataset
        .add_source(CorpusReader::new(&path, Mode::Eval).records().unwrap())
        .unwrap();
    assert_eq!(dataset.len(), 100);

    let vocab = Vocab::build(dataset.tokens(), 1);
    // 37 distinct words, "shared" and both sentence markers.
    assert_eq!(vocab.len(), 37 + 3 + 1);
}

#[test]
fn vocabulary_round_trips_through_disk() {
    let dir = TempDir::new().unwrap();
    let path = write_corpus(dir.path(), "c.tsv.bz2", &lines(200));
    let mut dataset = Dataset::new(10, 8, false);
    dataset
        .add_source(CorpusReader::new(&path, Mode::Train).records().unwrap())
        .unwrap();

    let vocab = Vocab::build(dataset.tokens(), 2);
    let usernames = Vocab::build(dataset.usernames().map(std::iter::once), 1);

    let vocab_path = dir.path().join("word_vocab.json");
    let user_path = dir.path().join("username_vocab.json");
    vocab.save(&vocab_path).unwrap();
    usernames.save(&user_path).unwrap();

    let loaded = Vocab::load(&vocab_path).unwrap();
    assert_eq!(loaded, vocab);
    assert_eq!(loaded.len(), vocab.len());
    for id in 0..vocab.len() as u32 {
        let token = vocab.token(id).unwrap();
        assert_eq!(loaded.lookup(token), id);
    }

    assert_eq!(Vocab::load(&user_path).unwrap(), usernames);
    assert!(!dir.path().join("word_vocab.json.tmp").exists());
}

#[test]
fn missing_or_corrupt_vocabularies_are_errors() {
    let dir = TempDir::new().unwrap();

    let missing = Vocab::load(dir.path().join("nope.json"));
    assert!(matches!(missing, Err(CorpusErr::Vocab { .. })));

    let corrupt = dir.path().join("corrupt.json");
    fs::write(&corrupt, b"{\"tokens\": [\"a\"").unwrap();
    assert!(matches!(Vocab::load(&corrupt), Err(CorpusErr::Vocab { .. })));

    let no_unk = dir.path().join("no_unk.json");
    fs::write(&no_unk, br#"{"tokens": ["a", "b"]}"#).unwrap();
    assert!(matches!(Vocab::load(&no_unk), Err(CorpusErr::Vocab { .. })));
}

#[test]
fn prepared_batches_from_a_real_corpus() {
    let dir = TempDir::new().unwrap();
    let path = write_corpus(dir.path(), "c.tsv.bz2", &lines(40));

    let mut dataset = Dataset::new(6, 5, true).with_seed(3);
    dataset
        .add_source(CorpusReader::new(&path, Mode::Train).records().unwrap())
        .unwrap();

    let vocab = Vocab::build(dataset.tokens(), 1);
    let usernames = Vocab::build(dataset.usernames().map(std::iter::once), 100);
    let mut prepared = dataset.prepare(&vocab, &usernames);

    for _ in 0..20 {
        let batch = prepared.next_batch().unwrap();
        assert_eq!(batch.token_ids.dim(), (5, 6));
        assert!(batch.seq_len.iter().all(|&l| l == 6));
        assert!(batch.usernames.iter().all(|&u| u == UNK_ID));
    }
}
