//! Single-process `train`, `eval` and `generate` modes.

use std::path::Path;

use anyhow::{Context, Result, ensure};
use corpus::{Mode, UNK_ID};
use log::info;
use parameter_server::ParameterServer;
use tokio::task;
use worker::{
    Checkpoint, CheckpointManager, InProcessCluster, LanguageModel, WorkerErr, WorkerLoop,
    eval::evaluate, generate::greedy,
};

use crate::{config::Params, leader, roles};

/// Builds the vocabularies out of the whole training partition and trains against an
/// in-process parameter store.
///
/// # Returns
/// The global step training stopped at.
pub async fn train(params: &Params, corpus: &Path, expdir: &Path) -> Result<u64> {
    let (words, users, mut dataset) = task::block_in_place(|| -> Result<_> {
        let dataset = leader::read_train(params, corpus, params.preshuffle)?;
        let (words, users) = leader::build_vocabularies(params, &dataset);
        leader::save_vocabularies(expdir, &words, &users)?;

        let dataset = dataset.prepare(&words, &users);
        Ok((words, users, dataset))
    })?;

    let model = params.model(&words, &users);
    let server = ParameterServer::new(0, params.store_shard_size(), params.optimizer());
    let mut cluster = InProcessCluster::in_process(&server, model.num_params());

    let worker = WorkerLoop::new(params.worker_config(0, expdir), model);
    roles::stop_on_ctrl_c(worker.stop_flag());

    let metrics = worker.run(&mut cluster, &mut dataset).await?;
    info!(steps = metrics.steps, global_step = metrics.global_step; "training finished");

    Ok(metrics.global_step)
}

/// Computes the perplexity of the latest checkpoint on the evaluation partition.
pub fn eval(params: &Params, corpus: &Path, expdir: &Path) -> Result<f64> {
    let (words, users) = leader::load_vocabularies(expdir)?;
    let model = params.model(&words, &users);
    let checkpoint = restore(params, expdir, model.num_params())?;

    let mut dataset = params.dataset(false);
    dataset.add_source(params.reader(corpus, Mode::Eval).records()?)?;
    let dataset = dataset.prepare(&words, &users);

    let perplexity = evaluate(&model, &checkpoint.params, &dataset)?;
    let value = perplexity
        .value()
        .context("the evaluation partition holds no target tokens")?;

    info!(step = checkpoint.step, tokens = perplexity.tokens(); "perplexity {value:.3}");
    Ok(value)
}

/// Greedily decodes from the latest checkpoint, conditioned on `username` when given.
pub fn generate(
    params: &Params,
    expdir: &Path,
    username: Option<&str>,
    max_tokens: usize,
) -> Result<Vec<String>> {
    let (words, users) = leader::load_vocabularies(expdir)?;
    let model = params.model(&words, &users);
    let checkpoint = restore(params, expdir, model.num_params())?;

    let username = username.map_or(UNK_ID, |name| users.lookup(name));
    Ok(greedy(&model, &checkpoint.params, &words, username, max_tokens)?)
}

fn restore(params: &Params, expdir: &Path, num_params: usize) -> Result<Checkpoint> {
    let manager = CheckpointManager::new(params.worker_config(0, expdir).checkpoint_dir());
    let checkpoint = manager
        .restore_latest()?
        .ok_or_else(|| WorkerErr::NoCheckpoint(manager.dir().to_path_buf()))?;

    ensure!(
        checkpoint.params.len() == num_params,
        "checkpoint holds {} parameters, the model needs {num_params}",
        checkpoint.params.len()
    );

    Ok(checkpoint)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn params() -> Params {
        let mut params = Params::parse(
            r#"{"max_len": 8, "batch_size": 4, "model": "hyper", "dropout_keep_prob": 0.9,
                "hidden_size": 6, "learning_rate": 0.01, "word_min_count": 1,
                "username_min_count": 1, "max_steps": 12}"#,
        )
        .unwrap();
        params.store_shard_size = 32;
        params
    }

    fn write_corpus(path: &Path) {
        let text: String = (0..40)
            .map(|i| format!("user{}\tthe quick fox number {}\n", i % 4, i % 3))
            .collect();
        fs::write(path, text).unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn train_then_eval_then_generate() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("corpus.txt");
        write_corpus(&corpus);
        let params = params();

        let step = train(&params, &corpus, dir.path()).await.unwrap();
        assert_eq!(step, 12);
        assert!(dir.path().join("worker0.log").exists());

        let perplexity = eval(&params, &corpus, dir.path()).unwrap();
        assert!(perplexity.is_finite() && perplexity > 1.0);

        let tokens = generate(&params, dir.path(), Some("user1"), 5).unwrap();
        assert!(tokens.len() <= 5);
        assert!(tokens.iter().all(|t| t != corpus::EOS));
    }

    #[test]
    fn eval_without_checkpoint_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("corpus.txt");
        write_corpus(&corpus);

        let params = params();
        let dataset = leader::read_train(&params, &corpus, false).unwrap();
        let (words, users) = leader::build_vocabularies(&params, &dataset);
        leader::save_vocabularies(dir.path(), &words, &users).unwrap();

        let err = eval(&params, &corpus, dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WorkerErr>(),
            Some(WorkerErr::NoCheckpoint(_))
        ));
    }
}
