//! The two cluster roles of `node distrib`.

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use corpus::{Dataset, Mode, Shard};
use log::info;
use parameter_server::ParameterServer;
use tokio::{net::TcpListener, signal, task};
use worker::{LanguageModel, StopFlag, TcpCluster, WorkerLoop, readiness};

use crate::{config::Params, leader};

/// Delay between two connection attempts to a parameter server that isn't listening yet.
const CONNECT_RETRY: Duration = Duration::from_secs(1);

/// Runs parameter server `task_index` until interrupted.
///
/// Task 0 prepares the shared experiment state before it starts serving.
pub async fn run_ps(
    params: &Params,
    corpus: &Path,
    expdir: &Path,
    task_index: usize,
    addr: &str,
) -> Result<()> {
    if task_index == 0 {
        task::block_in_place(|| leader::prepare_experiment(params, corpus, expdir))?;
    }

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(task_index = task_index; "parameter server listening at {addr}");

    let server = ParameterServer::new(task_index, params.store_shard_size(), params.optimizer());

    tokio::select! {
        ret = server.serve(listener) => ret?,
        _ = signal::ctrl_c() => info!("received ctrl-c, shutting down"),
    }

    Ok(())
}

/// Trains as worker `task_index` out of `num_workers` until the global step reaches the
/// configured maximum or the process is interrupted.
pub async fn run_worker(
    params: &Params,
    corpus: &Path,
    expdir: &Path,
    ps_hosts: &[String],
    task_index: usize,
    num_workers: usize,
) -> Result<()> {
    // The shard is read while the leader may still be building the vocabularies.
    let dataset = task::block_in_place(|| read_shard(params, corpus, task_index, num_workers))?;

    readiness::wait_ready(expdir, readiness::POLL_INTERVAL).await?;

    let (words, users) = leader::load_vocabularies(expdir)?;
    let mut dataset = dataset.prepare(&words, &users);

    let model = params.model(&words, &users);
    let mut cluster = TcpCluster::connect(ps_hosts, model.num_params(), CONNECT_RETRY).await?;

    let worker = WorkerLoop::new(params.worker_config(task_index, expdir), model);
    stop_on_ctrl_c(worker.stop_flag());

    let metrics = worker.run(&mut cluster, &mut dataset).await?;
    info!(
        steps = metrics.steps,
        tokens = metrics.tokens,
        global_step = metrics.global_step;
        "worker finished"
    );

    Ok(())
}

/// Reads worker `task_index`'s shard of the training partition, unprepared.
pub fn read_shard(
    params: &Params,
    corpus: &Path,
    task_index: usize,
    num_workers: usize,
) -> Result<Dataset> {
    let shard = Shard::new(task_index, num_workers)?;
    let records = params
        .reader(corpus, Mode::Train)
        .with_shard(shard)
        .records()
        .with_context(|| format!("opening corpus {}", corpus.display()))?;

    let mut dataset = params
        .dataset(params.preshuffle)
        .with_seed(params.seed.wrapping_add(task_index as u64));
    let n = dataset.add_source(records)?;

    info!(task_index = task_index, records = n; "read training shard");
    Ok(dataset)
}

/// Raises `stop` on the first ctrl-c, the loop notices it between two steps.
pub fn stop_on_ctrl_c(stop: StopFlag) {
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, stopping after the current step");
            stop.stop();
        }
    });
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn params() -> Params {
        Params::parse(r#"{"max_len": 8, "batch_size": 2, "model": "mikolov", "dropout_keep_prob": 1.0}"#)
            .unwrap()
    }

    #[test]
    fn shard_is_read_without_the_leader() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("corpus.txt");
        let text: String = (0..30).map(|i| format!("user\tline {i}\n")).collect();
        fs::write(&corpus, text).unwrap();

        let first = read_shard(&params(), &corpus, 0, 2).unwrap();
        let second = read_shard(&params(), &corpus, 1, 2).unwrap();

        assert_eq!(first.len() + second.len(), 27);
        assert_eq!(readiness::check(dir.path()).unwrap(), readiness::Readiness::Pending);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unreadable_corpus_fails_before_the_barrier() {
        let dir = tempfile::tempdir().unwrap();
        let corpus = dir.path().join("missing.txt");
        let hosts = ["127.0.0.1:1".to_string()];

        let binding = params();
        let run = run_worker(&binding, &corpus, dir.path(), &hosts, 0, 1);
        let res = tokio::time::timeout(Duration::from_secs(5), run).await;

        assert!(matches!(res, Ok(Err(_))));
    }
}
