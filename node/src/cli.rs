use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use worker::generate::MAX_TOKENS;

use crate::cluster::JobName;

#[derive(Parser, Debug)]
#[command(name = "node")]
#[command(about = "Distributed user-attributed RNN language model trainer")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one task of a parameter server / worker cluster
    Distrib(DistribArgs),
    /// Train in a single process against an in-process parameter store
    Train(LocalArgs),
    /// Report the perplexity of the latest checkpoint on the evaluation partition
    Eval(LocalArgs),
    /// Greedily decode a sentence with the latest checkpoint
    Generate(GenerateArgs),
}

/// Paths every mode needs.
#[derive(Args, Debug, Clone)]
pub struct Experiment {
    /// Experiment directory holding vocabularies, checkpoints and logs
    #[arg(long)]
    pub expdir: PathBuf,

    /// Hyperparameter file (params.json)
    #[arg(long)]
    pub params: PathBuf,

    /// Size of the thread pool running the model computations
    #[arg(long, default_value_t = 8)]
    pub worker_threads: usize,
}

#[derive(Args, Debug, Clone)]
pub struct DistribArgs {
    #[arg(long, value_enum)]
    pub job_name: JobName,

    #[arg(long)]
    pub task_index: usize,

    /// Comma separated host:port list of the parameter servers
    #[arg(long)]
    pub ps_hosts: String,

    /// Comma separated host:port list of the workers
    #[arg(long)]
    pub worker_hosts: String,

    /// Training corpus, optionally bzip2 compressed
    #[arg(long)]
    pub corpus: PathBuf,

    #[command(flatten)]
    pub experiment: Experiment,
}

#[derive(Args, Debug, Clone)]
pub struct LocalArgs {
    /// Training corpus, optionally bzip2 compressed
    #[arg(long)]
    pub corpus: PathBuf,

    #[command(flatten)]
    pub experiment: Experiment,
}

#[derive(Args, Debug, Clone)]
pub struct GenerateArgs {
    /// Username to condition the decode on, unknown users map to UNK
    #[arg(long)]
    pub username: Option<String>,

    #[arg(long, default_value_t = MAX_TOKENS)]
    pub max_tokens: usize,

    #[command(flatten)]
    pub experiment: Experiment,
}
