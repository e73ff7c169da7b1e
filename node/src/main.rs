mod cli;
mod cluster;
mod config;
mod leader;
mod local;
mod roles;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use crate::{
    cli::{Cli, Command, Experiment},
    cluster::{ClusterSpec, Role},
    config::Params,
};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Command::Distrib(args) => {
            let spec = ClusterSpec::parse(&args.ps_hosts, &args.worker_hosts)?;
            let role = spec.role(args.job_name, args.task_index)?;
            let params = setup(&args.experiment)?;
            let expdir = &args.experiment.expdir;

            match role {
                Role::ParameterServer { task_index, addr } => {
                    roles::run_ps(&params, &args.corpus, expdir, task_index, &addr).await?
                }
                Role::Worker { task_index } => {
                    roles::run_worker(
                        &params,
                        &args.corpus,
                        expdir,
                        spec.ps_hosts(),
                        task_index,
                        spec.num_workers(),
                    )
                    .await?
                }
            }
        }
        Command::Train(args) => {
            let params = setup(&args.experiment)?;
            local::train(&params, &args.corpus, &args.experiment.expdir).await?;
        }
        Command::Eval(args) => {
            let params = setup(&args.experiment)?;
            let perplexity = tokio::task::block_in_place(|| {
                local::eval(&params, &args.corpus, &args.experiment.expdir)
            })?;
            println!("perplexity: {perplexity:.3}");
        }
        Command::Generate(args) => {
            let params = setup(&args.experiment)?;
            let tokens = local::generate(
                &params,
                &args.experiment.expdir,
                args.username.as_deref(),
                args.max_tokens,
            )?;
            println!("{}", tokens.join(" "));
        }
    }

    Ok(())
}

/// Loads the configuration, records it in the experiment directory and sizes the compute pool.
fn setup(experiment: &Experiment) -> Result<Params> {
    let params = Params::load(&experiment.params)?;
    Params::copy_into(&experiment.params, &experiment.expdir)?;

    rayon::ThreadPoolBuilder::new()
        .num_threads(experiment.worker_threads)
        .build_global()
        .context("building the compute thread pool")?;

    info!(worker_threads = experiment.worker_threads; "experiment {} configured", experiment.expdir.display());
    Ok(params)
}
