use anyhow::{Result, bail, ensure};
use clap::ValueEnum;

/// The job a process was started for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JobName {
    Ps,
    Worker,
}

/// The addresses of every task in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSpec {
    ps: Vec<String>,
    workers: Vec<String>,
}

/// What this process does in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    ParameterServer { task_index: usize, addr: String },
    Worker { task_index: usize },
}

impl ClusterSpec {
    /// Parses the comma separated `host:port` lists of both jobs.
    ///
    /// # Errors
    /// If the parameter server list is empty or any entry isn't a `host:port` pair.
    pub fn parse(ps_hosts: &str, worker_hosts: &str) -> Result<Self> {
        let ps = parse_hosts(ps_hosts)?;
        let workers = parse_hosts(worker_hosts)?;

        ensure!(!ps.is_empty(), "the parameter server list is empty");
        ensure!(!workers.is_empty(), "the worker list is empty");

        Ok(Self { ps, workers })
    }

    pub fn ps_hosts(&self) -> &[String] {
        &self.ps
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Resolves the role of task `task_index` of `job`.
    ///
    /// # Errors
    /// If the task index is out of range for the job.
    pub fn role(&self, job: JobName, task_index: usize) -> Result<Role> {
        let hosts = match job {
            JobName::Ps => &self.ps,
            JobName::Worker => &self.workers,
        };

        ensure!(
            task_index < hosts.len(),
            "task index {task_index} out of range for {} {job:?} tasks",
            hosts.len()
        );

        Ok(match job {
            JobName::Ps => Role::ParameterServer {
                task_index,
                addr: self.ps[task_index].clone(),
            },
            JobName::Worker => Role::Worker { task_index },
        })
    }
}

fn parse_hosts(list: &str) -> Result<Vec<String>> {
    let list = list.trim();
    if list.is_empty() {
        return Ok(Vec::new());
    }

    list.split(',').map(|entry| parse_host(entry.trim())).collect()
}

fn parse_host(entry: &str) -> Result<String> {
    let Some((host, port)) = entry.rsplit_once(':') else {
        bail!("malformed host {entry:?}, expected host:port");
    };

    if host.is_empty() || port.parse::<u16>().is_err() {
        bail!("malformed host {entry:?}, expected host:port");
    }

    Ok(entry.to_owned())
}
