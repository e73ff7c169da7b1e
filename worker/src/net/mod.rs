mod client;
mod cluster;

pub use client::PsClient;
pub use cluster::{InProcessCluster, PsCluster, TcpCluster};
