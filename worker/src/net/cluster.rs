use std::{io, time::Duration};

use comms::{OnoReceiver, OnoSender};
use futures::future::try_join_all;
use log::{info, warn};
use parameter_server::{ParameterServer, shard_range};
use tokio::{
    io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time,
};

use super::PsClient;
use crate::{Result, error::WorkerErr, params::ParamService};

/// Capacity of the in-memory pipe between a worker and an in-process server.
const DUPLEX_BUF: usize = 1 << 16;

/// The whole set of parameter servers, seen as one flat parameter vector.
///
/// Server `i` owns `shard_range(num_params, i, num_servers)`, server 0 reports the global step.
pub struct PsCluster<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    clients: Vec<PsClient<R, W>>,
    num_params: usize,
}

pub type TcpCluster = PsCluster<OwnedReadHalf, OwnedWriteHalf>;
pub type InProcessCluster = PsCluster<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

impl<R, W> PsCluster<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a new `PsCluster`.
    ///
    /// # Arguments
    /// * `num_params` - The length of the flat parameter vector.
    /// * `channels` - One channel per parameter server, in task index order.
    pub fn new(num_params: usize, channels: Vec<(OnoReceiver<R>, OnoSender<W>)>) -> Self {
        let count = channels.len();

        let clients = channels
            .into_iter()
            .enumerate()
            .map(|(id, (rx, tx))| PsClient::new(id, shard_range(num_params, id, count), rx, tx))
            .collect();

        Self {
            clients,
            num_params,
        }
    }

    pub fn num_servers(&self) -> usize {
        self.clients.len()
    }

    fn check_len(&self, got: usize) -> Result<()> {
        if got != self.num_params {
            return Err(WorkerErr::ParamsLengthMismatch {
                got,
                expected: self.num_params,
            });
        }

        Ok(())
    }
}

impl TcpCluster {
    /// Connects to every parameter server, retrying refused connections every `retry`.
    ///
    /// # Arguments
    /// * `addrs` - The servers' addresses, in task index order.
    /// * `num_params` - The length of the flat parameter vector.
    /// * `retry` - Time to wait before connecting again to a server that isn't listening yet.
    pub async fn connect(addrs: &[String], num_params: usize, retry: Duration) -> Result<Self> {
        let mut channels = Vec::with_capacity(addrs.len());

        for (server_id, addr) in addrs.iter().enumerate() {
            let stream = loop {
                match TcpStream::connect(addr.as_str()).await {
                    Ok(stream) => break stream,
                    Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                        info!(server_id = server_id; "waiting for parameter server at {addr}");
                        time::sleep(retry).await;
                    }
                    Err(e) => return Err(e.into()),
                }
            };

            stream.set_nodelay(true)?;
            let (rx, tx) = stream.into_split();
            channels.push(comms::channel(rx, tx));
        }

        Ok(Self::new(num_params, channels))
    }
}

impl InProcessCluster {
    /// Serves the whole parameter vector from a parameter server living in this process.
    ///
    /// Must be called from within a tokio runtime.
    pub fn in_process(server: &ParameterServer, num_params: usize) -> Self {
        let (wk_stream, sv_stream) = tokio::io::duplex(DUPLEX_BUF);
        let (sv_rx, sv_tx) = tokio::io::split(sv_stream);
        let (wk_rx, wk_tx) = tokio::io::split(wk_stream);
        let (sv_rx, sv_tx) = comms::channel(sv_rx, sv_tx);

        let server = server.clone();
        tokio::spawn(async move {
            if let Err(e) = server.handle_connection(sv_rx, sv_tx).await {
                warn!("in process parameter server failed: {e}");
            }
        });

        Self::new(num_params, vec![comms::channel(wk_rx, wk_tx)])
    }
}

impl<R, W> ParamService for PsCluster<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn num_params(&self) -> usize {
        self.num_params
    }

    async fn pull(&mut self, out: &mut [f32]) -> Result<bool> {
        self.check_len(out.len())?;

        let mut rest = out;
        let mut pulls = Vec::with_capacity(self.clients.len());

        for client in &mut self.clients {
            let (chunk, tail) = std::mem::take(&mut rest).split_at_mut(client.range().len());
            rest = tail;
            pulls.push(client.pull_into(chunk));
        }

        let ready = try_join_all(pulls).await?;
        Ok(ready.into_iter().all(|ready| ready))
    }

    async fn init(&mut self, step: u64, params: &[f32]) -> Result<()> {
        self.check_len(params.len())?;

        let inits = self
            .clients
            .iter_mut()
            .map(|client| {
                let range = client.range();
                client.init(step, &params[range])
            });

        try_join_all(inits).await?;
        Ok(())
    }

    async fn push(&mut self, grad: &[f32]) -> Result<u64> {
        self.check_len(grad.len())?;

        let pushes = self
            .clients
            .iter_mut()
            .map(|client| {
                let range = client.range();
                client.push(&grad[range])
            });

        let replies = try_join_all(pushes).await?;

        replies
            .first()
            .copied()
            .flatten()
            .ok_or(WorkerErr::UnexpectedMessage {
                step: 0,
                got: "control/ack",
            })
    }

    async fn disconnect(&mut self) -> Result<()> {
        try_join_all(self.clients.iter_mut().map(PsClient::disconnect)).await?;
        Ok(())
    }
}
