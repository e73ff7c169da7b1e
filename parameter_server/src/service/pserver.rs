use std::{
    io,
    num::NonZeroUsize,
    sync::{Arc, OnceLock},
};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
};
use log::{debug, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    task::JoinSet,
};

use crate::{
    GlobalStep,
    optimization::{Optimizer, OptimizerSpec},
    storage::{ParameterHandle, ParameterStore},
};

type DynOptimizer = Box<dyn Optimizer + Send>;

/// The state a parameter server holds once the chief initialized it.
struct Variables {
    handle: ParameterHandle<DynOptimizer>,
    step: GlobalStep,
}

/// Serves one contiguous range of the model's parameters to every worker.
///
/// Gradients are applied as soon as they arrive, workers never wait for each other.
/// Task 0 also hosts the global step and reports it after every applied gradient.
#[derive(Clone)]
pub struct ParameterServer {
    task_index: usize,
    shard_size: NonZeroUsize,
    optimizer: OptimizerSpec,
    vars: Arc<OnceLock<Variables>>,
}

impl ParameterServer {
    /// Creates a new, uninitialized `ParameterServer`.
    ///
    /// # Arguments
    /// * `task_index` - This server's index in the cluster's parameter server list.
    /// * `shard_size` - The maximum amount of parameters per store shard.
    /// * `optimizer` - The optimizer to build for every store shard.
    pub fn new(task_index: usize, shard_size: NonZeroUsize, optimizer: OptimizerSpec) -> Self {
        Self {
            task_index,
            shard_size,
            optimizer,
            vars: Arc::new(OnceLock::new()),
        }
    }

    /// Whether this server owns the global step.
    pub fn owns_step(&self) -> bool {
        self.task_index == 0
    }

    pub fn is_initialized(&self) -> bool {
        self.vars.get().is_some()
    }

    /// Returns the current global step, or `None` while uninitialized.
    pub fn step(&self) -> Option<u64> {
        self.vars.get().map(|vars| vars.step.get())
    }

    /// Initializes the server's parameters and step, only the first call has any effect.
    ///
    /// # Returns
    /// `true` if this call initialized the server.
    pub fn initialize(&self, step: u64, params: Vec<f32>) -> bool {
        let mut fresh = false;

        self.vars.get_or_init(|| {
            fresh = true;
            let optimizer = self.optimizer;
            let store = ParameterStore::new(params, self.shard_size, |len| optimizer.build(len));

            Variables {
                handle: ParameterHandle::new(store),
                step: GlobalStep::new(step),
            }
        });

        fresh
    }

    /// Accepts worker connections forever, each one served by its own task.
    ///
    /// # Arguments
    /// * `listener` - The bound listener for this server's address.
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("failed to accept a connection: {e}");
                            continue;
                        }
                    };

                    debug!(task_index = self.task_index; "accepted connection from {addr}");
                    stream.set_nodelay(true)?;

                    let (rx, tx) = stream.into_split();
                    let (rx, tx) = comms::channel(rx, tx);
                    let server = self.clone();
                    tasks.spawn(async move { server.handle_connection(rx, tx).await });
                }
                Some(joined) = tasks.join_next() => match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("dropped a worker connection: {e}"),
                    Err(e) => warn!("a connection task failed: {e}"),
                },
            }
        }
    }

    /// Serves requests from a single worker until it disconnects.
    ///
    /// # Arguments
    /// * `rx` - The receiving end of the communication.
    /// * `tx` - The sending end of the communication.
    pub async fn handle_connection<R, W>(
        &self,
        mut rx: OnoReceiver<R>,
        mut tx: OnoSender<W>,
    ) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut rx_buf: Vec<f32> = Vec::new();
        let mut init_buf: Vec<f32> = Vec::new();
        let mut params = Vec::new();

        loop {
            let msg = match rx.recv_into(&mut rx_buf).await {
                Ok(msg) => msg,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!(task_index = self.task_index; "worker closed the connection");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            match msg {
                Msg::Control(Command::Pull) => {
                    let Some(vars) = self.vars.get() else {
                        tx.send(&Msg::Control(Command::Uninitialized)).await?;
                        continue;
                    };

                    params.resize(vars.handle.len(), 0.);
                    vars.handle.pull_params(&mut params).await?;
                    tx.send(&Msg::Data(Payload::Params(&params))).await?;
                }
                Msg::Control(Command::Init { step }) => {
                    let msg = rx.recv_into(&mut init_buf).await?;
                    let Msg::Data(Payload::Params(init)) = msg else {
                        return Self::protocol_violation(&mut tx, msg).await;
                    };

                    if self.initialize(step, init.to_vec()) {
                        info!(task_index = self.task_index, step = step; "initialized {} parameters", init.len());
                    } else {
                        debug!(task_index = self.task_index; "already initialized, ignoring init");
                    }

                    tx.send(&Msg::Control(Command::Initialized)).await?;
                }
                Msg::Data(Payload::Gradient(grad)) => {
                    let Some(vars) = self.vars.get() else {
                        tx.send(&Msg::Control(Command::Uninitialized)).await?;
                        continue;
                    };

                    if let Err(e) = vars.handle.apply(grad).await {
                        tx.send(&Msg::Err(e.to_string().into())).await?;
                        return Err(e.into());
                    }

                    let reply = if self.owns_step() {
                        Command::Step(vars.step.increment())
                    } else {
                        Command::Ack
                    };

                    tx.send(&Msg::Control(reply)).await?;
                }
                Msg::Control(Command::Disconnect) => {
                    tx.send(&Msg::Control(Command::Disconnect)).await?;
                    return Ok(());
                }
                Msg::Err(e) => {
                    return Err(io::Error::other(format!("worker reported an error: {e}")));
                }
                msg => return Self::protocol_violation(&mut tx, msg).await,
            }
        }
    }

    /// Reports an unexpected message to the peer and fails the connection.
    ///
    /// # Arguments
    /// * `tx` - The sending end of the communication.
    /// * `msg` - The received message.
    async fn protocol_violation<W, T>(tx: &mut OnoSender<W>, msg: Msg<'_>) -> io::Result<T>
    where
        W: AsyncWrite + Unpin,
    {
        let text = format!("unexpected message kind: {}", msg.kind());
        tx.send(&Msg::Err(text.as_str().into())).await?;
        Err(io::Error::new(io::ErrorKind::InvalidData, text))
    }
}
