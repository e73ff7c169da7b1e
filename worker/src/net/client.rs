use std::ops::Range;

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
};
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{Result, error::WorkerErr};

/// Connection to a single parameter server, owner of the `range` slice of the parameters.
pub struct PsClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    server_id: usize,
    range: Range<usize>,
    rx: OnoReceiver<R>,
    tx: OnoSender<W>,
    rx_buf: Vec<f32>,
}

/// Turns a reply the protocol doesn't allow into an error.
fn reject(server_id: usize, step: u64, msg: &Msg<'_>) -> WorkerErr {
    match msg {
        Msg::Err(detail) => WorkerErr::Server {
            server_id,
            detail: detail.to_string(),
        },
        other => WorkerErr::UnexpectedMessage {
            step,
            got: other.kind(),
        },
    }
}

impl<R, W> PsClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a new `PsClient`.
    ///
    /// # Arguments
    /// * `server_id` - The server's index in the cluster, used for errors and logs.
    /// * `range` - The slice of the flat parameter vector the server owns.
    /// * `rx` - The receiving end of the communication.
    /// * `tx` - The sending end of the communication.
    pub fn new(server_id: usize, range: Range<usize>, rx: OnoReceiver<R>, tx: OnoSender<W>) -> Self {
        Self {
            server_id,
            range,
            rx,
            tx,
            rx_buf: Vec::new(),
        }
    }

    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// Requests the server's parameters and copies them into `dst`.
    ///
    /// # Returns
    /// `false` if the server is still uninitialized.
    pub async fn pull_into(&mut self, dst: &mut [f32]) -> Result<bool> {
        let Self {
            server_id,
            rx,
            tx,
            rx_buf,
            ..
        } = self;

        tx.send(&Msg::Control(Command::Pull)).await?;

        match rx.recv_into(rx_buf).await? {
            Msg::Data(Payload::Params(params)) => {
                if params.len() != dst.len() {
                    return Err(WorkerErr::ParamsLengthMismatch {
                        got: params.len(),
                        expected: dst.len(),
                    });
                }

                dst.copy_from_slice(params);
                Ok(true)
            }
            Msg::Control(Command::Uninitialized) => {
                debug!(server_id = *server_id; "server is uninitialized");
                Ok(false)
            }
            other => Err(reject(*server_id, 0, &other)),
        }
    }

    /// Sends the initial parameters and step to the server.
    pub async fn init(&mut self, step: u64, params: &[f32]) -> Result<()> {
        let Self {
            server_id,
            rx,
            tx,
            rx_buf,
            ..
        } = self;

        tx.send(&Msg::Control(Command::Init { step })).await?;
        tx.send(&Msg::Data(Payload::Params(params))).await?;

        match rx.recv_into(rx_buf).await? {
            Msg::Control(Command::Initialized) => Ok(()),
            other => Err(reject(*server_id, step, &other)),
        }
    }

    /// Pushes a gradient slice.
    ///
    /// # Returns
    /// The global step if this server owns it, `None` for a plain acknowledgement.
    pub async fn push(&mut self, grad: &[f32]) -> Result<Option<u64>> {
        let Self {
            server_id,
            rx,
            tx,
            rx_buf,
            ..
        } = self;

        tx.send(&Msg::Data(Payload::Gradient(grad))).await?;

        match rx.recv_into(rx_buf).await? {
            Msg::Control(Command::Step(step)) => Ok(Some(step)),
            Msg::Control(Command::Ack) => Ok(None),
            other => Err(reject(*server_id, 0, &other)),
        }
    }

    /// Ends the session, waiting for the server's confirmation.
    pub async fn disconnect(&mut self) -> Result<()> {
        let Self { rx, tx, rx_buf, .. } = self;
        tx.send(&Msg::Control(Command::Disconnect)).await?;

        loop {
            let msg: Msg = rx.recv_into(rx_buf).await?;
            match msg {
                Msg::Control(Command::Disconnect) => return Ok(()),
                other => debug!("discarding {} while disconnecting", other.kind()),
            }
        }
    }
}
