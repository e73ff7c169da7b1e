#![cfg(test)]

use std::num::NonZeroUsize;

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
};
use tokio::{
    io::{self, AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

use crate::{
    ParameterServer,
    optimization::{OptimizerKind, OptimizerSpec},
};

type Chan = (
    OnoReceiver<ReadHalf<DuplexStream>>,
    OnoSender<WriteHalf<DuplexStream>>,
);

fn sgd_server(task_index: usize) -> ParameterServer {
    let shard_size = NonZeroUsize::new(2).unwrap();
    let optimizer = OptimizerSpec::new(OptimizerKind::GradientDescent, 1.0);
    ParameterServer::new(task_index, shard_size, optimizer)
}

/// Connects a worker end to a spawned connection task of `server`.
fn connect(server: &ParameterServer) -> (Chan, JoinHandle<io::Result<()>>) {
    let (stream1, stream2) = io::duplex(4096);
    let (rx1, tx1) = io::split(stream1);
    let (rx2, tx2) = io::split(stream2);
    let worker = comms::channel(rx1, tx1);
    let (sv_rx, sv_tx) = comms::channel(rx2, tx2);

    let server = server.clone();
    let task = tokio::spawn(async move { server.handle_connection(sv_rx, sv_tx).await });
    (worker, task)
}

async fn request<R, W>(
    rx: &mut OnoReceiver<R>,
    tx: &mut OnoSender<W>,
    msg: &Msg<'_>,
) -> io::Result<Command>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf: Vec<u32> = Vec::new();
    tx.send(msg).await?;

    match rx.recv_into(&mut buf).await? {
        Msg::Control(cmd) => Ok(cmd),
        other => panic!("expected a control message, got {other:?}"),
    }
}

async fn pull<R, W>(rx: &mut OnoReceiver<R>, tx: &mut OnoSender<W>) -> io::Result<Option<Vec<f32>>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf: Vec<f32> = Vec::new();
    tx.send(&Msg::Control(Command::Pull)).await?;

    match rx.recv_into(&mut buf).await? {
        Msg::Data(Payload::Params(params)) => Ok(Some(params.to_vec())),
        Msg::Control(Command::Uninitialized) => Ok(None),
        other => panic!("unexpected reply {other:?}"),
    }
}

async fn init<R, W>(
    rx: &mut OnoReceiver<R>,
    tx: &mut OnoSender<W>,
    step: u64,
    params: &[f32],
) -> io::Result<Command>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tx.send(&Msg::Control(Command::Init { step })).await?;
    request(rx, tx, &Msg::Data(Payload::Params(params))).await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_pull_before_init_reports_uninitialized() -> io::Result<()> {
    let server = sgd_server(0);
    let ((mut rx, mut tx), task) = connect(&server);

    assert_eq!(pull(&mut rx, &mut tx).await?, None);

    let grad = [1.0; 3];
    let reply = request(&mut rx, &mut tx, &Msg::Data(Payload::Gradient(&grad))).await?;
    assert_eq!(reply, Command::Uninitialized);

    let reply = request(&mut rx, &mut tx, &Msg::Control(Command::Disconnect)).await?;
    assert_eq!(reply, Command::Disconnect);
    task.await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_init_is_ignored() -> io::Result<()> {
    let server = sgd_server(0);
    let ((mut rx, mut tx), task) = connect(&server);

    assert_eq!(init(&mut rx, &mut tx, 7, &[1., 2., 3.]).await?, Command::Initialized);
    assert_eq!(init(&mut rx, &mut tx, 0, &[9., 9.]).await?, Command::Initialized);

    assert_eq!(pull(&mut rx, &mut tx).await?, Some(vec![1., 2., 3.]));
    assert_eq!(server.step(), Some(7));

    drop((rx, tx));
    task.await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_gradient_is_applied_and_step_counted() -> io::Result<()> {
    let server = sgd_server(0);
    let ((mut rx, mut tx), task) = connect(&server);

    init(&mut rx, &mut tx, 10, &[1., 1., 1.]).await?;

    let grad = [0.5, -1., 0.];
    let reply = request(&mut rx, &mut tx, &Msg::Data(Payload::Gradient(&grad))).await?;
    assert_eq!(reply, Command::Step(11));

    assert_eq!(pull(&mut rx, &mut tx).await?, Some(vec![0.5, 2., 1.]));

    drop((rx, tx));
    task.await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_other_tasks_acknowledge() -> io::Result<()> {
    let server = sgd_server(1);
    let ((mut rx, mut tx), task) = connect(&server);

    init(&mut rx, &mut tx, 3, &[0.; 4]).await?;

    let grad = [1.; 4];
    let reply = request(&mut rx, &mut tx, &Msg::Data(Payload::Gradient(&grad))).await?;
    assert_eq!(reply, Command::Ack);
    assert_eq!(server.step(), Some(3));

    drop((rx, tx));
    task.await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_workers_count_every_gradient() -> io::Result<()> {
    const WORKERS: usize = 4;
    const PUSHES: u64 = 25;

    let server = sgd_server(0);
    server.initialize(0, vec![0.; 5]);

    let mut handles = Vec::new();
    for _ in 0..WORKERS {
        let ((mut rx, mut tx), task) = connect(&server);

        handles.push(tokio::spawn(async move {
            let grad = [0.01; 5];
            let mut last = 0;

            for _ in 0..PUSHES {
                let Command::Step(step) =
                    request(&mut rx, &mut tx, &Msg::Data(Payload::Gradient(&grad))).await?
                else {
                    panic!("expected a step");
                };
                assert!(step > last);
                last = step;
            }

            request(&mut rx, &mut tx, &Msg::Control(Command::Disconnect)).await?;
            task.await.unwrap()
        }));
    }

    for handle in handles {
        handle.await.unwrap()?;
    }

    assert_eq!(server.step(), Some(WORKERS as u64 * PUSHES));

    let ((mut rx, mut tx), task) = connect(&server);
    let params = pull(&mut rx, &mut tx).await?.unwrap();
    let expected = -0.01 * (WORKERS as u64 * PUSHES) as f32;
    assert!(params.iter().all(|p| (p - expected).abs() < 1e-4));

    drop((rx, tx));
    task.await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wrong_gradient_size_drops_connection() -> io::Result<()> {
    let server = sgd_server(0);
    let ((mut rx, mut tx), task) = connect(&server);

    init(&mut rx, &mut tx, 0, &[0.; 3]).await?;

    let grad = [1.; 2];
    tx.send(&Msg::Data(Payload::Gradient(&grad))).await?;

    let mut buf: Vec<u32> = Vec::new();
    let msg: Msg = rx.recv_into(&mut buf).await?;
    assert!(matches!(msg, Msg::Err(_)));

    let err = task.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    assert_eq!(server.step(), Some(0));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unexpected_message_is_a_protocol_violation() -> io::Result<()> {
    let server = sgd_server(0);
    let ((mut rx, mut tx), task) = connect(&server);

    tx.send(&Msg::Control(Command::Ack)).await?;

    let mut buf: Vec<u32> = Vec::new();
    let msg: Msg = rx.recv_into(&mut buf).await?;
    assert!(matches!(msg, Msg::Err(_)));
    assert!(task.await.unwrap().is_err());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_serve_over_tcp() -> io::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = sgd_server(0);
    let serving = server.clone();
    let serve = tokio::spawn(async move { serving.serve(listener).await });

    for expected in 1..=2 {
        let stream = TcpStream::connect(addr).await?;
        let (rx, tx) = stream.into_split();
        let (mut rx, mut tx) = comms::channel(rx, tx);

        init(&mut rx, &mut tx, 0, &[2., 2.]).await?;

        let grad = [1., 1.];
        let reply = request(&mut rx, &mut tx, &Msg::Data(Payload::Gradient(&grad))).await?;
        assert_eq!(reply, Command::Step(expected));
    }

    assert_eq!(server.step(), Some(2));
    serve.abort();
    Ok(())
}
