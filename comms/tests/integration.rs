use comms::msg::{Command, Msg, Payload};
use tokio::io;

#[tokio::test]
async fn send_recv_control_and_data() -> io::Result<()> {
    const SIZE: usize = 4096;

    let (one, two) = io::duplex(SIZE);
    let (one_rx, one_tx) = io::split(one);
    let (_, mut tx) = comms::channel(one_rx, one_tx);

    let (two_rx, two_tx) = io::split(two);
    let (mut rx, _) = comms::channel(two_rx, two_tx);

    let grad = [0.5f32, -1.0, 3.25, 8.0];
    tx.send(&Msg::Control(Command::Init { step: 7 })).await?;
    tx.send(&Msg::Data(Payload::Gradient(&grad))).await?;
    tx.send(&Msg::Err("boom".into())).await?;

    let mut buf: Vec<u32> = Vec::new();

    let msg: Msg = rx.recv_into(&mut buf).await?;
    assert_eq!(msg, Msg::Control(Command::Init { step: 7 }));

    let msg: Msg = rx.recv_into(&mut buf).await?;
    assert_eq!(msg, Msg::Data(Payload::Gradient(&grad)));

    let msg: Msg = rx.recv_into(&mut buf).await?;
    assert_eq!(msg.kind(), "err");

    Ok(())
}

#[tokio::test]
async fn receive_buffer_shrinks_and_grows() -> io::Result<()> {
    let (one, two) = io::duplex(1 << 16);
    let (one_rx, one_tx) = io::split(one);
    let (_, mut tx) = comms::channel(one_rx, one_tx);
    let (two_rx, two_tx) = io::split(two);
    let (mut rx, _) = comms::channel(two_rx, two_tx);

    let big = vec![1.0f32; 1000];
    tx.send(&Msg::Data(Payload::Params(&big))).await?;
    tx.send(&Msg::Control(Command::Step(3))).await?;
    tx.send(&Msg::Data(Payload::Params(&big[..2]))).await?;

    let mut buf: Vec<f32> = Vec::new();

    match rx.recv_into(&mut buf).await? {
        Msg::Data(Payload::Params(p)) => assert_eq!(p.len(), 1000),
        other => panic!("unexpected message: {other:?}"),
    }

    let msg: Msg = rx.recv_into(&mut buf).await?;
    assert_eq!(msg, Msg::Control(Command::Step(3)));

    match rx.recv_into(&mut buf).await? {
        Msg::Data(Payload::Params(p)) => assert_eq!(p, &[1.0, 1.0]),
        other => panic!("unexpected message: {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn closed_stream_is_an_error() {
    let (one, two) = io::duplex(64);
    drop(one);

    let (rx, tx) = io::split(two);
    let (mut rx, _) = comms::channel(rx, tx);

    let mut buf: Vec<u32> = Vec::new();
    let res: io::Result<Msg> = rx.recv_into(&mut buf).await;
    assert_eq!(res.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
}
