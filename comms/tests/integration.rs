use std::io as std_io;

use comms::{Command, Parameters, Tensor, codec};
use ndarray::arr2;
use rand::Rng;
use tokio::io::{self, AsyncWriteExt};

#[tokio::test]
async fn frames_survive_small_transport_buffers() {
    for (buf_size, len) in [(1, 300), (7, 5000), (64, 4097), (4096, 9000), (128, 0)] {
        let payload: Vec<u8> = (0..len).map(|_| rand::rng().random()).collect();

        let (one, two) = io::duplex(buf_size);
        let (_, tx) = io::split(one);
        let (rx, _) = io::split(two);
        let (_, mut sender) = comms::channel(io::empty(), tx);
        let (mut receiver, _) = comms::channel(rx, io::sink());

        let send = sender.send_frame(&payload);
        let recv = receiver.recv_frame();
        let (sent, received) = tokio::join!(send, recv);

        sent.unwrap();
        assert_eq!(received.unwrap(), payload, "buf_size={buf_size} len={len}");
    }
}

#[tokio::test]
async fn frame_header_is_big_endian() {
    let (one, mut two) = io::duplex(64);
    let (_, tx) = io::split(one);
    let (_, mut sender) = comms::channel(io::empty(), tx);

    sender.send_frame(b"abc").await.unwrap();

    let mut raw = [0u8; 7];
    tokio::io::AsyncReadExt::read_exact(&mut two, &mut raw)
        .await
        .unwrap();
    assert_eq!(&raw, &[0, 0, 0, 3, b'a', b'b', b'c']);
}

#[tokio::test]
async fn closed_peer_is_fatal() {
    let (mut one, two) = io::duplex(64);
    let (rx, _) = io::split(two);
    let (mut receiver, _) = comms::channel(rx, io::sink());

    one.write_all(&10u32.to_be_bytes()).await.unwrap();
    one.write_all(b"abc").await.unwrap();
    drop(one);

    let err = receiver.recv_frame().await.unwrap_err();
    assert_eq!(err.kind(), std_io::ErrorKind::UnexpectedEof);
}

#[tokio::test]
async fn unknown_commands_are_protocol_errors() {
    let (one, two) = io::duplex(64);
    let (_, tx) = io::split(one);
    let (rx, _) = io::split(two);
    let (_, mut sender) = comms::channel(io::empty(), tx);
    let (mut receiver, _) = comms::channel(rx, io::sink());

    sender.send_frame(b"boom").await.unwrap();
    let err = receiver.recv_command().await.unwrap_err();
    assert_eq!(err.kind(), std_io::ErrorKind::InvalidData);

    sender.send_command(Command::Step).await.unwrap();
    let err = receiver.expect_command(Command::Compute).await.unwrap_err();
    assert_eq!(err.kind(), std_io::ErrorKind::InvalidData);
}

#[tokio::test]
async fn labelled_data_streams_end_with_done() {
    let (one, two) = io::duplex(256);
    let (_, tx) = io::split(one);
    let (rx, _) = io::split(two);
    let (_, mut sender) = comms::channel(io::empty(), tx);
    let (mut receiver, _) = comms::channel(rx, io::sink());

    let input: Tensor = arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn();
    let output: Tensor = arr2(&[[5.0]]).into_dyn();

    let send = async {
        sender.send_labelled_tensor("input", &input).await?;
        sender.send_labelled_tensor("output", &output).await?;
        sender.send_command(Command::Done).await?;
        sender.send_command(Command::Exit).await
    };

    let recv = async {
        let fields = receiver.recv_fields().await?;
        let cmd = receiver.recv_command().await?;
        Ok::<_, std_io::Error>((fields, cmd))
    };

    let (sent, received) = tokio::join!(send, recv);
    sent.unwrap();
    let (fields, cmd) = received.unwrap();

    assert_eq!(fields.len(), 2);
    assert_eq!(
        fields["input"].iter().copied().collect::<Vec<_>>(),
        vec![1.0, 2.0, 3.0, 4.0]
    );
    assert_eq!(fields["output"].len(), 1);
    assert_eq!(cmd, Command::Exit);
}

#[tokio::test]
async fn empty_labelled_data_is_a_lone_done() {
    let (one, two) = io::duplex(64);
    let (_, tx) = io::split(one);
    let (rx, _) = io::split(two);
    let (_, mut sender) = comms::channel(io::empty(), tx);
    let (mut receiver, _) = comms::channel(rx, io::sink());

    sender.send_fields(std::iter::empty()).await.unwrap();
    assert!(receiver.recv_labelled_data().await.unwrap().is_empty());
}

#[tokio::test]
async fn parameters_travel_as_json() {
    let (one, two) = io::duplex(256);
    let (_, tx) = io::split(one);
    let (rx, _) = io::split(two);
    let (_, mut sender) = comms::channel(io::empty(), tx);
    let (mut receiver, _) = comms::channel(rx, io::sink());

    let mut params = Parameters::new();
    params.insert("stiffness".into(), serde_json::json!(12.5));
    params.insert("scene".into(), serde_json::json!({"name": "beam", "nodes": [1, 2]}));

    let (sent, received) = tokio::join!(sender.send_parameters(&params), receiver.recv_parameters());
    sent.unwrap();
    assert_eq!(received.unwrap(), params);
}

#[tokio::test]
async fn tensors_round_trip_through_frames() {
    let (one, two) = io::duplex(32);
    let (_, tx) = io::split(one);
    let (rx, _) = io::split(two);
    let (_, mut sender) = comms::channel(io::empty(), tx);
    let (mut receiver, _) = comms::channel(rx, io::sink());

    let values: Vec<f64> = (0..600).map(|_| rand::rng().random_range(-1e6..1e6)).collect();
    let tensor = codec::from_flat(values, &[20, 30]).unwrap();

    let (sent, received) = tokio::join!(sender.send_tensor(&tensor), receiver.recv_tensor(&[20, 30]));
    sent.unwrap();
    assert_eq!(received.unwrap(), tensor);
}
