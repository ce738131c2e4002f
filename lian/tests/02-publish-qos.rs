// Copyright (c) 2023 Lian Project Developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use lian::{AckHandler, Client, PacketId, PublishMessage, QoS};

use common::*;

fn ack_probe() -> (AckHandler, mpsc::UnboundedReceiver<PacketId>) {
    let (ack_tx, ack_rx) = mpsc::unbounded_channel();
    let handler: AckHandler = Arc::new(move |packet_id| {
        let _ = ack_tx.send(packet_id);
    });
    (handler, ack_rx)
}

async fn expect_ack(ack_rx: &mut mpsc::UnboundedReceiver<PacketId>) -> PacketId {
    tokio::time::timeout(Duration::from_secs(5), ack_rx.recv())
        .await
        .expect("timed out waiting for ack")
        .expect("ack handler dropped")
}

#[tokio::test]
async fn qos0_publish_wire_bytes() {
    let (listener, addr) = bind().await;
    let (frame_tx, frame_rx) = tokio::sync::oneshot::channel();
    let broker = tokio::spawn(async move {
        let mut stream = accept_and_connack(&listener).await;
        let frame = read_frame(&mut stream).await.unwrap();
        let _ = frame_tx.send(frame);
        let _ = read_frame(&mut stream).await;
    });

    let client = Client::new(test_options(&addr));
    let (handler, mut events) = connect_probe();
    client.connect(handler).unwrap();
    assert_eq!(expect_event(&mut events).await.code, 0);

    client
        .publish(
            None,
            vec![PublishMessage::new("a/b", QoS::AtMostOnce, &[0x01])],
        )
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), frame_rx)
        .await
        .unwrap()
        .unwrap();
    // A QoS 0 publish carries no packet id bytes.
    assert_eq!(&frame, &[0x30, 0x06, 0x00, 0x03, b'a', b'/', b'b', 0x01]);

    client.destroy(true).await;
    client.wait().await;
    broker.abort();
}

#[tokio::test]
async fn qos1_roundtrip_completes_flow() {
    let (listener, addr) = bind().await;
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
    let broker = tokio::spawn(async move {
        let mut stream = accept_and_connack(&listener).await;

        let first = read_frame(&mut stream).await.unwrap();
        let _ = frame_tx.send(first);
        // PubAck for id 1.
        stream.write_all(&[0x40, 0x02, 0x00, 0x01]).await.unwrap();

        let second = read_frame(&mut stream).await.unwrap();
        let _ = frame_tx.send(second);
        stream.write_all(&[0x40, 0x02, 0x00, 0x02]).await.unwrap();

        let _ = read_frame(&mut stream).await;
    });

    let client = Client::new(test_options(&addr));
    let (handler, mut events) = connect_probe();
    client.connect(handler).unwrap();
    assert_eq!(expect_event(&mut events).await.code, 0);

    let (ack_handler, mut acks) = ack_probe();
    client
        .publish(
            Some(ack_handler.clone()),
            vec![PublishMessage::new("t", QoS::AtLeastOnce, &[])],
        )
        .await
        .unwrap();

    let first = frame_rx.recv().await.unwrap();
    assert_eq!(&first, &[0x32, 0x05, 0x00, 0x01, b't', 0x00, 0x01]);
    assert_eq!(expect_ack(&mut acks).await, PacketId::new(1));

    // Id 1 went back to the pool; allocation continues above it.
    client
        .publish(
            Some(ack_handler),
            vec![PublishMessage::new("t", QoS::AtLeastOnce, &[])],
        )
        .await
        .unwrap();
    let second = frame_rx.recv().await.unwrap();
    assert_eq!(&second, &[0x32, 0x05, 0x00, 0x01, b't', 0x00, 0x02]);
    assert_eq!(expect_ack(&mut acks).await, PacketId::new(2));

    client.destroy(true).await;
    client.wait().await;
    broker.abort();
}

#[tokio::test]
async fn qos2_roundtrip_completes_flow() {
    let (listener, addr) = bind().await;
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
    let broker = tokio::spawn(async move {
        let mut stream = accept_and_connack(&listener).await;

        let publish = read_frame(&mut stream).await.unwrap();
        let _ = frame_tx.send(publish);
        // PubRec for id 1 opens the second half of the exchange.
        stream.write_all(&[0x50, 0x02, 0x00, 0x01]).await.unwrap();

        let release = read_frame(&mut stream).await.unwrap();
        let _ = frame_tx.send(release);
        stream.write_all(&[0x70, 0x02, 0x00, 0x01]).await.unwrap();

        let _ = read_frame(&mut stream).await;
    });

    let client = Client::new(test_options(&addr));
    let (handler, mut events) = connect_probe();
    client.connect(handler).unwrap();
    assert_eq!(expect_event(&mut events).await.code, 0);

    let (ack_handler, mut acks) = ack_probe();
    client
        .publish(
            Some(ack_handler),
            vec![PublishMessage::new("q", QoS::ExactOnce, &[])],
        )
        .await
        .unwrap();

    let publish = frame_rx.recv().await.unwrap();
    assert_eq!(&publish, &[0x34, 0x05, 0x00, 0x01, b'q', 0x00, 0x01]);

    let release = frame_rx.recv().await.unwrap();
    assert_eq!(&release, &[0x62, 0x02, 0x00, 0x01]);

    // PubComp frees the id and completes the flow.
    assert_eq!(expect_ack(&mut acks).await, PacketId::new(1));

    client.destroy(true).await;
    client.wait().await;
    broker.abort();
}
