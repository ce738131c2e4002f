// Copyright (c) 2023 Lian Project Developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

mod common;

use std::time::Duration;

use tokio::io::AsyncWriteExt;

use lian::Client;

use common::*;

#[tokio::test]
async fn keepalive_timeout_closes_connection() {
    let (listener, addr) = bind().await;
    let (ping_tx, ping_rx) = tokio::sync::oneshot::channel();
    let broker = tokio::spawn(async move {
        let mut stream = accept_and_connack(&listener).await;
        // Swallow pings without ever answering.
        if let Ok(frame) = read_frame(&mut stream).await {
            let _ = ping_tx.send(frame);
        }
        loop {
            if read_frame(&mut stream).await.is_err() {
                break;
            }
        }
    });

    let mut options = test_options(&addr);
    options
        .set_keep_alive(Duration::from_secs(1))
        .set_keep_alive_factor(2.0);
    let client = Client::new(options);
    let (handler, mut events) = connect_probe();
    client.connect(handler).unwrap();
    assert_eq!(expect_event(&mut events).await.code, 0);
    wait_registered(&client, &addr).await;

    let ping = tokio::time::timeout(Duration::from_secs(3), ping_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&ping, &PING_REQUEST);

    // No PingResp within keepalive * factor tears the connection down.
    tokio::time::timeout(Duration::from_secs(4), client.wait())
        .await
        .expect("keepalive timeout did not close the connection");
    broker.abort();
}

#[tokio::test]
async fn keepalive_pong_keeps_connection_alive() {
    let (listener, addr) = bind().await;
    let broker = tokio::spawn(async move {
        let mut stream = accept_and_connack(&listener).await;
        // Answer every ping.
        loop {
            match read_frame(&mut stream).await {
                Ok(frame) if frame == PING_REQUEST => {
                    stream.write_all(&[0xd0, 0x00]).await.unwrap();
                }
                _ => break,
            }
        }
    });

    let mut options = test_options(&addr);
    options
        .set_keep_alive(Duration::from_millis(300))
        .set_keep_alive_factor(2.0);
    let client = Client::new(options);
    let (handler, mut events) = connect_probe();
    client.connect(handler).unwrap();
    assert_eq!(expect_event(&mut events).await.code, 0);
    wait_registered(&client, &addr).await;

    // Several keepalive periods pass without the connection dropping.
    let outcome = tokio::time::timeout(Duration::from_millis(1500), client.wait()).await;
    assert!(outcome.is_err(), "connection dropped despite pongs");
    assert!(client.connection_status(&addr).is_some());

    client.destroy(true).await;
    client.wait().await;
    broker.abort();
}

#[tokio::test]
async fn graceful_destroy_sends_disconnect() {
    let (listener, addr) = bind().await;
    let (frame_tx, frame_rx) = tokio::sync::oneshot::channel();
    let broker = tokio::spawn(async move {
        let mut stream = accept_and_connack(&listener).await;
        if let Ok(frame) = read_frame(&mut stream).await {
            let _ = frame_tx.send(frame);
        }
        let _ = read_frame(&mut stream).await;
    });

    let client = Client::new(test_options(&addr));
    let (handler, mut events) = connect_probe();
    client.connect(handler).unwrap();
    assert_eq!(expect_event(&mut events).await.code, 0);
    wait_registered(&client, &addr).await;

    client.destroy(false).await;

    let frame = tokio::time::timeout(Duration::from_secs(5), frame_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&frame, &DISCONNECT);

    tokio::time::timeout(Duration::from_secs(3), client.wait())
        .await
        .expect("graceful destroy did not drain the workers");
    broker.abort();
}

#[tokio::test]
async fn forced_destroy_drops_connection() {
    let (listener, addr) = bind().await;
    let broker = tokio::spawn(async move {
        let mut stream = accept_and_connack(&listener).await;
        // Runs until the socket dies under it.
        loop {
            if read_frame(&mut stream).await.is_err() {
                break;
            }
        }
    });

    let client = Client::new(test_options(&addr));
    let (handler, mut events) = connect_probe();
    client.connect(handler).unwrap();
    assert_eq!(expect_event(&mut events).await.code, 0);
    wait_registered(&client, &addr).await;

    client.destroy(true).await;
    tokio::time::timeout(Duration::from_secs(3), client.wait())
        .await
        .expect("forced destroy did not drain the workers");

    // The broker observes the closed socket.
    tokio::time::timeout(Duration::from_secs(3), broker)
        .await
        .expect("broker never saw the socket close")
        .unwrap();

    assert!(client.connection_status(&addr).is_none());
    // Destroy is idempotent.
    client.destroy(true).await;
}
