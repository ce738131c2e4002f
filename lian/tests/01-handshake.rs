// Copyright (c) 2023 Lian Project Developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

mod common;

use std::time::Duration;

use lian::{Client, ErrorKind};

use common::*;

#[tokio::test]
async fn connect_success_reports_zero() {
    let (listener, addr) = bind().await;
    let broker = tokio::spawn(async move {
        let mut stream = accept_and_connack(&listener).await;
        // Hold the socket open until the client drops it.
        let _ = read_frame(&mut stream).await;
    });

    let client = Client::new(test_options(&addr));
    let (handler, mut events) = connect_probe();
    client.connect(handler).unwrap();

    let event = expect_event(&mut events).await;
    assert_eq!(event.server, addr);
    assert_eq!(event.code, 0);
    assert!(event.error.is_none());

    client.destroy(true).await;
    client.wait().await;
    broker.abort();
}

#[tokio::test]
async fn connect_rejected_reports_return_code() {
    let (listener, addr) = bind().await;
    let broker = tokio::spawn(async move {
        let (mut stream, _addr) = listener.accept().await.unwrap();
        let connect = read_frame(&mut stream).await.unwrap();
        assert_eq!(connect[0], 0x10);
        // Not authorized.
        tokio::io::AsyncWriteExt::write_all(&mut stream, &[0x20, 0x02, 0x00, 0x05])
            .await
            .unwrap();
    });

    let client = Client::new(test_options(&addr));
    let (handler, mut events) = connect_probe();
    client.connect(handler).unwrap();

    let event = expect_event(&mut events).await;
    assert_eq!(event.code, 5);
    assert!(event.error.is_none());

    // The worker exited without ever registering a connection.
    tokio::time::timeout(Duration::from_secs(2), client.wait())
        .await
        .unwrap();
    assert!(client.connection_status(&addr).is_none());
    broker.await.unwrap();
}

#[tokio::test]
async fn dial_failure_reports_error() {
    let (listener, addr) = bind().await;
    drop(listener);

    let client = Client::new(test_options(&addr));
    let (handler, mut events) = connect_probe();
    client.connect(handler).unwrap();

    let event = expect_event(&mut events).await;
    assert_eq!(event.code, 0);
    assert!(event.error.is_some());
}

#[tokio::test]
async fn connack_timeout_reports_error() {
    let (listener, addr) = bind().await;
    let broker = tokio::spawn(async move {
        let (mut stream, _addr) = listener.accept().await.unwrap();
        let _connect = read_frame(&mut stream).await.unwrap();
        // Never reply.
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let mut options = test_options(&addr);
    options.set_connect_timeout(Duration::from_millis(300));
    let client = Client::new(options);
    let (handler, mut events) = connect_probe();
    client.connect(handler).unwrap();

    let event = expect_event(&mut events).await;
    assert_eq!(event.code, 0);
    let error = event.error.expect("expected a timeout error");
    assert_eq!(error.kind(), ErrorKind::TimeoutError);
    broker.abort();
}

#[tokio::test]
async fn unexpected_first_packet_reports_protocol_error() {
    let (listener, addr) = bind().await;
    let broker = tokio::spawn(async move {
        let (mut stream, _addr) = listener.accept().await.unwrap();
        let _connect = read_frame(&mut stream).await.unwrap();
        // A PingResp is not a valid handshake reply.
        tokio::io::AsyncWriteExt::write_all(&mut stream, &[0xd0, 0x00])
            .await
            .unwrap();
        let _ = read_frame(&mut stream).await;
    });

    let client = Client::new(test_options(&addr));
    let (handler, mut events) = connect_probe();
    client.connect(handler).unwrap();

    let event = expect_event(&mut events).await;
    assert_eq!(event.code, 0);
    let error = event.error.expect("expected a protocol error");
    assert_eq!(error.kind(), ErrorKind::ProtocolError);
    broker.abort();
}
