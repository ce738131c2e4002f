// Copyright (c) 2023 Lian Project Developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use lian::{Client, ConnectHandler, ConnectOptions, Error};

pub const CONNACK_ACCEPTED: [u8; 4] = [0x20, 0x02, 0x00, 0x00];
pub const PING_REQUEST: [u8; 2] = [0xc0, 0x00];
pub const DISCONNECT: [u8; 2] = [0xe0, 0x00];

/// Read one complete MQTT frame (fixed header plus body) off the socket.
pub async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut first = [0_u8; 1];
    stream.read_exact(&mut first).await?;
    let mut frame = vec![first[0]];

    let mut remaining: usize = 0;
    let mut multiplier: usize = 1;
    loop {
        let mut byte = [0_u8; 1];
        stream.read_exact(&mut byte).await?;
        frame.push(byte[0]);
        remaining += usize::from(byte[0] & 127) * multiplier;
        multiplier *= 128;
        if byte[0] & 128 == 0 {
            break;
        }
    }

    let mut body = vec![0_u8; remaining];
    stream.read_exact(&mut body).await?;
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub struct ConnectEvent {
    pub server: String,
    pub code: u8,
    pub error: Option<Error>,
}

/// Connect handler forwarding every report into a channel.
pub fn connect_probe() -> (ConnectHandler, mpsc::UnboundedReceiver<ConnectEvent>) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let handler: ConnectHandler = Arc::new(move |server, code, error| {
        let _ = event_tx.send(ConnectEvent {
            server: server.to_string(),
            code,
            error,
        });
    });
    (handler, event_rx)
}

pub async fn expect_event(event_rx: &mut mpsc::UnboundedReceiver<ConnectEvent>) -> ConnectEvent {
    tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
        .await
        .expect("timed out waiting for connect event")
        .expect("connect handler dropped")
}

/// Options for a single test server, with keepalive disabled so ping traffic
/// does not interleave with the frames under test.
pub fn test_options(addr: &str) -> ConnectOptions {
    let mut options = ConnectOptions::new([addr]);
    options
        .set_client_id("lianTest")
        .set_keep_alive(Duration::ZERO)
        .set_connect_timeout(Duration::from_secs(5));
    options
}

pub async fn bind() -> (TcpListener, String) {
    let _ = env_logger::builder().is_test(true).try_init();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

/// Accept one client, check its Connect packet and accept the session.
pub async fn accept_and_connack(listener: &TcpListener) -> TcpStream {
    let (mut stream, _addr) = listener.accept().await.unwrap();
    let connect = read_frame(&mut stream).await.unwrap();
    assert_eq!(connect[0], 0x10, "first packet must be Connect");
    stream.write_all(&CONNACK_ACCEPTED).await.unwrap();
    stream
}

/// Block until the connection shows up in the client's map.
pub async fn wait_registered(client: &Client, addr: &str) {
    for _ in 0..500 {
        if client.connection_status(addr).is_some() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("connection to {addr} was never registered");
}
