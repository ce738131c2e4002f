// Copyright (c) 2023 Lian Project Developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::time::{interval, sleep, timeout, Duration};

use codec::v3::{
    ConnectAckPacket, ConnectPacket, ConnectReturnCode, ControlPacket, DisconnectPacket,
    PingRequestPacket, PublishAckPacket, PublishCompletePacket, PublishReceivedPacket,
    PublishReleasePacket,
};
use codec::{ByteArray, ConnectFlags, DecodeError, DecodePacket, EncodePacket, FixedHeader, PacketId, QoS};

use crate::client::{ClientShared, ConnectHandler};
use crate::connect_options::ConnectOptions;
use crate::error::{Error, ErrorKind};
use crate::stream::Stream;

/// Lifecycle of one server connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Dialing,
    AwaitingConnectAck,
    Established,
    Closing,
    Closed,
}

/// Control surface of one running connection, owned by the client map.
///
/// The worker tasks themselves only hold channels, so dropping the handle
/// never tears the connection down implicitly; `close` does.
pub(crate) struct ConnectionHandle {
    server: String,
    status: Mutex<ConnectionStatus>,
    packet_tx: mpsc::Sender<ControlPacket>,
    shutdown: Arc<watch::Sender<bool>>,
    done_rx: AsyncMutex<mpsc::Receiver<()>>,
}

impl ConnectionHandle {
    pub(crate) fn server(&self) -> &str {
        &self.server
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Stop this connection.
    ///
    /// A graceful close enqueues a Disconnect packet and lets the send pump
    /// drain and exit on it. A forced close raises the shutdown flag so every
    /// pump exits right away and the socket drops.
    pub(crate) async fn close(&self, force: bool) {
        self.set_status(ConnectionStatus::Closing);
        if force {
            let _ = self.shutdown.send(true);
        } else if self
            .packet_tx
            .send(ControlPacket::Disconnect(DisconnectPacket::new()))
            .await
            .is_err()
        {
            // Send pump is already gone, fall back to the hard path.
            let _ = self.shutdown.send(true);
        }
    }

    /// Block until every worker task of this connection has finished.
    pub(crate) async fn wait(&self) {
        let mut done_rx = self.done_rx.lock().await;
        // Returns `None` once the last pump dropped its sender.
        let _ = done_rx.recv().await;
    }
}

/// Dial one server, run the handshake and supervise the steady-state pumps.
///
/// `handler` is invoked exactly once: with the MQTT return code when the
/// broker rejected the session, with an error on transport/timeout failure,
/// or with `(server, 0, None)` on success.
pub(crate) async fn run_connection(
    shared: Arc<ClientShared>,
    server: String,
    handler: ConnectHandler,
) {
    let options = &shared.options;
    log::info!("Connecting to {server}");

    let connect_timeout = options.connect_timeout();
    let mut stream = match timeout(connect_timeout, Stream::connect(&server, options.tls())).await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            log::warn!("Failed to dial {server}: {err}");
            handler(&server, 0, Some(err));
            return;
        }
        Err(elapsed) => {
            log::warn!("Timed out dialing {server}");
            handler(&server, 0, Some(elapsed.into()));
            return;
        }
    };

    // Transmit the Connect packet and wait for the first inbound packet,
    // bounded by the same timeout as the dial step.
    let mut read_buf = Vec::with_capacity(1024);
    let conn_ack =
        match handshake(&mut stream, &mut read_buf, options, connect_timeout).await {
            Ok(conn_ack) => conn_ack,
            Err(err) => {
                log::warn!("Handshake with {server} failed: {err}");
                handler(&server, 0, Some(err));
                return;
            }
        };

    match conn_ack.return_code() {
        ConnectReturnCode::Accepted => {
            if conn_ack.session_present() {
                log::info!("{server} resumed a stored session");
            }
        }
        code => {
            log::warn!("{server} rejected connect: {code:?}");
            handler(&server, code as u8, None);
            return;
        }
    }
    handler(&server, 0, None);

    // Steady state. One channel per concern, all bounded.
    let (packet_tx, packet_rx) = mpsc::channel(options.send_channel_capacity());
    let (keepalive_tx, keepalive_rx) = mpsc::channel::<()>(1);
    let (done_tx, done_rx) = mpsc::channel::<()>(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown = Arc::new(shutdown_tx);
    // Receivers must exist before the handle is published: a clone made
    // after a send marks the current value as already seen.
    let send_shutdown_rx = shutdown_rx.clone();
    let recv_shutdown_rx = shutdown_rx.clone();
    let keepalive_shutdown_rx = shutdown_rx;

    let handle = Arc::new(ConnectionHandle {
        server: server.clone(),
        status: Mutex::new(ConnectionStatus::Established),
        packet_tx: packet_tx.clone(),
        shutdown: shutdown.clone(),
        done_rx: AsyncMutex::new(done_rx),
    });
    let registered = shared.register_connection(handle.clone());

    let inflight = Arc::new(Mutex::new(HashSet::new()));
    let (reader, writer) = tokio::io::split(stream);

    let mut tasks = Vec::with_capacity(3);
    tasks.push(tokio::spawn(send_pump(
        writer,
        packet_rx,
        shared.outbound_rx.clone(),
        shutdown.clone(),
        send_shutdown_rx,
        inflight.clone(),
        done_tx.clone(),
    )));
    tasks.push(tokio::spawn(recv_pump(
        reader,
        read_buf,
        shared.clone(),
        packet_tx.clone(),
        keepalive_tx,
        shutdown.clone(),
        recv_shutdown_rx,
        inflight.clone(),
        done_tx.clone(),
    )));
    if options.keep_alive() > Duration::ZERO {
        tasks.push(tokio::spawn(keepalive_pump(
            packet_tx,
            keepalive_rx,
            options.keep_alive(),
            options.keep_alive_factor(),
            shutdown.clone(),
            keepalive_shutdown_rx,
            done_tx.clone(),
        )));
    }
    drop(done_tx);

    if !registered {
        // Client was destroyed between handshake and registration.
        let _ = shutdown.send(true);
    }

    for task in tasks {
        let _ = task.await;
    }

    // Mass-release packet ids whose acknowledgements will never arrive.
    let leaked: Vec<PacketId> = {
        let mut inflight = inflight.lock().unwrap_or_else(PoisonError::into_inner);
        inflight.drain().collect()
    };
    for packet_id in leaked {
        shared.abandon_flow(packet_id);
    }

    shared.deregister_connection(&server);
    handle.set_status(ConnectionStatus::Closed);
    log::info!("Connection to {server} closed");
}

/// Build the Connect packet, write it and await a valid ConnAck.
async fn handshake(
    stream: &mut Stream,
    read_buf: &mut Vec<u8>,
    options: &ConnectOptions,
    connect_timeout: Duration,
) -> Result<ConnectAckPacket, Error> {
    let connect_packet = build_connect_packet(options)?;
    let mut buf = Vec::with_capacity(128);
    connect_packet.encode(&mut buf)?;
    stream.write_all(&buf).await?;

    let frame = match timeout(connect_timeout, read_packet(stream, read_buf)).await? {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            return Err(Error::new(
                ErrorKind::SocketError,
                "Connection closed during handshake",
            ))
        }
        Err(err) => return Err(err),
    };

    let mut ba = ByteArray::new(&frame);
    ConnectAckPacket::decode(&mut ba).map_err(|err| {
        Error::from_string(
            ErrorKind::ProtocolError,
            format!("Expected ConnectAck as first packet: {err:?}"),
        )
    })
}

fn build_connect_packet(options: &ConnectOptions) -> Result<ConnectPacket, Error> {
    let mut packet = ConnectPacket::new(options.client_id())?;
    let keep_alive = u16::try_from(options.keep_alive().as_secs()).unwrap_or(u16::MAX);
    packet.set_keep_alive(keep_alive);

    let mut flags = ConnectFlags::default();
    flags.set_clean_session(options.clean_session());
    if let Some(will) = options.last_will() {
        flags
            .set_will(true)
            .set_will_qos(will.qos)
            .set_will_retain(will.retain);
    }
    if let Some(_auth) = options.auth() {
        flags.set_has_username(true).set_has_password(true);
    }
    packet.set_connect_flags(flags);

    if let Some(will) = options.last_will() {
        packet.set_will_topic(&will.topic)?;
        packet.set_will_message(&will.message)?;
    }
    if let Some(auth) = options.auth() {
        packet.set_username(&auth.username)?;
        packet.set_password(auth.password.as_bytes())?;
    }
    Ok(packet)
}

/// Read one complete control packet frame off `reader`.
///
/// Partial reads accumulate in `buf` across calls; surplus bytes of a
/// previous read stay buffered for the next frame. Returns `Ok(None)` on a
/// clean end of stream at a frame boundary.
async fn read_packet<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<Option<Vec<u8>>, Error>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(frame_len) = frame_length(buf)? {
            if buf.len() >= frame_len {
                let frame: Vec<u8> = buf.drain(..frame_len).collect();
                return Ok(Some(frame));
            }
        }
        let n_recv = reader.read_buf(buf).await?;
        if n_recv == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(Error::new(
                ErrorKind::SocketError,
                "Connection closed inside a packet",
            ));
        }
    }
}

/// Total frame length, once enough of the fixed header is buffered.
fn frame_length(buf: &[u8]) -> Result<Option<usize>, Error> {
    if buf.is_empty() {
        return Ok(None);
    }
    let mut ba = ByteArray::new(buf);
    match FixedHeader::decode(&mut ba) {
        Ok(fixed_header) => Ok(Some(fixed_header.bytes() + fixed_header.remaining_length())),
        // The remaining-length field is not complete yet.
        Err(DecodeError::OutOfRange) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Drain the per-connection channel and the shared outbound queue onto the
/// transport. Packets are encoded into a scratch buffer and written in one
/// piece, in dequeue order.
async fn send_pump(
    mut writer: WriteHalf<Stream>,
    mut packet_rx: mpsc::Receiver<ControlPacket>,
    outbound_rx: Arc<AsyncMutex<mpsc::Receiver<ControlPacket>>>,
    shutdown: Arc<watch::Sender<bool>>,
    mut shutdown_rx: watch::Receiver<bool>,
    inflight: Arc<Mutex<HashSet<PacketId>>>,
    _done_tx: mpsc::Sender<()>,
) {
    let mut buf = Vec::with_capacity(4096);
    loop {
        tokio::select! {
            // Acknowledgements and pings go out before queued application traffic.
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            packet = packet_rx.recv() => {
                let Some(packet) = packet else { break };
                let is_disconnect = matches!(packet, ControlPacket::Disconnect(_));
                if let Err(err) = write_packet(&mut writer, &mut buf, &packet).await {
                    log::error!("Failed to write packet: {err}");
                    break;
                }
                if is_disconnect {
                    break;
                }
            }
            packet = next_outbound(&outbound_rx) => {
                // `None` means the client itself was destroyed.
                let Some(packet) = packet else { break };
                track_inflight(&inflight, &packet);
                if let Err(err) = write_packet(&mut writer, &mut buf, &packet).await {
                    log::error!("Failed to write packet: {err}");
                    break;
                }
            }
        }
    }
    // Cascade so the receive pump and keepalive exit as well.
    let _ = shutdown.send(true);
}

/// Take the shared queue lock and wait for one packet.
///
/// Whichever worker holds the lock first dequeues the packet; cancellation
/// of this future releases the lock without consuming anything.
async fn next_outbound(
    outbound_rx: &AsyncMutex<mpsc::Receiver<ControlPacket>>,
) -> Option<ControlPacket> {
    let mut rx = outbound_rx.lock().await;
    rx.recv().await
}

async fn write_packet(
    writer: &mut WriteHalf<Stream>,
    buf: &mut Vec<u8>,
    packet: &ControlPacket,
) -> Result<(), Error> {
    buf.clear();
    packet.encode(buf)?;
    writer.write_all(buf).await?;
    Ok(())
}

/// Remember ids of outbound flows so teardown can mass-release them.
fn track_inflight(inflight: &Mutex<HashSet<PacketId>>, packet: &ControlPacket) {
    let packet_id = match packet {
        ControlPacket::Publish(publish) if publish.qos() != QoS::AtMostOnce => {
            Some(publish.packet_id())
        }
        ControlPacket::Subscribe(subscribe) => Some(subscribe.packet_id()),
        ControlPacket::Unsubscribe(unsubscribe) => Some(unsubscribe.packet_id()),
        _ => None,
    };
    if let Some(packet_id) = packet_id {
        inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(packet_id);
    }
}

/// Frame and dispatch inbound packets until end of stream, decode error or
/// shutdown. Exiting closes the keepalive channel and raises shutdown.
#[allow(clippy::too_many_arguments)]
async fn recv_pump(
    mut reader: ReadHalf<Stream>,
    mut buf: Vec<u8>,
    shared: Arc<ClientShared>,
    packet_tx: mpsc::Sender<ControlPacket>,
    keepalive_tx: mpsc::Sender<()>,
    shutdown: Arc<watch::Sender<bool>>,
    mut shutdown_rx: watch::Receiver<bool>,
    inflight: Arc<Mutex<HashSet<PacketId>>>,
    _done_tx: mpsc::Sender<()>,
) {
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            frame = read_packet(&mut reader, &mut buf) => {
                match frame {
                    Ok(Some(frame)) => {
                        if let Err(err) =
                            handle_packet(&shared, &packet_tx, &keepalive_tx, &inflight, &frame).await
                        {
                            log::error!("Failed to handle inbound packet: {err}");
                            break;
                        }
                    }
                    Ok(None) => {
                        log::info!("Connection closed by server");
                        break;
                    }
                    Err(err) => {
                        log::error!("Failed to read packet: {err}");
                        break;
                    }
                }
            }
        }
    }
    drop(keepalive_tx);
    let _ = shutdown.send(true);
}

/// Steady-state dispatch of one decoded inbound packet.
async fn handle_packet(
    shared: &ClientShared,
    packet_tx: &mpsc::Sender<ControlPacket>,
    keepalive_tx: &mpsc::Sender<()>,
    inflight: &Mutex<HashSet<PacketId>>,
    frame: &[u8],
) -> Result<(), Error> {
    let mut ba = ByteArray::new(frame);
    let packet = ControlPacket::decode(&mut ba)?;
    match packet {
        ControlPacket::Publish(publish) => {
            let qos = publish.qos();
            let packet_id = publish.packet_id();
            shared.deliver(publish).await?;
            match qos {
                QoS::AtMostOnce => {}
                // Inbound QoS 1 is acknowledged with PubAck [MQTT-4.3.2-2].
                QoS::AtLeastOnce => {
                    packet_tx
                        .send(ControlPacket::PublishAck(PublishAckPacket::new(packet_id)))
                        .await?;
                }
                // Inbound QoS 2 opens the two-step handshake with PubRec [MQTT-4.3.3-2].
                QoS::ExactOnce => {
                    packet_tx
                        .send(ControlPacket::PublishReceived(PublishReceivedPacket::new(
                            packet_id,
                        )))
                        .await?;
                }
            }
        }
        ControlPacket::PublishAck(ack) => {
            complete_inflight(shared, inflight, ack.packet_id());
        }
        ControlPacket::PublishReceived(ack) => {
            packet_tx
                .send(ControlPacket::PublishRelease(PublishReleasePacket::new(
                    ack.packet_id(),
                )))
                .await?;
        }
        ControlPacket::PublishRelease(ack) => {
            packet_tx
                .send(ControlPacket::PublishComplete(PublishCompletePacket::new(
                    ack.packet_id(),
                )))
                .await?;
        }
        ControlPacket::PublishComplete(ack) => {
            complete_inflight(shared, inflight, ack.packet_id());
        }
        ControlPacket::SubscribeAck(ack) => {
            complete_inflight(shared, inflight, ack.packet_id());
        }
        ControlPacket::UnsubscribeAck(ack) => {
            complete_inflight(shared, inflight, ack.packet_id());
        }
        ControlPacket::PingResponse(_) => {
            // Never blocks: capacity one, surplus pongs are uninteresting.
            let _ = keepalive_tx.try_send(());
        }
        packet => {
            log::info!("Unhandled inbound packet: {packet:?}");
        }
    }
    Ok(())
}

fn complete_inflight(
    shared: &ClientShared,
    inflight: &Mutex<HashSet<PacketId>>,
    packet_id: PacketId,
) {
    inflight
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&packet_id);
    shared.complete_flow(packet_id);
}

/// Ping the server every `keep_alive` and require a pong within
/// `keep_alive * factor`. A missed pong raises shutdown, closing the
/// connection; closure of the keepalive channel stops the supervisor.
async fn keepalive_pump(
    packet_tx: mpsc::Sender<ControlPacket>,
    mut keepalive_rx: mpsc::Receiver<()>,
    keep_alive: Duration,
    factor: f64,
    shutdown: Arc<watch::Sender<bool>>,
    mut shutdown_rx: watch::Receiver<bool>,
    _done_tx: mpsc::Sender<()>,
) {
    let mut timer = interval(keep_alive);
    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = timer.tick() => {
                if packet_tx
                    .send(ControlPacket::PingRequest(PingRequestPacket::new()))
                    .await
                    .is_err()
                {
                    break;
                }
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    pong = keepalive_rx.recv() => {
                        if pong.is_none() {
                            // Receive pump closed the channel.
                            break;
                        }
                    }
                    () = sleep(keep_alive.mul_f64(factor)) => {
                        log::error!("Keepalive timeout, closing connection");
                        let _ = shutdown.send(true);
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_packet_reassembles_split_frames() {
        let (client, mut server) = tokio::io::duplex(64);
        let frame = [0x40, 0x02, 0x00, 0x01, 0xd0];
        server.write_all(&frame).await.unwrap();
        server.write_all(&[0x00]).await.unwrap();

        let (mut reader, _writer) = tokio::io::split(client);
        let mut buf = Vec::new();
        let first = read_packet(&mut reader, &mut buf).await.unwrap().unwrap();
        assert_eq!(&first, &[0x40, 0x02, 0x00, 0x01]);
        // The trailing PingResp frame was buffered across reads.
        let second = read_packet(&mut reader, &mut buf).await.unwrap().unwrap();
        assert_eq!(&second, &[0xd0, 0x00]);

        drop(server);
        let eof = read_packet(&mut reader, &mut buf).await.unwrap();
        assert!(eof.is_none());
    }

    #[tokio::test]
    async fn test_read_packet_rejects_overlong_remaining_length() {
        let (client, mut server) = tokio::io::duplex(64);
        server
            .write_all(&[0x30, 0x80, 0x80, 0x80, 0x80, 0x01])
            .await
            .unwrap();

        let (mut reader, _writer) = tokio::io::split(client);
        let mut buf = Vec::new();
        let err = read_packet(&mut reader, &mut buf).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecodeError);
    }

    #[tokio::test]
    async fn test_read_packet_mid_frame_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        server.write_all(&[0x40, 0x02, 0x00]).await.unwrap();
        drop(server);

        let (mut reader, _writer) = tokio::io::split(client);
        let mut buf = Vec::new();
        let err = read_packet(&mut reader, &mut buf).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SocketError);
    }

    #[test]
    fn test_build_connect_packet() {
        let mut options = ConnectOptions::new(["localhost:1883"]);
        options
            .set_client_id("lian01")
            .set_clean_session(false)
            .set_keep_alive(Duration::from_secs(25))
            .set_auth("user", "pass");
        let packet = build_connect_packet(&options).unwrap();
        assert_eq!(packet.client_id(), "lian01");
        assert_eq!(packet.keep_alive(), 25);
        assert!(packet.connect_flags().has_username());
        assert!(packet.connect_flags().has_password());
        assert!(!packet.connect_flags().clean_session());
        assert!(!packet.connect_flags().will());
    }
}
