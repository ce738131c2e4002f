// Copyright (c) 2023 Lian Project Developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures_util::future::join_all;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use codec::v3::{
    ControlPacket, PublishPacket, SubscribePacket, SubscribeTopic, UnsubscribePacket,
};
use codec::{PacketId, QoS, SubTopic};

use crate::connect_options::ConnectOptions;
use crate::connection::{run_connection, ConnectionHandle, ConnectionStatus};
use crate::error::{Error, ErrorKind};
use crate::pid::PacketIdAllocator;
use crate::router::{MessageHandler, TopicRouter, WildcardRouter};

/// Callback reporting the outcome of one server handshake.
///
/// Arguments are the server address, the MQTT return code when the broker
/// rejected the session (0 otherwise) and the transport or protocol error,
/// if any. A successful handshake reports `(server, 0, None)`.
pub type ConnectHandler = Arc<dyn Fn(&str, u8, Option<Error>) + Send + Sync>;

/// Callback invoked when the terminal acknowledgement of a QoS flow arrives
/// and its packet id returns to the pool.
pub type AckHandler = Arc<dyn Fn(PacketId) + Send + Sync>;

/// Application message handed to [`Client::publish`].
#[derive(Clone, Debug)]
pub struct PublishMessage {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Vec<u8>,
}

impl PublishMessage {
    #[must_use]
    pub fn new(topic: &str, qos: QoS, payload: &[u8]) -> Self {
        Self {
            topic: topic.to_string(),
            qos,
            retain: false,
            payload: payload.to_vec(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FlowKind {
    Publish,
    Subscribe,
    Unsubscribe,
}

/// One outstanding QoS flow, keyed by packet id.
struct Flow {
    kind: FlowKind,
    handler: Option<AckHandler>,
}

/// State shared between the client facade and its connection workers.
///
/// Workers hold an `Arc` of this; no field points back at the worker set
/// except the connection map, so teardown stays deterministic.
pub(crate) struct ClientShared {
    pub(crate) options: ConnectOptions,
    pub(crate) allocator: PacketIdAllocator,
    pub(crate) outbound_rx: Arc<AsyncMutex<mpsc::Receiver<ControlPacket>>>,
    router: Arc<dyn TopicRouter>,
    outbound_tx: mpsc::Sender<ControlPacket>,
    inbound_tx: Mutex<Option<mpsc::Sender<PublishPacket>>>,
    inbound_rx: Mutex<Option<mpsc::Receiver<PublishPacket>>>,
    connections: RwLock<HashMap<String, Arc<ConnectionHandle>>>,
    flows: Mutex<HashMap<PacketId, Flow>>,
    destroyed: AtomicBool,
    dispatcher_started: AtomicBool,
}

impl ClientShared {
    /// Put `packet` on the shared outbound queue.
    ///
    /// The queue is bounded; a full queue backpressures the caller instead of
    /// dropping the packet.
    async fn enqueue(&self, packet: ControlPacket) -> Result<(), Error> {
        self.outbound_tx.send(packet).await?;
        Ok(())
    }

    /// Put an inbound publish on the shared inbound queue for the router.
    pub(crate) async fn deliver(&self, packet: PublishPacket) -> Result<(), Error> {
        let inbound_tx = {
            let guard = self.inbound_tx.lock().unwrap_or_else(PoisonError::into_inner);
            guard.clone()
        };
        match inbound_tx {
            Some(inbound_tx) => {
                inbound_tx.send(packet).await?;
                Ok(())
            }
            None => Err(Error::new(
                ErrorKind::ChannelError,
                "Inbound queue is closed",
            )),
        }
    }

    fn register_flow(&self, packet_id: PacketId, kind: FlowKind, handler: Option<AckHandler>) {
        let mut flows = self.flows.lock().unwrap_or_else(PoisonError::into_inner);
        flows.insert(packet_id, Flow { kind, handler });
    }

    /// Terminal acknowledgement arrived: release the id and fire the
    /// flow's completion handler.
    pub(crate) fn complete_flow(&self, packet_id: PacketId) {
        let flow = {
            let mut flows = self.flows.lock().unwrap_or_else(PoisonError::into_inner);
            flows.remove(&packet_id)
        };
        self.allocator.free(packet_id);
        match flow {
            Some(flow) => {
                if let Some(handler) = flow.handler {
                    handler(packet_id);
                }
            }
            None => log::warn!("No flow in progress for packet id {packet_id}"),
        }
    }

    /// Release an id whose acknowledgement will never arrive. Called on
    /// connection teardown and on enqueue failures.
    pub(crate) fn abandon_flow(&self, packet_id: PacketId) {
        let flow = {
            let mut flows = self.flows.lock().unwrap_or_else(PoisonError::into_inner);
            flows.remove(&packet_id)
        };
        self.allocator.free(packet_id);
        if let Some(flow) = flow {
            log::warn!("Abandoned {:?} flow with packet id {packet_id}", flow.kind);
        }
    }

    /// Record an established connection. Returns false when the client was
    /// destroyed in the meantime and the worker must shut down again.
    pub(crate) fn register_connection(&self, handle: Arc<ConnectionHandle>) -> bool {
        if self.destroyed.load(Ordering::SeqCst) {
            return false;
        }
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        connections.insert(handle.server().to_string(), handle);
        true
    }

    pub(crate) fn deregister_connection(&self, server: &str) {
        let mut connections = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        connections.remove(server);
    }

    fn connection_snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        let connections = self
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        connections.values().cloned().collect()
    }
}

/// Multi-server MQTT 3.1.1 client.
///
/// One connection worker runs per configured server. Outbound packets go
/// through a shared bounded queue and are written by whichever connected
/// worker dequeues them first; inbound publishes of all connections are
/// funneled through the router.
pub struct Client {
    shared: Arc<ClientShared>,
}

impl Client {
    /// Create a client with the default wildcard router.
    #[must_use]
    pub fn new(options: ConnectOptions) -> Self {
        Self::with_router(options, Arc::new(WildcardRouter::new()))
    }

    /// Create a client dispatching inbound publishes through `router`.
    #[must_use]
    pub fn with_router(options: ConnectOptions, router: Arc<dyn TopicRouter>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(options.send_channel_capacity());
        let (inbound_tx, inbound_rx) = mpsc::channel(options.recv_channel_capacity());
        let shared = Arc::new(ClientShared {
            options,
            allocator: PacketIdAllocator::new(),
            outbound_rx: Arc::new(AsyncMutex::new(outbound_rx)),
            router,
            outbound_tx,
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx: Mutex::new(Some(inbound_rx)),
            connections: RwLock::new(HashMap::new()),
            flows: Mutex::new(HashMap::new()),
            destroyed: AtomicBool::new(false),
            dispatcher_started: AtomicBool::new(false),
        });
        Self { shared }
    }

    #[must_use]
    pub fn options(&self) -> &ConnectOptions {
        &self.shared.options
    }

    /// Begin dialing every configured server concurrently; returns without
    /// waiting for any handshake. `handler` is invoked once per server.
    ///
    /// # Errors
    ///
    /// Returns error if the client was destroyed.
    pub fn connect(&self, handler: ConnectHandler) -> Result<(), Error> {
        if self.shared.destroyed.load(Ordering::SeqCst) {
            return Err(Error::new(
                ErrorKind::InvalidClientStatus,
                "Client is destroyed",
            ));
        }
        self.start_dispatcher();

        let mut seen = HashSet::new();
        for server in self.shared.options.servers() {
            // One connection per server address.
            if !seen.insert(server.clone()) {
                continue;
            }
            let already_connected = {
                let connections = self
                    .shared
                    .connections
                    .read()
                    .unwrap_or_else(PoisonError::into_inner);
                connections.contains_key(server)
            };
            if already_connected {
                log::warn!("Already connected to {server}");
                continue;
            }
            tokio::spawn(run_connection(
                self.shared.clone(),
                server.clone(),
                handler.clone(),
            ));
        }
        Ok(())
    }

    /// Start the single task draining the inbound publish queue into the
    /// router. Runs at most once per client.
    fn start_dispatcher(&self) {
        if self.shared.dispatcher_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let inbound_rx = {
            let mut guard = self
                .shared
                .inbound_rx
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            guard.take()
        };
        let Some(mut inbound_rx) = inbound_rx else {
            return;
        };
        let router = self.shared.router.clone();
        tokio::spawn(async move {
            while let Some(packet) = inbound_rx.recv().await {
                router.dispatch(&packet);
            }
            log::info!("Router dispatcher stopped");
        });
    }

    /// Publish application messages.
    ///
    /// A packet id is assigned to every message with QoS above 0 and
    /// `handler`, when given, fires as each flow completes. With several
    /// servers connected, each message goes out over whichever connection
    /// dequeues it, not over all of them.
    ///
    /// # Errors
    ///
    /// Returns error if a topic is invalid or the client is shutting down.
    pub async fn publish(
        &self,
        handler: Option<AckHandler>,
        messages: Vec<PublishMessage>,
    ) -> Result<(), Error> {
        for message in messages {
            let mut packet = PublishPacket::new(&message.topic, message.qos, &message.payload)?;
            packet.set_retain(message.retain);
            if message.qos == QoS::AtMostOnce {
                self.shared.enqueue(ControlPacket::Publish(packet)).await?;
                continue;
            }

            let packet_id = self.shared.allocator.next_id().await;
            packet.set_packet_id(packet_id);
            self.shared
                .register_flow(packet_id, FlowKind::Publish, handler.clone());
            if let Err(err) = self.shared.enqueue(ControlPacket::Publish(packet)).await {
                self.shared.abandon_flow(packet_id);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Subscribe to topic filters, registering `handler` for each of them in
    /// the router, and enqueue one Subscribe packet carrying all pairs.
    ///
    /// # Errors
    ///
    /// Returns error if a filter is invalid or the client is shutting down.
    pub async fn subscribe(
        &self,
        handler: MessageHandler,
        topics: &[(&str, QoS)],
    ) -> Result<(), Error> {
        let mut subscribe_topics = Vec::with_capacity(topics.len());
        for (filter, qos) in topics {
            self.shared.router.handle(filter, handler.clone())?;
            subscribe_topics.push(SubscribeTopic::new(filter, *qos)?);
        }

        let packet_id = self.shared.allocator.next_id().await;
        let packet = SubscribePacket::with_topics(packet_id, subscribe_topics)?;
        self.shared
            .register_flow(packet_id, FlowKind::Subscribe, None);
        if let Err(err) = self.shared.enqueue(ControlPacket::Subscribe(packet)).await {
            self.shared.abandon_flow(packet_id);
            return Err(err);
        }
        Ok(())
    }

    /// Unsubscribe from topic filters, removing them from the router, and
    /// enqueue one Unsubscribe packet. `handler`, when given, fires when the
    /// UnsubAck arrives.
    ///
    /// # Errors
    ///
    /// Returns error if a filter is invalid or the client is shutting down.
    pub async fn unsubscribe(
        &self,
        handler: Option<AckHandler>,
        topics: &[&str],
    ) -> Result<(), Error> {
        let mut unsubscribe_topics = Vec::with_capacity(topics.len());
        for filter in topics {
            self.shared.router.remove(filter);
            unsubscribe_topics.push(SubTopic::new(filter)?);
        }

        let packet_id = self.shared.allocator.next_id().await;
        let packet = UnsubscribePacket::with_topics(packet_id, unsubscribe_topics)?;
        self.shared
            .register_flow(packet_id, FlowKind::Unsubscribe, handler);
        if let Err(err) = self
            .shared
            .enqueue(ControlPacket::Unsubscribe(packet))
            .await
        {
            self.shared.abandon_flow(packet_id);
            return Err(err);
        }
        Ok(())
    }

    /// Lifecycle state of the connection to `server`, when one is registered.
    #[must_use]
    pub fn connection_status(&self, server: &str) -> Option<ConnectionStatus> {
        let connections = self
            .shared
            .connections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        connections.get(server).map(|handle| handle.status())
    }

    /// Block until every currently registered connection has terminated.
    pub async fn wait(&self) {
        let handles = self.shared.connection_snapshot();
        join_all(handles.iter().map(|handle| handle.wait())).await;
    }

    /// Tear the client down: stop feeding the router and close every
    /// connection, gracefully or by force. Idempotent.
    pub async fn destroy(&self, force: bool) {
        if self.shared.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Taking the stored sender closes the inbound queue; the dispatcher
        // stops once the last transient deliver() clone is gone.
        {
            let mut inbound_tx = self
                .shared
                .inbound_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            inbound_tx.take();
        }
        let handles = self.shared.connection_snapshot();
        for handle in handles {
            handle.close(force).await;
        }
    }
}
