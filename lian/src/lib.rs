// Copyright (c) 2023 Lian Project Developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Multi-server MQTT 3.1.1 client library.
//!
//! A [`Client`] dials every configured server concurrently, keeps one
//! connection worker per server and fans outbound packets out to whichever
//! connected worker picks them up first. Inbound publishes are funneled
//! through a pluggable [`TopicRouter`].

mod backoff;
mod client;
mod connect_options;
mod connection;
mod error;
mod pid;
mod router;
mod stream;

pub use backoff::Backoff;
pub use client::{AckHandler, Client, ConnectHandler, PublishMessage};
pub use connect_options::{ConnectOptions, LastWill, TlsConfig, UsernameAuth};
pub use connection::ConnectionStatus;
pub use error::{Error, ErrorKind};
pub use pid::PacketIdAllocator;
pub use router::{MessageHandler, TopicRouter, WildcardRouter};

pub use codec::v3::PublishPacket;
pub use codec::{PacketId, QoS};
