// Copyright (c) 2023 Lian Project Developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::fmt::{self, Display};
use std::io;
use tokio::sync::mpsc;
use tokio::time::error::Elapsed;
use tokio_rustls::rustls;

use codec::v3::{ControlPacket, PublishPacket};

/// Represent the types of errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Error occurred while performing I/O.
    IoError,

    /// Packet encode error.
    EncodeError,

    /// Packet decode error.
    DecodeError,

    /// Socket stream error.
    SocketError,

    /// Cert files error.
    CertError,

    /// mpsc channel error.
    ChannelError,

    /// Operation did not finish in time.
    TimeoutError,

    /// Peer violated the protocol during handshake or steady state.
    ProtocolError,

    /// Invalid connect status.
    InvalidClientStatus,

    /// Invalid option values.
    ConfigError,
}

#[derive(Clone, Debug)]
pub struct Error {
    /// Type of current error.
    kind: ErrorKind,

    /// Detail message about this error.
    message: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, message: &str) -> Self {
        Self {
            kind,
            message: message.to_owned(),
        }
    }

    #[must_use]
    pub fn from_string(kind: ErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    /// Get type of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get detail message of this error.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::from_string(ErrorKind::IoError, format!("IoError {err}"))
    }
}

impl From<Elapsed> for Error {
    fn from(err: Elapsed) -> Self {
        Self::from_string(ErrorKind::TimeoutError, format!("Timeout: {err}"))
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Self::from_string(ErrorKind::CertError, format!("Rustls error: {err}"))
    }
}

impl From<rustls::client::InvalidDnsNameError> for Error {
    fn from(err: rustls::client::InvalidDnsNameError) -> Self {
        Self::from_string(ErrorKind::CertError, format!("Invalid server name: {err}"))
    }
}

// Internal error conversions.
impl From<codec::EncodeError> for Error {
    fn from(err: codec::EncodeError) -> Self {
        Self::from_string(ErrorKind::EncodeError, format!("{err:?}"))
    }
}

impl From<codec::DecodeError> for Error {
    fn from(err: codec::DecodeError) -> Self {
        Self::from_string(ErrorKind::DecodeError, format!("{err:?}"))
    }
}

impl From<codec::TopicError> for Error {
    fn from(err: codec::TopicError) -> Self {
        Self::from_string(ErrorKind::ConfigError, format!("Invalid topic: {err:?}"))
    }
}

macro_rules! convert_send_error {
    ($payload_type: ident) => {
        impl From<mpsc::error::SendError<$payload_type>> for Error {
            fn from(err: mpsc::error::SendError<$payload_type>) -> Self {
                Self::from_string(
                    ErrorKind::ChannelError,
                    format!("{} channel error: {}", stringify!($payload_type), err),
                )
            }
        }
    };
}

convert_send_error!(ControlPacket);
convert_send_error!(PublishPacket);
