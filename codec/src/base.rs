// Copyright (c) 2022 Lian Project Developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use serde::Deserialize;
use std::convert::TryFrom;

use crate::{ByteArray, DecodeError, EncodeError};

/// Protocol name is fixed in the specification.
pub const PROTOCOL_NAME: &str = "MQTT";

/// Convert native data types to network byte stream.
pub trait EncodePacket {
    /// Encode object into byte stream, returns number of bytes appended.
    ///
    /// # Errors
    ///
    /// Returns error if object contains invalid data.
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError>;
}

/// Parse object from network byte stream.
pub trait DecodePacket: Sized {
    /// Read an object from byte array.
    ///
    /// # Errors
    ///
    /// Returns error if byte stream is malformed or truncated.
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError>;
}

/// Level of assurance for delivery of a Publish message.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QoS {
    /// At most once delivery.
    #[default]
    AtMostOnce = 0,

    /// At least once delivery.
    AtLeastOnce = 1,

    /// Exactly once delivery.
    ExactOnce = 2,
}

impl QoS {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl TryFrom<u8> for QoS {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactOnce),
            _ => Err(DecodeError::InvalidQoS),
        }
    }
}
