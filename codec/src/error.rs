// Copyright (c) 2022 Lian Project Developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::io;

use crate::topic::TopicError;
use crate::utils::StringError;
use crate::var_int::VarIntError;

/// Errors returned while parsing a byte stream into control packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Not enough bytes left in the buffer.
    OutOfRange,

    /// Packet type bits hold a reserved value.
    InvalidPacketType,

    /// Flag bits of fixed header hold unexpected values.
    InvalidPacketFlags,

    /// Packet id is zero where a non-zero id is required [MQTT-2.3.1-1].
    InvalidPacketId,

    /// `Remaining Length` field requires more than four bytes.
    InvalidVarInt,

    /// Body length does not match the `Remaining Length` field.
    InvalidRemainingLength,

    /// Protocol name must be "MQTT".
    InvalidProtocolName,

    /// Protocol level is not in `3.1`, `3.1.1` or `5.0`.
    InvalidProtocolLevel,

    /// QoS is not 0, 1 or 2.
    InvalidQoS,

    /// Invalid UTF-8 string.
    InvalidString,

    /// ClientId contains invalid characters or exceeds 23 bytes.
    InvalidClientId,

    /// Reserved bit set or username/password flags mismatch.
    InvalidConnectFlags,

    /// Topic name or filter violates the rules of MQTT chapter-4.7.
    InvalidTopic,

    /// Subscribe/Unsubscribe packet carries no topic filter [MQTT-3.8.3-3].
    EmptyTopicFilter,

    /// Length of data exceeds its limitation.
    TooManyData,
}

/// Errors returned while serializing control packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// Packet field holds data not allowed on the wire.
    InvalidData,

    /// Length of data exceeds its limitation.
    TooManyData,

    /// ClientId contains invalid characters or exceeds 23 bytes.
    InvalidClientId,

    /// Topic name or filter violates the rules of MQTT chapter-4.7.
    InvalidTopic,

    /// Packet is larger than the maximum `Remaining Length`.
    InvalidVarInt,

    /// Failed to append bytes to buffer.
    IoError,
}

impl From<std::string::FromUtf8Error> for DecodeError {
    fn from(_err: std::string::FromUtf8Error) -> Self {
        Self::InvalidString
    }
}

impl From<VarIntError> for DecodeError {
    fn from(_err: VarIntError) -> Self {
        Self::InvalidVarInt
    }
}

impl From<StringError> for DecodeError {
    fn from(err: StringError) -> Self {
        match err {
            StringError::TooManyData => Self::TooManyData,
            _ => Self::InvalidString,
        }
    }
}

impl From<TopicError> for DecodeError {
    fn from(err: TopicError) -> Self {
        match err {
            TopicError::TooManyData => Self::TooManyData,
            _ => Self::InvalidTopic,
        }
    }
}

impl From<io::Error> for EncodeError {
    fn from(_err: io::Error) -> Self {
        Self::IoError
    }
}

impl From<VarIntError> for EncodeError {
    fn from(_err: VarIntError) -> Self {
        Self::InvalidVarInt
    }
}

impl From<StringError> for EncodeError {
    fn from(err: StringError) -> Self {
        match err {
            StringError::TooManyData => Self::TooManyData,
            _ => Self::InvalidData,
        }
    }
}

impl From<TopicError> for EncodeError {
    fn from(err: TopicError) -> Self {
        match err {
            TopicError::TooManyData => Self::TooManyData,
            _ => Self::InvalidTopic,
        }
    }
}
