// Copyright (c) 2022 Lian Project Developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

mod base;
mod binary_data;
mod byte_array;
mod connect_flags;
mod error;
mod header;
mod packet_id;
mod protocol_level;
mod string_data;
pub mod topic;
mod u16_data;
pub mod utils;
pub mod v3;
mod var_int;

pub use base::{DecodePacket, EncodePacket, QoS, PROTOCOL_NAME};
pub use binary_data::BinaryData;
pub use byte_array::ByteArray;
pub use connect_flags::ConnectFlags;
pub use error::{DecodeError, EncodeError};
pub use header::{FixedHeader, Packet, PacketType};
pub use packet_id::PacketId;
pub use protocol_level::ProtocolLevel;
pub use string_data::StringData;
pub use topic::{PubTopic, SubTopic, Topic, TopicError};
pub use u16_data::U16Data;
pub use var_int::{VarInt, VarIntError, MAX_PACKET_LEN};
