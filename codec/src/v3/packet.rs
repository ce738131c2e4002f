// Copyright (c) 2022 Lian Project Developers. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, Packet, PacketType,
    VarIntError,
};

use super::{
    ConnectAckPacket, ConnectPacket, DisconnectPacket, PingRequestPacket, PingResponsePacket,
    PublishAckPacket, PublishCompletePacket, PublishPacket, PublishReceivedPacket,
    PublishReleasePacket, SubscribeAckPacket, SubscribePacket, UnsubscribeAckPacket,
    UnsubscribePacket,
};

/// Tagged union over all control packets of protocol version 3.1.1.
///
/// Decoding peeks the packet type bits of the fixed header and forwards to
/// the matching packet parser, which re-validates the whole header itself.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, PartialEq)]
pub enum ControlPacket {
    Connect(ConnectPacket),
    ConnectAck(ConnectAckPacket),
    Publish(PublishPacket),
    PublishAck(PublishAckPacket),
    PublishReceived(PublishReceivedPacket),
    PublishRelease(PublishReleasePacket),
    PublishComplete(PublishCompletePacket),
    Subscribe(SubscribePacket),
    SubscribeAck(SubscribeAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubscribeAck(UnsubscribeAckPacket),
    PingRequest(PingRequestPacket),
    PingResponse(PingResponsePacket),
    Disconnect(DisconnectPacket),
}

impl DecodePacket for ControlPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let type_bits = (ba.peek_byte()? & 0b1111_0000) >> 4;
        match type_bits {
            1 => ConnectPacket::decode(ba).map(Self::Connect),
            2 => ConnectAckPacket::decode(ba).map(Self::ConnectAck),
            3 => PublishPacket::decode(ba).map(Self::Publish),
            4 => PublishAckPacket::decode(ba).map(Self::PublishAck),
            5 => PublishReceivedPacket::decode(ba).map(Self::PublishReceived),
            6 => PublishReleasePacket::decode(ba).map(Self::PublishRelease),
            7 => PublishCompletePacket::decode(ba).map(Self::PublishComplete),
            8 => SubscribePacket::decode(ba).map(Self::Subscribe),
            9 => SubscribeAckPacket::decode(ba).map(Self::SubscribeAck),
            10 => UnsubscribePacket::decode(ba).map(Self::Unsubscribe),
            11 => UnsubscribeAckPacket::decode(ba).map(Self::UnsubscribeAck),
            12 => PingRequestPacket::decode(ba).map(Self::PingRequest),
            13 => PingResponsePacket::decode(ba).map(Self::PingResponse),
            14 => DisconnectPacket::decode(ba).map(Self::Disconnect),
            _ => Err(DecodeError::InvalidPacketType),
        }
    }
}

impl EncodePacket for ControlPacket {
    fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        match self {
            Self::Connect(packet) => packet.encode(buf),
            Self::ConnectAck(packet) => packet.encode(buf),
            Self::Publish(packet) => packet.encode(buf),
            Self::PublishAck(packet) => packet.encode(buf),
            Self::PublishReceived(packet) => packet.encode(buf),
            Self::PublishRelease(packet) => packet.encode(buf),
            Self::PublishComplete(packet) => packet.encode(buf),
            Self::Subscribe(packet) => packet.encode(buf),
            Self::SubscribeAck(packet) => packet.encode(buf),
            Self::Unsubscribe(packet) => packet.encode(buf),
            Self::UnsubscribeAck(packet) => packet.encode(buf),
            Self::PingRequest(packet) => packet.encode(buf),
            Self::PingResponse(packet) => packet.encode(buf),
            Self::Disconnect(packet) => packet.encode(buf),
        }
    }
}

impl Packet for ControlPacket {
    fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(packet) => packet.packet_type(),
            Self::ConnectAck(packet) => packet.packet_type(),
            Self::Publish(packet) => packet.packet_type(),
            Self::PublishAck(packet) => packet.packet_type(),
            Self::PublishReceived(packet) => packet.packet_type(),
            Self::PublishRelease(packet) => packet.packet_type(),
            Self::PublishComplete(packet) => packet.packet_type(),
            Self::Subscribe(packet) => packet.packet_type(),
            Self::SubscribeAck(packet) => packet.packet_type(),
            Self::Unsubscribe(packet) => packet.packet_type(),
            Self::UnsubscribeAck(packet) => packet.packet_type(),
            Self::PingRequest(packet) => packet.packet_type(),
            Self::PingResponse(packet) => packet.packet_type(),
            Self::Disconnect(packet) => packet.packet_type(),
        }
    }

    fn bytes(&self) -> Result<usize, VarIntError> {
        match self {
            Self::Connect(packet) => packet.bytes(),
            Self::ConnectAck(packet) => packet.bytes(),
            Self::Publish(packet) => packet.bytes(),
            Self::PublishAck(packet) => packet.bytes(),
            Self::PublishReceived(packet) => packet.bytes(),
            Self::PublishRelease(packet) => packet.bytes(),
            Self::PublishComplete(packet) => packet.bytes(),
            Self::Subscribe(packet) => packet.bytes(),
            Self::SubscribeAck(packet) => packet.bytes(),
            Self::Unsubscribe(packet) => packet.bytes(),
            Self::UnsubscribeAck(packet) => packet.bytes(),
            Self::PingRequest(packet) => packet.bytes(),
            Self::PingResponse(packet) => packet.bytes(),
            Self::Disconnect(packet) => packet.bytes(),
        }
    }
}

impl From<PublishPacket> for ControlPacket {
    fn from(packet: PublishPacket) -> Self {
        Self::Publish(packet)
    }
}

impl From<SubscribePacket> for ControlPacket {
    fn from(packet: SubscribePacket) -> Self {
        Self::Subscribe(packet)
    }
}

impl From<UnsubscribePacket> for ControlPacket {
    fn from(packet: UnsubscribePacket) -> Self {
        Self::Unsubscribe(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PacketId, QoS};

    #[test]
    fn test_decode_dispatch() {
        let mut buf = Vec::new();
        let mut publish = PublishPacket::new("a/b", QoS::AtLeastOnce, b"x").unwrap();
        publish.set_packet_id(PacketId::new(11));
        publish.encode(&mut buf).unwrap();

        let mut ba = ByteArray::new(&buf);
        let packet = ControlPacket::decode(&mut ba).unwrap();
        assert_eq!(packet, ControlPacket::Publish(publish));
    }

    #[test]
    fn test_decode_ping_response() {
        let buf = [0xd0, 0x00];
        let mut ba = ByteArray::new(&buf);
        let packet = ControlPacket::decode(&mut ba).unwrap();
        assert_eq!(
            packet,
            ControlPacket::PingResponse(PingResponsePacket::new())
        );
    }

    #[test]
    fn test_decode_rejects_reserved_type() {
        let buf = [0xf0, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ControlPacket::decode(&mut ba),
            Err(DecodeError::InvalidPacketType)
        );
    }

    #[test]
    fn test_round_trip_all_ack_types() {
        let packets = vec![
            ControlPacket::PublishAck(PublishAckPacket::new(PacketId::new(1))),
            ControlPacket::PublishReceived(PublishReceivedPacket::new(PacketId::new(2))),
            ControlPacket::PublishRelease(PublishReleasePacket::new(PacketId::new(3))),
            ControlPacket::PublishComplete(PublishCompletePacket::new(PacketId::new(4))),
            ControlPacket::UnsubscribeAck(UnsubscribeAckPacket::new(PacketId::new(5))),
            ControlPacket::Disconnect(DisconnectPacket::new()),
        ];
        for packet in packets {
            let mut buf = Vec::new();
            packet.encode(&mut buf).unwrap();
            let mut ba = ByteArray::new(&buf);
            assert_eq!(ControlPacket::decode(&mut ba).unwrap(), packet);
        }
    }
}
