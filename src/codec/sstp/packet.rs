use super::attribute::Attribute;
use super::message::SstpMessageType;
use crate::codec::{get_u16, put_u16, ParseError};
use std::convert::TryFrom;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Data,
    Control,
}

impl PacketType {
    pub fn code(self) -> u16 {
        match self {
            Self::Data => 0x1000,
            Self::Control => 0x1001,
        }
    }
}

impl TryFrom<u16> for PacketType {
    type Error = ParseError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0x1000 => Self::Data,
            0x1001 => Self::Control,
            other => return Err(ParseError::UnknownSstpMessageType(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlPacket {
    pub message_type: SstpMessageType,
    pub attributes: Vec<Attribute>,
}

impl ControlPacket {
    pub fn new(message_type: SstpMessageType, attributes: Vec<Attribute>) -> Self {
        Self {
            message_type,
            attributes,
        }
    }

    fn body_len(&self) -> usize {
        4 + self.attributes.iter().map(Attribute::len).sum::<usize>()
    }
}

/// A full SSTP packet: either a DATA packet carrying a raw PPP frame (HDLC
/// header onward) or a CONTROL packet carrying a message type and
/// attribute list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SstpPacket {
    Data(Vec<u8>),
    Control(ControlPacket),
}

impl SstpPacket {
    pub const HEADER_LEN: usize = 4;
    /// Declared-length values below this are structurally impossible: the
    /// header itself is 4 bytes (spec.md §4.3: "If length < 4 ... terminate").
    pub const MIN_LENGTH: usize = 4;

    fn total_len(&self) -> usize {
        Self::HEADER_LEN
            + match self {
                Self::Data(body) => body.len(),
                Self::Control(packet) => packet.body_len(),
            }
    }

    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Data(_) => PacketType::Data,
            Self::Control(_) => PacketType::Control,
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.total_len());
        let mut type_bytes = [0u8; 2];
        put_u16(&mut type_bytes, self.packet_type().code());
        buf.extend_from_slice(&type_bytes);
        let mut len_bytes = [0u8; 2];
        put_u16(&mut len_bytes, self.total_len() as u16);
        buf.extend_from_slice(&len_bytes);
        match self {
            Self::Data(body) => buf.extend_from_slice(body),
            Self::Control(packet) => {
                let mut mt = [0u8; 2];
                put_u16(&mut mt, packet.message_type.code());
                buf.extend_from_slice(&mt);
                let mut count = [0u8; 2];
                put_u16(&mut count, packet.attributes.len() as u16);
                buf.extend_from_slice(&count);
                for attr in &packet.attributes {
                    attr.write_to(&mut buf);
                }
            }
        }
        buf
    }

    /// Reads just the declared total length out of a packet's first 4
    /// bytes, without requiring the rest of the packet to be present yet
    /// (spec.md §4.3 step 1: "Peek 4 bytes").
    pub fn peek_length(header: &[u8; 4]) -> Result<usize, ParseError> {
        let length = get_u16(&header[2..4]) as usize;
        if length < Self::MIN_LENGTH {
            return Err(ParseError::InvalidPacketSize(length));
        }
        Ok(length)
    }

    /// Parses a complete packet out of exactly `buf.len()` bytes (the
    /// caller has already buffered exactly the declared length).
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < Self::HEADER_LEN {
            return Err(ParseError::TooShort(buf.len()));
        }
        let packet_type = PacketType::try_from(get_u16(&buf[0..2]))?;
        let declared = get_u16(&buf[2..4]) as usize;
        if declared != buf.len() {
            return Err(ParseError::LengthMismatch {
                declared,
                actual: buf.len(),
            });
        }
        let body = &buf[Self::HEADER_LEN..];
        match packet_type {
            PacketType::Data => Ok(Self::Data(body.to_vec())),
            PacketType::Control => {
                if body.len() < 4 {
                    return Err(ParseError::TooShort(body.len()));
                }
                let message_type = SstpMessageType::try_from(get_u16(&body[0..2]))?;
                let count = get_u16(&body[2..4]);
                let attributes = Attribute::parse_list(&body[4..], count)?;
                Ok(Self::Control(ControlPacket::new(message_type, attributes)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_packet_roundtrip() {
        let packet = SstpPacket::Data(vec![0xFF, 0x03, 0x00, 0x21, 1, 2, 3, 4]);
        let bytes = packet.to_vec();
        assert_eq!(SstpPacket::parse(&bytes).unwrap(), packet);
    }

    #[test]
    fn control_packet_roundtrip() {
        let packet = SstpPacket::Control(ControlPacket::new(
            SstpMessageType::CallConnectRequest,
            vec![Attribute::EncapsulatedProtocolId(1)],
        ));
        let bytes = packet.to_vec();
        assert_eq!(SstpPacket::parse(&bytes).unwrap(), packet);
    }

    #[test]
    fn peek_length_matches_total() {
        let packet = SstpPacket::Data(vec![1, 2, 3, 4]);
        let bytes = packet.to_vec();
        let header: [u8; 4] = bytes[..4].try_into().unwrap();
        assert_eq!(SstpPacket::peek_length(&header).unwrap(), bytes.len());
    }

    #[test]
    fn rejects_too_small_declared_length() {
        let header = [0x10, 0x00, 0x00, 0x02];
        assert!(matches!(
            SstpPacket::peek_length(&header),
            Err(ParseError::InvalidPacketSize(2))
        ));
    }
}
