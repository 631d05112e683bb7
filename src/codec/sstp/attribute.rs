//! SSTP control attributes (spec.md §4.1): a 1 reserved byte, 1-byte id,
//! 2-byte length (whole attribute including the 4-byte header), then body.

use crate::codec::{get_u16, put_u16, ParseError};
use std::convert::TryFrom;

/// Crypto-Binding-Request body (spec.md §4.1): 3 reserved bytes, 1-byte
/// hash-protocol bitmask, 32-byte nonce. 36 bytes, 40 with the attribute
/// header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoBindingRequestBody {
    pub hash_protocol_bitmask: u8,
    pub nonce: [u8; 32],
}

impl CryptoBindingRequestBody {
    pub const BODY_LEN: usize = 3 + 1 + 32;

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&[0, 0, 0]);
        buf.push(self.hash_protocol_bitmask);
        buf.extend_from_slice(&self.nonce);
    }

    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() != Self::BODY_LEN {
            return Err(ParseError::InvalidAttributeLength(buf.len()));
        }
        let mut nonce = [0u8; 32];
        nonce.copy_from_slice(&buf[4..36]);
        Ok(Self {
            hash_protocol_bitmask: buf[3],
            nonce,
        })
    }
}

/// Crypto-Binding body (spec.md §4.1): 3 reserved, 1-byte hash protocol,
/// 32-byte nonce echoed, 32-byte server-cert hash, 32-byte compound MAC.
/// 100 bytes, 104 with the attribute header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoBindingBody {
    pub hash_protocol: u8,
    pub nonce: [u8; 32],
    pub cert_hash: [u8; 32],
    pub compound_mac: [u8; 32],
}

impl CryptoBindingBody {
    pub const BODY_LEN: usize = 3 + 1 + 32 + 32 + 32;

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&[0, 0, 0]);
        buf.push(self.hash_protocol);
        buf.extend_from_slice(&self.nonce);
        buf.extend_from_slice(&self.cert_hash);
        buf.extend_from_slice(&self.compound_mac);
    }

    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() != Self::BODY_LEN {
            return Err(ParseError::InvalidAttributeLength(buf.len()));
        }
        let mut nonce = [0u8; 32];
        nonce.copy_from_slice(&buf[4..36]);
        let mut cert_hash = [0u8; 32];
        cert_hash.copy_from_slice(&buf[36..68]);
        let mut compound_mac = [0u8; 32];
        compound_mac.copy_from_slice(&buf[68..100]);
        Ok(Self {
            hash_protocol: buf[3],
            nonce,
            cert_hash,
            compound_mac,
        })
    }

    /// Returns a copy of this body with the compound MAC zeroed, for the
    /// self-check the CMAC is computed over (spec.md §4.8/§8).
    pub fn with_zeroed_mac(&self) -> Self {
        Self {
            compound_mac: [0; 32],
            ..self.clone()
        }
    }
}

/// A parsed SSTP control attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    EncapsulatedProtocolId(u16),
    StatusInfo(Vec<u8>),
    CryptoBinding(CryptoBindingBody),
    CryptoBindingRequest(CryptoBindingRequestBody),
    Unknown { id: u8, body: Vec<u8> },
}

impl Attribute {
    pub const HEADER_LEN: usize = 4;

    fn id(&self) -> u8 {
        match self {
            Self::EncapsulatedProtocolId(_) => 1,
            Self::StatusInfo(_) => 2,
            Self::CryptoBinding(_) => 3,
            Self::CryptoBindingRequest(_) => 4,
            Self::Unknown { id, .. } => *id,
        }
    }

    fn body_len(&self) -> usize {
        match self {
            Self::EncapsulatedProtocolId(_) => 2,
            Self::StatusInfo(body) => body.len(),
            Self::CryptoBinding(_) => CryptoBindingBody::BODY_LEN,
            Self::CryptoBindingRequest(_) => CryptoBindingRequestBody::BODY_LEN,
            Self::Unknown { body, .. } => body.len(),
        }
    }

    pub fn len(&self) -> usize {
        Self::HEADER_LEN + self.body_len()
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(0); // reserved
        buf.push(self.id());
        let mut len_bytes = [0u8; 2];
        put_u16(&mut len_bytes, self.len() as u16);
        buf.extend_from_slice(&len_bytes);
        match self {
            Self::EncapsulatedProtocolId(v) => {
                let mut b = [0u8; 2];
                put_u16(&mut b, *v);
                buf.extend_from_slice(&b);
            }
            Self::StatusInfo(body) => buf.extend_from_slice(body),
            Self::CryptoBinding(body) => body.write_to(buf),
            Self::CryptoBindingRequest(body) => body.write_to(buf),
            Self::Unknown { body, .. } => buf.extend_from_slice(body),
        }
    }

    pub fn write_list(attrs: &[Self]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(attrs.iter().map(Self::len).sum());
        for a in attrs {
            a.write_to(&mut buf);
        }
        buf
    }

    /// Parses `count` consecutive attributes out of `buf`, returning them
    /// and the number of bytes consumed. Attributes beyond a malformed
    /// trailing one are tolerated as a raw holder (spec.md §4.1: "excess
    /// attributes in Nak are tolerated by appending a raw trailing holder").
    pub fn parse_list(buf: &[u8], count: u16) -> Result<Vec<Self>, ParseError> {
        let mut attrs = Vec::with_capacity(count as usize);
        let mut rest = buf;
        for _ in 0..count {
            if rest.len() < Self::HEADER_LEN {
                // Not enough data left for a full attribute: keep whatever
                // remains as a raw trailing holder instead of failing the
                // whole control packet.
                if !rest.is_empty() {
                    attrs.push(Self::Unknown {
                        id: 0xFF,
                        body: rest.to_vec(),
                    });
                }
                return Ok(attrs);
            }
            let id = rest[1];
            let len = get_u16(&rest[2..4]) as usize;
            if len < Self::HEADER_LEN || len > rest.len() {
                return Err(ParseError::InvalidAttributeLength(len));
            }
            let body = &rest[Self::HEADER_LEN..len];
            let attr = match id {
                1 if body.len() == 2 => Self::EncapsulatedProtocolId(get_u16(body)),
                2 => Self::StatusInfo(body.to_vec()),
                3 => Self::CryptoBinding(CryptoBindingBody::parse(body)?),
                4 => Self::CryptoBindingRequest(CryptoBindingRequestBody::parse(body)?),
                _ => Self::Unknown {
                    id,
                    body: body.to_vec(),
                },
            };
            attrs.push(attr);
            rest = &rest[len..];
        }
        Ok(attrs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encapsulated_protocol_id_roundtrip() {
        let attrs = vec![Attribute::EncapsulatedProtocolId(1)];
        let bytes = Attribute::write_list(&attrs);
        assert_eq!(Attribute::parse_list(&bytes, 1).unwrap(), attrs);
    }

    #[test]
    fn crypto_binding_request_roundtrip() {
        let attrs = vec![Attribute::CryptoBindingRequest(CryptoBindingRequestBody {
            hash_protocol_bitmask: 0x02,
            nonce: [7; 32],
        })];
        let bytes = Attribute::write_list(&attrs);
        assert_eq!(bytes.len(), 40);
        assert_eq!(Attribute::parse_list(&bytes, 1).unwrap(), attrs);
    }

    #[test]
    fn crypto_binding_roundtrip() {
        let attrs = vec![Attribute::CryptoBinding(CryptoBindingBody {
            hash_protocol: 2,
            nonce: [1; 32],
            cert_hash: [2; 32],
            compound_mac: [3; 32],
        })];
        let bytes = Attribute::write_list(&attrs);
        assert_eq!(bytes.len(), 104);
        assert_eq!(Attribute::parse_list(&bytes, 1).unwrap(), attrs);
    }

    #[test]
    fn unknown_attribute_preserved() {
        let attrs = vec![Attribute::Unknown {
            id: 99,
            body: vec![1, 2, 3],
        }];
        let bytes = Attribute::write_list(&attrs);
        assert_eq!(Attribute::parse_list(&bytes, 1).unwrap(), attrs);
    }
}
