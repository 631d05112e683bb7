//! The fixed HDLC header, the PPP protocol number, and the generic
//! Code/Id/Length control-frame header shared by LCP, PAP, CHAP, EAP, IPCP
//! and IPv6CP (spec.md §4.1).

use crate::codec::{get_u16, put_u16, ParseError};
use std::convert::TryFrom;

/// The fixed HDLC header byte pair retained in PPP-over-SSTP framing.
pub const HDLC_HEADER: [u8; 2] = [0xFF, 0x03];

/// The 2-byte PPP protocol number, as carried right after the HDLC header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PppProtocol {
    Lcp,
    Pap,
    Chap,
    Eap,
    Ipcp,
    Ipv6cp,
    Ipv4,
    Ipv6,
}

impl PppProtocol {
    pub fn code(self) -> u16 {
        match self {
            Self::Lcp => 0xC021,
            Self::Pap => 0xC023,
            Self::Chap => 0xC223,
            Self::Eap => 0xC227,
            Self::Ipcp => 0x8021,
            Self::Ipv6cp => 0x8057,
            Self::Ipv4 => 0x0021,
            Self::Ipv6 => 0x0057,
        }
    }
}

impl TryFrom<u16> for PppProtocol {
    type Error = ParseError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            0xC021 => Self::Lcp,
            0xC023 => Self::Pap,
            0xC223 => Self::Chap,
            0xC227 => Self::Eap,
            0x8021 => Self::Ipcp,
            0x8057 => Self::Ipv6cp,
            0x0021 => Self::Ipv4,
            0x0057 => Self::Ipv6,
            other => return Err(ParseError::UnknownPppProtocol(other)),
        })
    }
}

/// A parsed LCP/PAP/CHAP/EAP/IPCP/IPv6CP control frame: the code/id/length
/// header plus whatever the code puts after it (an option list for the
/// Configure-* codes, or a protocol-specific payload otherwise). The
/// `protocol` field is not part of the wire bytes here: it is carried
/// alongside since a `ControlFrame` is always produced from an SSTP DATA
/// packet that already named the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFrame {
    pub code: u8,
    pub id: u8,
    pub data: Vec<u8>,
}

impl ControlFrame {
    /// Size of the code + id + length header (not counting the protocol
    /// number, which lives one layer up in the SSTP DATA packet).
    pub const HEADER_LEN: usize = 4;

    pub fn new(code: u8, id: u8, data: Vec<u8>) -> Self {
        Self { code, id, data }
    }

    pub fn len(&self) -> usize {
        Self::HEADER_LEN + self.data.len()
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.code);
        buf.push(self.id);
        let len = self.len() as u16;
        let mut len_bytes = [0u8; 2];
        put_u16(&mut len_bytes, len);
        buf.extend_from_slice(&len_bytes);
        buf.extend_from_slice(&self.data);
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(self.len());
        self.write_to(&mut v);
        v
    }
}

impl TryFrom<&[u8]> for ControlFrame {
    type Error = ParseError;

    fn try_from(buf: &[u8]) -> Result<Self, Self::Error> {
        if buf.len() < Self::HEADER_LEN {
            return Err(ParseError::TooShort(buf.len()));
        }
        let code = buf[0];
        let id = buf[1];
        let length = get_u16(&buf[2..4]) as usize;
        if length != buf.len() {
            return Err(ParseError::PppLengthMismatch {
                declared: length,
                actual: buf.len(),
            });
        }
        Ok(Self {
            code,
            id,
            data: buf[Self::HEADER_LEN..].to_vec(),
        })
    }
}

/// An SSTP DATA payload whose PPP protocol number didn't match any variant
/// of [`PppProtocol`] (spec.md §4.3 step 4, "Unknown protocol"). Carries
/// just enough to build a Protocol-Reject: the raw rejected protocol
/// number and as much of the original frame as a Protocol-Reject is
/// willing to echo back.
#[derive(Debug, Clone)]
pub struct UnrecognizedFrame {
    pub protocol_code: u16,
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_roundtrip() {
        for p in [
            PppProtocol::Lcp,
            PppProtocol::Pap,
            PppProtocol::Chap,
            PppProtocol::Eap,
            PppProtocol::Ipcp,
            PppProtocol::Ipv6cp,
            PppProtocol::Ipv4,
            PppProtocol::Ipv6,
        ] {
            assert_eq!(PppProtocol::try_from(p.code()).unwrap(), p);
        }
        assert!(PppProtocol::try_from(0x1234).is_err());
    }

    #[test]
    fn control_frame_roundtrip() {
        let frame = ControlFrame::new(1, 7, vec![1, 2, 3, 4]);
        let bytes = frame.to_vec();
        assert_eq!(ControlFrame::try_from(bytes.as_slice()).unwrap(), frame);
    }

    #[test]
    fn rejects_length_mismatch() {
        let mut bytes = ControlFrame::new(1, 7, vec![1, 2]).to_vec();
        bytes[3] += 1; // corrupt the declared length
        assert!(matches!(
            ControlFrame::try_from(bytes.as_slice()),
            Err(ParseError::PppLengthMismatch { .. })
        ));
    }
}
