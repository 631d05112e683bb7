//! The PPP Configure-Request option TLV: 1-byte type, 1-byte length
//! (including the 2-byte header), value. Parsed generically here; the type
//! number is interpreted by each negotiator's option set
//! (`crate::ppp::lcp`, `crate::ppp::ipcp`, `crate::ppp::ipv6cp`), which is
//! also where "unknown option type" becomes meaningful — at this layer
//! every option, known or not, round-trips byte for byte.

use crate::codec::ParseError;
use std::convert::TryFrom;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOption {
    pub ty: u8,
    pub value: Vec<u8>,
}

impl RawOption {
    pub const HEADER_LEN: usize = 2;

    pub fn new(ty: u8, value: Vec<u8>) -> Self {
        Self { ty, value }
    }

    pub fn len(&self) -> usize {
        Self::HEADER_LEN + self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.push(self.ty);
        buf.push(self.len() as u8);
        buf.extend_from_slice(&self.value);
    }

    /// Parses a full option list (as found in a Configure-Request/Ack/Nak/
    /// Reject's data portion): consumes `buf` to the end, preserving the
    /// order options were found in.
    pub fn parse_list(buf: &[u8]) -> Result<Vec<Self>, ParseError> {
        let mut options = Vec::new();
        let mut rest = buf;
        while !rest.is_empty() {
            if rest.len() < Self::HEADER_LEN {
                return Err(ParseError::TooShort(rest.len()));
            }
            let ty = rest[0];
            let len = rest[1] as usize;
            if len < Self::HEADER_LEN || len > rest.len() {
                return Err(ParseError::InvalidOptionLength(len));
            }
            let value = rest[Self::HEADER_LEN..len].to_vec();
            options.push(Self { ty, value });
            rest = &rest[len..];
        }
        Ok(options)
    }

    pub fn write_list(options: &[Self]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(options.iter().map(Self::len).sum());
        for opt in options {
            opt.write_to(&mut buf);
        }
        buf
    }
}

impl TryFrom<&[u8]> for RawOption {
    type Error = ParseError;

    fn try_from(buf: &[u8]) -> Result<Self, Self::Error> {
        if buf.len() < Self::HEADER_LEN {
            return Err(ParseError::TooShort(buf.len()));
        }
        let len = buf[1] as usize;
        if len < Self::HEADER_LEN || len > buf.len() {
            return Err(ParseError::InvalidOptionLength(len));
        }
        Ok(Self {
            ty: buf[0],
            value: buf[Self::HEADER_LEN..len].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_option_roundtrip() {
        let opt = RawOption::new(1, vec![0x05, 0xDC]);
        let mut buf = Vec::new();
        opt.write_to(&mut buf);
        assert_eq!(RawOption::try_from(buf.as_slice()).unwrap(), opt);
    }

    #[test]
    fn list_roundtrip_preserves_order_and_unknowns() {
        let options = vec![
            RawOption::new(1, vec![0x05, 0xDC]),
            RawOption::new(200, vec![0xDE, 0xAD, 0xBE, 0xEF]), // unknown type
            RawOption::new(5, vec![1, 2, 3, 4]),
        ];
        let bytes = RawOption::write_list(&options);
        let parsed = RawOption::parse_list(&bytes).unwrap();
        assert_eq!(parsed, options);
    }
}
