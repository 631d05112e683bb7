use std::net::IpAddr;

/// Every way a frame/attribute/option can fail to parse, one variant per
/// distinct cause so callers can match on exactly what went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("slice of length {0} is too short")]
    TooShort(usize),
    #[error("unknown SSTP message type {0:#06x}")]
    UnknownSstpMessageType(u16),
    #[error("SSTP packet length field {declared} does not match buffer length {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("SSTP packet length field {0} is out of range")]
    InvalidPacketSize(usize),
    #[error("missing HDLC header (expected 0xFF03)")]
    MissingHdlcHeader,
    #[error("unknown PPP protocol {0:#06x}")]
    UnknownPppProtocol(u16),
    #[error("PPP frame length field {declared} does not match remaining data {actual}")]
    PppLengthMismatch { declared: usize, actual: usize },
    #[error("attribute body length {0} is invalid for this attribute id")]
    InvalidAttributeLength(usize),
    #[error("option body length {0} is invalid for this option type")]
    InvalidOptionLength(usize),
    #[error("unknown crypto-binding hash protocol bitmask {0:#04x}")]
    UnknownHashProtocol(u8),
}

/// Raised when a negotiated address is left all-zero (spec.md §6,
/// `TunDevice`'s `ERR_INVALID_ADDRESS`), kept here since it is produced from
/// parsed `IpAddr` values the codec layer already owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("address {0} is invalid (all-zero)")]
pub struct InvalidAddress(pub IpAddr);
