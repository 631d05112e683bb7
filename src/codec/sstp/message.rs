use crate::codec::ParseError;
use std::convert::TryFrom;

/// SSTP control message types (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SstpMessageType {
    CallConnectRequest,
    CallConnectAck,
    CallConnectNak,
    CallConnected,
    CallAbort,
    CallDisconnect,
    CallDisconnectAck,
    EchoRequest,
    EchoResponse,
}

impl SstpMessageType {
    pub fn code(self) -> u16 {
        match self {
            Self::CallConnectRequest => 1,
            Self::CallConnectAck => 2,
            Self::CallConnectNak => 3,
            Self::CallConnected => 4,
            Self::CallAbort => 5,
            Self::CallDisconnect => 6,
            Self::CallDisconnectAck => 7,
            Self::EchoRequest => 8,
            Self::EchoResponse => 9,
        }
    }
}

impl TryFrom<u16> for SstpMessageType {
    type Error = ParseError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::CallConnectRequest,
            2 => Self::CallConnectAck,
            3 => Self::CallConnectNak,
            4 => Self::CallConnected,
            5 => Self::CallAbort,
            6 => Self::CallDisconnect,
            7 => Self::CallDisconnectAck,
            8 => Self::EchoRequest,
            9 => Self::EchoResponse,
            other => return Err(ParseError::UnknownSstpMessageType(other)),
        })
    }
}
