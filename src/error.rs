//! The engine's upward-reporting vocabulary: `Where` names the layer that
//! produced an outcome, `Result_` names the outcome itself, and
//! `EngineError` pairs the two into the value that actually crosses the
//! `controlMessages` channel and is ultimately returned by [`crate::Engine::run`].

use crate::codec::ParseError;
use std::fmt;

/// Which layer produced a [`Result_`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Where {
    Proxy,
    Tls,
    SstpDuplexPost,
    SstpControl,
    Lcp,
    LcpMru,
    LcpAuth,
    Pap,
    MsChapV2,
    EapMsChapV2,
    Ipcp,
    IpcpIp,
    Ipv6cp,
    Ipv6cpIdentifier,
    Tun,
    Route,
    Cert,
    Engine,
}

impl fmt::Display for Where {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The outcome enumeration from spec.md §7. `Proceeded` means the phase
/// completed normally; every other variant is terminal and triggers
/// teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Result_ {
    Proceeded,
    ErrTimeout,
    ErrCountExhausted,
    ErrUnknownType,
    ErrUnexpectedMessage,
    ErrParsingFailed,
    ErrVerificationFailed,
    ErrNegativeAcknowledged,
    ErrAbortRequested,
    ErrDisconnectRequested,
    ErrTerminateRequested,
    ErrProtocolRejected,
    ErrCodeRejected,
    ErrAuthenticationFailed,
    ErrAddressRejected,
    ErrOptionRejected,
    ErrInvalidAddress,
    ErrInvalidPacketSize,
}

impl Result_ {
    /// `true` for every outcome other than [`Result_::Proceeded`].
    pub fn is_error(self) -> bool {
        !matches!(self, Self::Proceeded)
    }
}

/// A `(Where, Result_)` pair: the value a client task reports on its
/// mailbox, and what the Engine ultimately surfaces to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{result:?} at {where_}")]
pub struct EngineError {
    pub where_: Where,
    pub result: Result_,
}

impl EngineError {
    pub fn new(where_: Where, result: Result_) -> Self {
        Self { where_, result }
    }
}

/// Errors surfaced by the codec/transport/tun layers before they are tagged
/// with a [`Where`] and folded into an [`EngineError`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(String),
    #[error("tls handshake failed: {0}")]
    Tls(String),
    #[error("proxy CONNECT rejected with status {0}")]
    ProxyRejected(u16),
    #[error("SSTP_DUPLEX_POST rejected with status {0}")]
    DuplexPostRejected(u16),
    #[error("malformed HTTP response from proxy or server")]
    MalformedHttp,
    #[error("server presented an untrusted certificate")]
    CertificateUntrusted(Vec<u8>),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TunError {
    #[error("invalid address: final negotiated address is all-zero")]
    InvalidAddress,
    #[error("tun device i/o error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TrustStoreError {
    #[error("failed to parse CA file {file}: {reason}")]
    ParsingFailed { file: String, reason: String },
}
