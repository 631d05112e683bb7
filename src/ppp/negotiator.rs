//! The generic Configure-Request/Ack/Nak/Reject state machine (spec.md
//! §4.5), parameterised by a [`NegotiatorPolicy`] for LCP, IPCP and IPv6CP.

use super::{
    CODE_CONFIGURE_ACK, CODE_CONFIGURE_NAK, CODE_CONFIGURE_REJECT, CODE_CONFIGURE_REQUEST,
};
use crate::codec::ppp::{ControlFrame, PppProtocol, RawOption, HDLC_HEADER};
use crate::error::{EngineError, Result_, Where};
use crate::session::Session;
use crate::transport::TransportWriter;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const REQUEST_INTERVAL: Duration = Duration::from_millis(3000);
pub const MAX_REQ: i32 = 10;
pub const PHASE_TIMEOUT: Duration = Duration::from_millis(30000);

/// The decision points a negotiator delegates to its protocol (LCP, IPCP,
/// IPv6CP), named the same way spec.md §4.5 names them. Async because
/// several hooks read the session's mutex-guarded negotiated state.
#[async_trait]
pub trait NegotiatorPolicy: Send + Sync {
    fn where_(&self) -> Where;
    fn protocol(&self) -> PppProtocol;

    /// Options in the server's Configure-Request that must be rejected
    /// outright (unrecognised option types, and for IPCP, any DNS option).
    fn try_server_reject(&self, options: &[RawOption]) -> Option<Vec<RawOption>>;

    /// Options that must be Nak'd with a substituted value.
    async fn try_server_nak(&self, session: &Session, options: &[RawOption]) -> Option<Vec<RawOption>>;

    /// The client's own Configure-Request option list, rebuilt fresh on
    /// every (re)send since it may depend on the session's negotiated
    /// state (e.g. IPCP's previously Nak'd IPv4 address).
    async fn create_client_request(&self, session: &Session) -> Vec<RawOption>;

    /// Applies the peer's Nak to our own request; returns an error to fail
    /// the phase fatally instead of retrying.
    async fn accept_client_nak(&self, session: &Session, options: &[RawOption]) -> Result<(), EngineError>;

    /// Applies the peer's Reject to our own request; returns an error to
    /// fail the phase fatally instead of retrying.
    async fn accept_client_reject(&self, session: &Session, options: &[RawOption]) -> Result<(), EngineError>;
}

/// Wraps an already-built [`ControlFrame`] with the HDLC header and
/// protocol number and sends it as an SSTP DATA packet. Shared by every
/// PPP-layer sender (negotiators, PPP-control, the authenticators).
pub(crate) async fn send_ppp_frame(
    writer: &TransportWriter,
    protocol: PppProtocol,
    frame: &ControlFrame,
) -> Result<(), EngineError> {
    let mut body = Vec::with_capacity(4 + frame.len());
    body.extend_from_slice(&HDLC_HEADER);
    body.extend_from_slice(&protocol.code().to_be_bytes());
    frame.write_to(&mut body);
    let packet = crate::codec::sstp::SstpPacket::Data(body);
    writer
        .send(&packet.to_vec())
        .await
        .map_err(|_| EngineError::new(Where::Engine, Result_::ErrUnexpectedMessage))
}

async fn send_frame(
    writer: &TransportWriter,
    protocol: PppProtocol,
    code: u8,
    id: u8,
    options: &[RawOption],
) -> Result<(), EngineError> {
    let frame = ControlFrame::new(code, id, RawOption::write_list(options));
    send_ppp_frame(writer, protocol, &frame).await
}

/// Runs one negotiator to completion (spec.md §4.5's pseudocode exactly),
/// wrapped in the overall phase timeout.
pub async fn run(
    policy: &dyn NegotiatorPolicy,
    session: &Arc<Session>,
    mailbox: &mut mpsc::Receiver<ControlFrame>,
    writer: &Arc<TransportWriter>,
) -> Result<(), EngineError> {
    match timeout(PHASE_TIMEOUT, run_inner(policy, session, mailbox, writer)).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::new(policy.where_(), Result_::ErrTimeout)),
    }
}

async fn run_inner(
    policy: &dyn NegotiatorPolicy,
    session: &Arc<Session>,
    mailbox: &mut mpsc::Receiver<ControlFrame>,
    writer: &Arc<TransportWriter>,
) -> Result<(), EngineError> {
    let where_ = policy.where_();
    let protocol = policy.protocol();

    let mut client_ready = false;
    let mut server_ready = false;
    let mut counter = MAX_REQ;

    let mut id = session.next_frame_id().await;
    send_frame(writer, protocol, CODE_CONFIGURE_REQUEST, id, &policy.create_client_request(session).await).await?;

    loop {
        let frame = match timeout(REQUEST_INTERVAL, mailbox.recv()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Err(EngineError::new(where_, Result_::ErrUnexpectedMessage)),
            Err(_elapsed) => {
                client_ready = false;
                counter -= 1;
                if counter < 0 {
                    return Err(EngineError::new(where_, Result_::ErrCountExhausted));
                }
                id = session.next_frame_id().await;
                send_frame(writer, protocol, CODE_CONFIGURE_REQUEST, id, &policy.create_client_request(session).await).await?;
                continue;
            }
        };

        if frame.code == CODE_CONFIGURE_REQUEST {
            server_ready = false;
            let options = RawOption::parse_list(&frame.data)
                .map_err(|_| EngineError::new(where_, Result_::ErrParsingFailed))?;

            if let Some(reject) = policy.try_server_reject(&options) {
                send_frame(writer, protocol, CODE_CONFIGURE_REJECT, frame.id, &reject).await?;
                continue;
            }
            if let Some(nak) = policy.try_server_nak(session, &options).await {
                send_frame(writer, protocol, CODE_CONFIGURE_NAK, frame.id, &nak).await?;
                continue;
            }
            send_frame(writer, protocol, CODE_CONFIGURE_ACK, frame.id, &options).await?;
            server_ready = true;
        } else {
            if client_ready {
                client_ready = false;
                id = session.next_frame_id().await;
                send_frame(writer, protocol, CODE_CONFIGURE_REQUEST, id, &policy.create_client_request(session).await).await?;
                continue;
            }
            if frame.id != id {
                continue;
            }
            match frame.code {
                CODE_CONFIGURE_ACK => client_ready = true,
                CODE_CONFIGURE_NAK => {
                    let options = RawOption::parse_list(&frame.data)
                        .map_err(|_| EngineError::new(where_, Result_::ErrParsingFailed))?;
                    policy.accept_client_nak(session, &options).await?;
                    id = session.next_frame_id().await;
                    send_frame(writer, protocol, CODE_CONFIGURE_REQUEST, id, &policy.create_client_request(session).await).await?;
                }
                CODE_CONFIGURE_REJECT => {
                    let options = RawOption::parse_list(&frame.data)
                        .map_err(|_| EngineError::new(where_, Result_::ErrParsingFailed))?;
                    policy.accept_client_reject(session, &options).await?;
                    id = session.next_frame_id().await;
                    send_frame(writer, protocol, CODE_CONFIGURE_REQUEST, id, &policy.create_client_request(session).await).await?;
                }
                _ => continue,
            }
        }

        if client_ready && server_ready {
            counter = MAX_REQ;
            return Ok(());
        }
    }
}
