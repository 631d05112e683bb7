//! The long-running PPP-control task (spec.md §4.6): owns the LCP mailbox
//! for every non-Configure code once LCP negotiation itself has completed,
//! plus (spec.md §4.3 step 4) the demultiplexer's notifications of PPP
//! protocol numbers nobody else recognized, which it answers with a
//! Protocol-Reject rather than tearing the tunnel down.

use super::{
    send_ppp_frame, CODE_CODE_REJECT, CODE_DISCARD_REQUEST, CODE_ECHO_REPLY, CODE_ECHO_REQUEST,
    CODE_PROTOCOL_REJECT, CODE_TERMINATE_ACK, CODE_TERMINATE_REQUEST,
};
use crate::codec::ppp::{ControlFrame, PppProtocol, UnrecognizedFrame};
use crate::error::{EngineError, Result_, Where};
use crate::session::Session;
use crate::transport::TransportWriter;
use tokio::sync::mpsc;

pub async fn run(
    mailbox: &mut mpsc::Receiver<ControlFrame>,
    reject_mailbox: &mut mpsc::Receiver<UnrecognizedFrame>,
    session: &Session,
    writer: &TransportWriter,
) -> Result<(), EngineError> {
    loop {
        tokio::select! {
            frame = mailbox.recv() => {
                let Some(frame) = frame else { return Ok(()) };
                match frame.code {
                    CODE_ECHO_REQUEST => {
                        let reply = ControlFrame::new(CODE_ECHO_REPLY, frame.id, frame.data);
                        send_ppp_frame(writer, PppProtocol::Lcp, &reply).await?;
                    }
                    CODE_ECHO_REPLY | CODE_DISCARD_REQUEST => {}
                    CODE_TERMINATE_REQUEST => {
                        let ack = ControlFrame::new(CODE_TERMINATE_ACK, frame.id, frame.data);
                        send_ppp_frame(writer, PppProtocol::Lcp, &ack).await?;
                        return Err(EngineError::new(Where::Lcp, Result_::ErrTerminateRequested));
                    }
                    CODE_PROTOCOL_REJECT => {
                        return Err(EngineError::new(Where::Lcp, Result_::ErrProtocolRejected));
                    }
                    CODE_CODE_REJECT => {
                        return Err(EngineError::new(Where::Lcp, Result_::ErrCodeRejected));
                    }
                    _ => {}
                }
            }
            unrecognized = reject_mailbox.recv() => {
                let Some(unrecognized) = unrecognized else { return Ok(()) };
                send_protocol_reject(session, writer, &unrecognized).await?;
            }
        }
    }
}

/// RFC 1661 §5.7: a Protocol-Reject's data is the rejected protocol number
/// followed by as much of the rejected frame as fits without the reply
/// itself exceeding the negotiated MRU.
async fn send_protocol_reject(
    session: &Session,
    writer: &TransportWriter,
    unrecognized: &UnrecognizedFrame,
) -> Result<(), EngineError> {
    let mru = session.negotiated.lock().await.current_mru as usize;
    let data = build_protocol_reject_data(unrecognized.protocol_code, &unrecognized.payload, mru);
    let id = session.next_frame_id().await;
    let reject = ControlFrame::new(CODE_PROTOCOL_REJECT, id, data);
    send_ppp_frame(writer, PppProtocol::Lcp, &reject).await
}

fn build_protocol_reject_data(protocol_code: u16, payload: &[u8], mru: usize) -> Vec<u8> {
    let budget = mru.saturating_sub(ControlFrame::HEADER_LEN + 2);
    let mut data = protocol_code.to_be_bytes().to_vec();
    data.extend_from_slice(&payload[..payload.len().min(budget)]);
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_reject_data_leads_with_the_rejected_protocol_number() {
        let data = build_protocol_reject_data(0x002B, &[1, 2, 3, 4], 1500);
        assert_eq!(&data[..2], &[0x00, 0x2B]);
        assert_eq!(&data[2..], &[1, 2, 3, 4]);
    }

    #[test]
    fn protocol_reject_data_truncates_payload_to_fit_the_mru() {
        let payload = vec![0xAA; 100];
        let mru = ControlFrame::HEADER_LEN + 2 + 10;
        let data = build_protocol_reject_data(0x0021, &payload, mru);
        assert_eq!(data.len(), 2 + 10);
        assert_eq!(&data[2..], &[0xAA; 10]);
    }

    #[test]
    fn protocol_reject_data_keeps_whole_payload_when_it_fits() {
        let payload = vec![1, 2, 3];
        let data = build_protocol_reject_data(0x8021, &payload, 1500);
        assert_eq!(data.len(), 2 + payload.len());
    }
}
