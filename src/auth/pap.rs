//! PAP authentication (spec.md §4.7): one Authenticate-Request, one
//! Authenticate-Ack or -Nak. No HLAK is produced; crypto-binding treats a
//! `None` `negotiated.hlak` as the all-zero 32-byte key PAP calls for.

use crate::codec::ppp::{ControlFrame, PppProtocol};
use crate::error::{EngineError, Result_, Where};
use crate::ppp::send_ppp_frame;
use crate::session::Session;
use crate::transport::TransportWriter;
use tokio::sync::mpsc;
use tokio::time::timeout;

const CODE_AUTHENTICATE_REQUEST: u8 = 1;
const CODE_AUTHENTICATE_ACK: u8 = 2;
const CODE_AUTHENTICATE_NAK: u8 = 3;

/// Builds the `(username-len, username, password-len, password)` body of an
/// Authenticate-Request (spec.md §4.7).
fn build_request_data(username: &[u8], password: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(2 + username.len() + password.len());
    data.push(username.len() as u8);
    data.extend_from_slice(username);
    data.push(password.len() as u8);
    data.extend_from_slice(password);
    data
}

/// Runs the PAP exchange to completion: one request, one reply.
pub async fn run(
    session: &Session,
    mailbox: &mut mpsc::Receiver<ControlFrame>,
    writer: &TransportWriter,
) -> Result<(), EngineError> {
    let id = session.next_frame_id().await;
    let data = build_request_data(
        session.config.ppp.username.as_bytes(),
        session.config.ppp.password.as_bytes(),
    );

    let request = ControlFrame::new(CODE_AUTHENTICATE_REQUEST, id, data);
    send_ppp_frame(writer, PppProtocol::Pap, &request).await?;

    let frame = timeout(session.config.ppp.auth_timeout, mailbox.recv())
        .await
        .map_err(|_| EngineError::new(Where::Pap, Result_::ErrTimeout))?
        .ok_or_else(|| EngineError::new(Where::Pap, Result_::ErrUnexpectedMessage))?;

    match frame.code {
        CODE_AUTHENTICATE_ACK => Ok(()),
        CODE_AUTHENTICATE_NAK => Err(EngineError::new(Where::Pap, Result_::ErrAuthenticationFailed)),
        _ => Err(EngineError::new(Where::Pap, Result_::ErrUnexpectedMessage)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_data_lengths_are_prefixed() {
        let data = build_request_data(b"alice", b"hunter2");
        assert_eq!(data[0], 5);
        assert_eq!(&data[1..6], b"alice");
        assert_eq!(data[6], 7);
        assert_eq!(&data[7..], b"hunter2");
    }

    #[test]
    fn empty_credentials_still_produce_valid_prefixes() {
        let data = build_request_data(b"", b"");
        assert_eq!(data, vec![0, 0]);
    }
}
