//! MS-CHAPv2 authentication carried inside PPP CHAP (spec.md §4.7): server
//! Challenge, client Response, server Success/Failure. Produces the 16-byte
//! HLAK used later for SSTP crypto-binding.

use crate::codec::ppp::{ControlFrame, PppProtocol};
use crate::crypto::mschap;
use crate::error::{EngineError, Result_, Where};
use crate::ppp::send_ppp_frame;
use crate::session::Session;
use crate::transport::TransportWriter;
use rand::RngCore;
use tokio::sync::mpsc;
use tokio::time::timeout;

const CODE_CHALLENGE: u8 = 1;
const CODE_RESPONSE: u8 = 2;
const CODE_SUCCESS: u8 = 3;
const CODE_FAILURE: u8 = 4;

const RESPONSE_VALUE_LEN: usize = 16 + 8 + 24 + 1;

/// Builds a PPP CHAP Response frame data field: 1-byte Value-Size, the
/// 49-byte MS-CHAPv2 Response value (16-byte peer challenge, 8 reserved
/// zero bytes, 24-byte NT-Response, 1 flags byte, always 0), then the Name
/// field (the username, verbatim, no length prefix — RFC 1994).
fn build_response_value(peer_challenge: &[u8; 16], nt_response: &[u8; 24], username: &str) -> Vec<u8> {
    let mut value = Vec::with_capacity(1 + RESPONSE_VALUE_LEN + username.len());
    value.push(RESPONSE_VALUE_LEN as u8);
    value.extend_from_slice(peer_challenge);
    value.extend_from_slice(&[0u8; 8]);
    value.extend_from_slice(nt_response);
    value.push(0);
    value.extend_from_slice(username.as_bytes());
    value
}

/// Runs the MS-CHAPv2 exchange to completion, populating `session.negotiated.hlak`
/// on success.
pub async fn run(
    session: &Session,
    mailbox: &mut mpsc::Receiver<ControlFrame>,
    writer: &TransportWriter,
) -> Result<(), EngineError> {
    let challenge_frame = timeout(session.config.ppp.auth_timeout, mailbox.recv())
        .await
        .map_err(|_| EngineError::new(Where::MsChapV2, Result_::ErrTimeout))?
        .ok_or_else(|| EngineError::new(Where::MsChapV2, Result_::ErrUnexpectedMessage))?;

    if challenge_frame.code != CODE_CHALLENGE {
        return Err(EngineError::new(Where::MsChapV2, Result_::ErrUnexpectedMessage));
    }
    // Challenge value-size(1) + 16-byte auth challenge + server name.
    if challenge_frame.data.len() < 17 {
        return Err(EngineError::new(Where::MsChapV2, Result_::ErrParsingFailed));
    }
    let mut auth_challenge = [0u8; 16];
    auth_challenge.copy_from_slice(&challenge_frame.data[1..17]);

    let mut peer_challenge = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut peer_challenge);

    let password_hash = mschap::nt_password_hash(&session.config.ppp.password);
    let challenge_hash = mschap::challenge_hash(&peer_challenge, &auth_challenge, &session.config.ppp.username);
    let nt_response = mschap::nt_response(&password_hash, &challenge_hash);

    let response_id = session.next_frame_id().await;
    let response = ControlFrame::new(
        CODE_RESPONSE,
        response_id,
        build_response_value(&peer_challenge, &nt_response, &session.config.ppp.username),
    );
    send_ppp_frame(writer, PppProtocol::Chap, &response).await?;

    let reply = timeout(session.config.ppp.auth_timeout, mailbox.recv())
        .await
        .map_err(|_| EngineError::new(Where::MsChapV2, Result_::ErrTimeout))?
        .ok_or_else(|| EngineError::new(Where::MsChapV2, Result_::ErrUnexpectedMessage))?;

    match reply.code {
        CODE_SUCCESS => {
            let expected = mschap::authenticator_response(&password_hash, &nt_response, &challenge_hash);
            if !verify_authenticator_response(&reply.data, &expected) {
                return Err(EngineError::new(Where::MsChapV2, Result_::ErrVerificationFailed));
            }
            let hlak = mschap::master_key(&password_hash, &nt_response);
            session.negotiated.lock().await.hlak = Some(hlak);
            Ok(())
        }
        CODE_FAILURE => Err(EngineError::new(Where::MsChapV2, Result_::ErrAuthenticationFailed)),
        _ => Err(EngineError::new(Where::MsChapV2, Result_::ErrUnexpectedMessage)),
    }
}

/// The Success message carries `S=<40 hex chars>` somewhere in its ASCII
/// message field; this checks that the hex-encoded expected value appears
/// in it rather than requiring an exact framing match.
fn verify_authenticator_response(message: &[u8], expected: &[u8; 20]) -> bool {
    let expected_hex: String = expected.iter().map(|b| format!("{b:02X}")).collect();
    let Ok(text) = std::str::from_utf8(message) else {
        return false;
    };
    text.contains(&expected_hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_value_has_expected_layout() {
        let peer_challenge = [0x11; 16];
        let nt_response = [0x22; 24];
        let value = build_response_value(&peer_challenge, &nt_response, "alice");
        assert_eq!(value.len(), 1 + RESPONSE_VALUE_LEN + "alice".len());
        assert_eq!(value[0], RESPONSE_VALUE_LEN as u8);
        assert_eq!(&value[1..17], &peer_challenge);
        assert_eq!(&value[17..25], &[0u8; 8]);
        assert_eq!(&value[25..49], &nt_response);
        assert_eq!(value[49], 0);
        assert_eq!(&value[50..], b"alice");
    }

    #[test]
    fn authenticator_response_is_found_case_sensitively() {
        let expected = [0xAB; 20];
        let expected_hex: String = expected.iter().map(|b| format!("{b:02X}")).collect();
        let message = format!("S={expected_hex} M=Access granted");
        assert!(verify_authenticator_response(message.as_bytes(), &expected));
        assert!(!verify_authenticator_response(b"S=0000 M=nope", &expected));
    }
}
