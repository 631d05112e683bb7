//! EAP-MSCHAPv2 authentication (spec.md §4.7): an EAP Identity exchange
//! followed by an MS-CHAPv2 inner protocol carried as EAP type 26 (MS-Auth)
//! payloads, reaching `EAP_SUCCESS`/`EAP_FAILURE`.

use crate::codec::ppp::ControlFrame;
use crate::codec::{get_u16, put_u16};
use crate::codec::ppp::PppProtocol;
use crate::crypto::mschap;
use crate::error::{EngineError, Result_, Where};
use crate::ppp::send_ppp_frame;
use crate::session::Session;
use crate::transport::TransportWriter;
use rand::RngCore;
use tokio::sync::mpsc;
use tokio::time::timeout;

const CODE_REQUEST: u8 = 1;
const CODE_RESPONSE: u8 = 2;
const CODE_SUCCESS: u8 = 3;
const CODE_FAILURE: u8 = 4;

const EAP_TYPE_IDENTITY: u8 = 1;
const EAP_TYPE_MSCHAPV2: u8 = 26;

const OP_CHALLENGE: u8 = 1;
const OP_RESPONSE: u8 = 2;
const OP_SUCCESS: u8 = 3;
const OP_FAILURE: u8 = 4;

/// The inner MS-CHAPv2 packet an EAP type-26 payload carries: 1-byte
/// opcode, 1-byte id, 2-byte big-endian length (of the whole inner packet),
/// then opcode-specific data.
struct InnerPacket<'a> {
    opcode: u8,
    id: u8,
    data: &'a [u8],
}

impl<'a> InnerPacket<'a> {
    fn parse(buf: &'a [u8]) -> Result<Self, EngineError> {
        if buf.len() < 4 {
            return Err(EngineError::new(Where::EapMsChapV2, Result_::ErrParsingFailed));
        }
        let declared = get_u16(&buf[2..4]) as usize;
        if declared != buf.len() {
            return Err(EngineError::new(Where::EapMsChapV2, Result_::ErrParsingFailed));
        }
        Ok(Self {
            opcode: buf[0],
            id: buf[1],
            data: &buf[4..],
        })
    }
}

fn write_inner(opcode: u8, id: u8, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + data.len());
    out.push(opcode);
    out.push(id);
    let mut len_bytes = [0u8; 2];
    put_u16(&mut len_bytes, (4 + data.len()) as u16);
    out.extend_from_slice(&len_bytes);
    out.extend_from_slice(data);
    out
}

/// The 49-byte MS-CHAPv2 Response value plus its 1-byte Value-Size prefix,
/// as carried in an inner Response packet's data.
fn build_response_inner_data(peer_challenge: &[u8; 16], nt_response: &[u8; 24], username: &str) -> Vec<u8> {
    let mut value = vec![49u8];
    value.extend_from_slice(peer_challenge);
    value.extend_from_slice(&[0u8; 8]);
    value.extend_from_slice(nt_response);
    value.push(0); // flags
    value.extend_from_slice(username.as_bytes());
    value
}

fn build_eap_frame(code: u8, id: u8, eap_type: u8, type_data: &[u8]) -> ControlFrame {
    let mut data = Vec::with_capacity(1 + type_data.len());
    data.push(eap_type);
    data.extend_from_slice(type_data);
    ControlFrame::new(code, id, data)
}

async fn recv(
    session: &Session,
    mailbox: &mut mpsc::Receiver<ControlFrame>,
) -> Result<ControlFrame, EngineError> {
    timeout(session.config.ppp.auth_timeout, mailbox.recv())
        .await
        .map_err(|_| EngineError::new(Where::EapMsChapV2, Result_::ErrTimeout))?
        .ok_or_else(|| EngineError::new(Where::EapMsChapV2, Result_::ErrUnexpectedMessage))
}

/// Runs the EAP-MSCHAPv2 exchange to completion, populating
/// `session.negotiated.hlak` on success.
pub async fn run(
    session: &Session,
    mailbox: &mut mpsc::Receiver<ControlFrame>,
    writer: &TransportWriter,
) -> Result<(), EngineError> {
    let identity_request = recv(session, mailbox).await?;
    if identity_request.code != CODE_REQUEST || identity_request.data.first() != Some(&EAP_TYPE_IDENTITY) {
        return Err(EngineError::new(Where::EapMsChapV2, Result_::ErrUnexpectedMessage));
    }
    let username = session.config.ppp.username.clone();
    let identity_response = build_eap_frame(CODE_RESPONSE, identity_request.id, EAP_TYPE_IDENTITY, username.as_bytes());
    send_ppp_frame(writer, PppProtocol::Eap, &identity_response).await?;

    let challenge_request = recv(session, mailbox).await?;
    if challenge_request.code != CODE_REQUEST || challenge_request.data.first() != Some(&EAP_TYPE_MSCHAPV2) {
        return Err(EngineError::new(Where::EapMsChapV2, Result_::ErrUnexpectedMessage));
    }
    let challenge_inner = InnerPacket::parse(&challenge_request.data[1..])?;
    if challenge_inner.opcode != OP_CHALLENGE || challenge_inner.data.len() < 17 {
        return Err(EngineError::new(Where::EapMsChapV2, Result_::ErrParsingFailed));
    }
    let mut auth_challenge = [0u8; 16];
    auth_challenge.copy_from_slice(&challenge_inner.data[1..17]);

    let mut peer_challenge = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut peer_challenge);

    let password_hash = mschap::nt_password_hash(&session.config.ppp.password);
    let challenge_hash = mschap::challenge_hash(&peer_challenge, &auth_challenge, &username);
    let nt_response = mschap::nt_response(&password_hash, &challenge_hash);

    let response_inner = write_inner(
        OP_RESPONSE,
        challenge_inner.id,
        &build_response_inner_data(&peer_challenge, &nt_response, &username),
    );
    let response_frame = build_eap_frame(CODE_RESPONSE, challenge_request.id, EAP_TYPE_MSCHAPV2, &response_inner);
    send_ppp_frame(writer, PppProtocol::Eap, &response_frame).await?;

    let success_request = recv(session, mailbox).await?;
    if success_request.code != CODE_REQUEST || success_request.data.first() != Some(&EAP_TYPE_MSCHAPV2) {
        return Err(EngineError::new(Where::EapMsChapV2, Result_::ErrUnexpectedMessage));
    }
    let success_inner = InnerPacket::parse(&success_request.data[1..])?;
    match success_inner.opcode {
        OP_SUCCESS => {
            let expected = mschap::authenticator_response(&password_hash, &nt_response, &challenge_hash);
            let expected_hex: String = expected.iter().map(|b| format!("{b:02X}")).collect();
            let message = std::str::from_utf8(success_inner.data).unwrap_or("");
            if !message.contains(&expected_hex) {
                return Err(EngineError::new(Where::EapMsChapV2, Result_::ErrVerificationFailed));
            }

            let ack_inner = write_inner(OP_SUCCESS, success_inner.id, &[]);
            let ack_frame = build_eap_frame(CODE_RESPONSE, success_request.id, EAP_TYPE_MSCHAPV2, &ack_inner);
            send_ppp_frame(writer, PppProtocol::Eap, &ack_frame).await?;

            let eap_result = recv(session, mailbox).await?;
            match eap_result.code {
                CODE_SUCCESS => {}
                CODE_FAILURE => return Err(EngineError::new(Where::EapMsChapV2, Result_::ErrAuthenticationFailed)),
                _ => return Err(EngineError::new(Where::EapMsChapV2, Result_::ErrUnexpectedMessage)),
            }

            let hlak = mschap::master_key(&password_hash, &nt_response);
            session.negotiated.lock().await.hlak = Some(hlak);
            Ok(())
        }
        OP_FAILURE => Err(EngineError::new(Where::EapMsChapV2, Result_::ErrAuthenticationFailed)),
        _ => Err(EngineError::new(Where::EapMsChapV2, Result_::ErrUnexpectedMessage)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_packet_roundtrips() {
        let bytes = write_inner(OP_CHALLENGE, 7, &[1, 2, 3]);
        let inner = InnerPacket::parse(&bytes).unwrap();
        assert_eq!(inner.opcode, OP_CHALLENGE);
        assert_eq!(inner.id, 7);
        assert_eq!(inner.data, &[1, 2, 3]);
    }

    #[test]
    fn response_inner_data_has_value_size_prefix() {
        let peer_challenge = [0x11; 16];
        let nt_response = [0x22; 24];
        let data = build_response_inner_data(&peer_challenge, &nt_response, "alice");
        assert_eq!(data[0], 49);
        assert_eq!(&data[1..17], &peer_challenge);
        assert_eq!(&data[25..49], &nt_response);
        assert_eq!(data[49], 0);
        assert_eq!(&data[50..], b"alice");
    }

    #[test]
    fn eap_frame_prefixes_type_byte() {
        let frame = build_eap_frame(CODE_RESPONSE, 3, EAP_TYPE_IDENTITY, b"bob");
        assert_eq!(frame.code, CODE_RESPONSE);
        assert_eq!(frame.id, 3);
        assert_eq!(frame.data[0], EAP_TYPE_IDENTITY);
        assert_eq!(&frame.data[1..], b"bob");
    }
}
