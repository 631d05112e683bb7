//! The two SSTP control sub-tasks of spec.md §4.8: the request task that
//! runs once, before anything else, to establish the call; and the control
//! task that then runs for the life of the tunnel on the same mailbox.

use crate::codec::sstp::{Attribute, ControlPacket, SstpMessageType, SstpPacket};
use crate::error::{EngineError, Result_, Where};
use crate::session::Session;
use crate::transport::TransportWriter;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// Up to three attempts, 60 s apart (spec.md §4.8 item 1).
const REQUEST_ATTEMPTS: u32 = 3;
const REQUEST_INTERVAL: Duration = Duration::from_secs(60);

async fn send_control(
    writer: &TransportWriter,
    message_type: SstpMessageType,
    attributes: Vec<Attribute>,
) -> Result<(), EngineError> {
    let packet = SstpPacket::Control(ControlPacket::new(message_type, attributes));
    writer
        .send(&packet.to_vec())
        .await
        .map_err(|_| EngineError::new(Where::SstpControl, Result_::ErrUnexpectedMessage))
}

/// Runs the `Call-Connect-Request` exchange to completion: on
/// `Call-Connect-Ack`, stores the server's nonce and chosen hash protocol
/// into `session.negotiated` and returns `Ok(())`; any other reply, or
/// running out of attempts, is a terminal error (spec.md §4.8 item 1).
pub async fn run_request(
    session: &Session,
    mailbox: &mut mpsc::Receiver<ControlPacket>,
    writer: &TransportWriter,
) -> Result<(), EngineError> {
    for attempt in 0..REQUEST_ATTEMPTS {
        send_control(
            writer,
            SstpMessageType::CallConnectRequest,
            vec![Attribute::EncapsulatedProtocolId(1)],
        )
        .await?;

        let reply = match timeout(REQUEST_INTERVAL, mailbox.recv()).await {
            Ok(Some(packet)) => packet,
            Ok(None) => return Err(EngineError::new(Where::SstpControl, Result_::ErrUnexpectedMessage)),
            Err(_elapsed) => {
                if attempt + 1 == REQUEST_ATTEMPTS {
                    return Err(EngineError::new(Where::SstpControl, Result_::ErrTimeout));
                }
                continue;
            }
        };

        return match reply.message_type {
            SstpMessageType::CallConnectAck => accept_connect_ack(session, &reply).await,
            SstpMessageType::CallConnectNak => {
                Err(EngineError::new(Where::SstpControl, Result_::ErrNegativeAcknowledged))
            }
            SstpMessageType::CallDisconnect => {
                Err(EngineError::new(Where::SstpControl, Result_::ErrDisconnectRequested))
            }
            SstpMessageType::CallAbort => Err(EngineError::new(Where::SstpControl, Result_::ErrAbortRequested)),
            _ => Err(EngineError::new(Where::SstpControl, Result_::ErrUnexpectedMessage)),
        };
    }
    Err(EngineError::new(Where::SstpControl, Result_::ErrTimeout))
}

async fn accept_connect_ack(session: &Session, reply: &ControlPacket) -> Result<(), EngineError> {
    let crypto_request = reply.attributes.iter().find_map(|a| match a {
        Attribute::CryptoBindingRequest(body) => Some(*body),
        _ => None,
    });
    let Some(crypto_request) = crypto_request else {
        return Err(EngineError::new(Where::SstpControl, Result_::ErrUnexpectedMessage));
    };
    // spec.md §4.8: bitmask value 2 or 3 selects SHA-256, 1 selects SHA-1,
    // anything else is unrecognised.
    let hash_is_sha256 = match crypto_request.hash_protocol_bitmask {
        2 | 3 => true,
        1 => false,
        _ => return Err(EngineError::new(Where::SstpControl, Result_::ErrUnknownType)),
    };
    let mut negotiated = session.negotiated.lock().await;
    negotiated.nonce = crypto_request.nonce;
    negotiated.hash_is_sha256 = hash_is_sha256;
    Ok(())
}

/// Runs for the lifetime of an established call (spec.md §4.8 item 2):
/// answers `Echo-Request`, ignores `Echo-Response`, and turns
/// `Call-Disconnect`/`Call-Abort` into the matching terminal error. Returns
/// `Ok(())` only if the mailbox is closed out from under it (the Engine
/// cancelling this task on teardown), matching the demultiplexer's own
/// convention.
pub async fn run_control(
    mailbox: &mut mpsc::Receiver<ControlPacket>,
    writer: &TransportWriter,
) -> Result<(), EngineError> {
    while let Some(packet) = mailbox.recv().await {
        match packet.message_type {
            SstpMessageType::EchoRequest => {
                send_control(writer, SstpMessageType::EchoResponse, vec![]).await?;
            }
            SstpMessageType::EchoResponse => {}
            SstpMessageType::CallDisconnect => {
                return Err(EngineError::new(Where::SstpControl, Result_::ErrDisconnectRequested));
            }
            SstpMessageType::CallAbort => {
                return Err(EngineError::new(Where::SstpControl, Result_::ErrAbortRequested));
            }
            _ => return Err(EngineError::new(Where::SstpControl, Result_::ErrUnexpectedMessage)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::sstp::CryptoBindingRequestBody;
    use crate::config::{AuthProtocol, Config, DnsConfig, PppConfig, ReconnectionConfig, RouteConfig, TlsConfig};
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    fn test_session() -> Arc<Session> {
        Session::new(Arc::new(Config {
            hostname: "vpn.example.com".into(),
            port: 443,
            proxy: None,
            tls: TlsConfig { verify_host: true, ..Default::default() },
            ppp: PppConfig {
                username: "user".into(),
                password: "pass".into(),
                mru: 1500,
                mtu: 1500,
                auth_protocols: vec![AuthProtocol::Pap],
                auth_timeout: StdDuration::from_secs(30),
                ipv4_enabled: true,
                ipv6_enabled: false,
                request_static_ipv4: false,
                static_ipv4: None,
            },
            dns: DnsConfig::default(),
            route: RouteConfig::default(),
            reconnection: ReconnectionConfig::default(),
        }), "test-guid".into())
    }

    #[tokio::test]
    async fn connect_ack_with_bitmask_three_prefers_sha256() {
        let session = test_session();
        let reply = ControlPacket::new(
            SstpMessageType::CallConnectAck,
            vec![Attribute::CryptoBindingRequest(CryptoBindingRequestBody {
                hash_protocol_bitmask: 3,
                nonce: [9; 32],
            })],
        );
        accept_connect_ack(&session, &reply).await.unwrap();
        let negotiated = session.negotiated.lock().await;
        assert!(negotiated.hash_is_sha256);
        assert_eq!(negotiated.nonce, [9; 32]);
    }

    #[tokio::test]
    async fn connect_ack_with_bitmask_one_selects_sha1() {
        let session = test_session();
        let reply = ControlPacket::new(
            SstpMessageType::CallConnectAck,
            vec![Attribute::CryptoBindingRequest(CryptoBindingRequestBody {
                hash_protocol_bitmask: 1,
                nonce: [1; 32],
            })],
        );
        accept_connect_ack(&session, &reply).await.unwrap();
        assert!(!session.negotiated.lock().await.hash_is_sha256);
    }

    #[tokio::test]
    async fn connect_ack_without_crypto_binding_request_is_unexpected() {
        let session = test_session();
        let reply = ControlPacket::new(SstpMessageType::CallConnectAck, vec![]);
        let err = accept_connect_ack(&session, &reply).await.unwrap_err();
        assert_eq!(err.result, Result_::ErrUnexpectedMessage);
    }
}
