//! The incoming demultiplexer (spec.md §4.3): delimits SSTP packets off the
//! TLS byte stream, ticks the per-layer echo timers, and routes PPP control
//! frames to whichever mailbox currently owns that protocol.

use crate::codec::ppp::{ControlFrame, PppProtocol, UnrecognizedFrame, HDLC_HEADER};
use crate::codec::sstp::{ControlPacket, SstpMessageType, SstpPacket};
use crate::codec::get_u16;
use crate::echo_timer::{EchoTimer, Liveness, ECHO_INTERVAL};
use crate::error::{EngineError, Result_, Where};
use crate::external::TunWriter;
use crate::session::Session;
use crate::transport::{TransportReader, TransportWriter};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

/// Matches spec.md §4.2: "the socket read-timeout becomes 1 second
/// (non-fatal; the demultiplexer tolerates timeouts)".
const READ_TIMEOUT: Duration = Duration::from_secs(1);

const MAILBOX_CAPACITY: usize = 16;
/// Declared SSTP packet lengths above this are rejected outright; well
/// beyond any real MRU/MTU, it only guards against a hostile/garbled length
/// field forcing unbounded buffering.
const MAX_PACKET_LEN: usize = 64 * 1024;

#[derive(Default)]
struct RoutingTable {
    ppp: HashMap<PppProtocol, mpsc::Sender<ControlFrame>>,
    sstp_control: Option<mpsc::Sender<ControlPacket>>,
    /// Registered only while the PPP-control task (spec.md §4.6) is alive:
    /// its presence is exactly the "registered handler" spec.md §4.3 step 4
    /// asks about for an unrecognized PPP protocol number.
    protocol_reject: Option<mpsc::Sender<UnrecognizedFrame>>,
}

/// Handle the Engine uses to open/close mailboxes as phases change, shared
/// with the running demultiplexer task (spec.md §3, "mailboxes are created
/// by the Engine, registered with the demultiplexer ... unregistered on
/// cancellation").
#[derive(Clone)]
pub struct DemuxRouter {
    table: Arc<Mutex<RoutingTable>>,
}

impl DemuxRouter {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(RoutingTable::default())),
        }
    }

    pub async fn open_ppp_mailbox(&self, protocol: PppProtocol) -> mpsc::Receiver<ControlFrame> {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        self.table.lock().await.ppp.insert(protocol, tx);
        rx
    }

    pub async fn close_ppp_mailbox(&self, protocol: PppProtocol) {
        self.table.lock().await.ppp.remove(&protocol);
    }

    pub async fn open_sstp_mailbox(&self) -> mpsc::Receiver<ControlPacket> {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        self.table.lock().await.sstp_control = Some(tx);
        rx
    }

    pub async fn close_sstp_mailbox(&self) {
        self.table.lock().await.sstp_control = None;
    }

    pub async fn open_protocol_reject_mailbox(&self) -> mpsc::Receiver<UnrecognizedFrame> {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        self.table.lock().await.protocol_reject = Some(tx);
        rx
    }

    pub async fn close_protocol_reject_mailbox(&self) {
        self.table.lock().await.protocol_reject = None;
    }
}

impl Default for DemuxRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs until a terminal [`EngineError`] (including a clean peer-initiated
/// teardown reported through the SSTP-control mailbox's own task, which is
/// reached by returning `Ok(())` only when externally cancelled).
pub async fn run(
    mut reader: TransportReader,
    session: Arc<Session>,
    router: DemuxRouter,
    writer: Arc<TransportWriter>,
    mut tun_writer: Box<dyn TunWriter>,
) -> Result<(), EngineError> {
    let mut buf: Vec<u8> = Vec::new();
    let mut read_buf = vec![0u8; 4096];
    let mut sstp_timer = EchoTimer::new(ECHO_INTERVAL);
    let mut ppp_timer = EchoTimer::new(ECHO_INTERVAL);

    loop {
        while let Some(declared) = next_packet_len(&buf)? {
            if buf.len() < declared {
                break;
            }
            let packet_bytes: Vec<u8> = buf.drain(..declared).collect();
            let packet = SstpPacket::parse(&packet_bytes)
                .map_err(|_| EngineError::new(Where::SstpControl, Result_::ErrParsingFailed))?;
            sstp_timer.tick();
            dispatch(&packet, &session, &router, &mut ppp_timer, &mut tun_writer).await?;
        }

        check_liveness(&mut sstp_timer, &mut ppp_timer, &writer).await?;

        // A 1 s read-timeout (spec.md §4.2) so `check_liveness` keeps
        // running every loop iteration (spec.md §4.3 step 6) even when the
        // server goes quiet; a timeout here is not itself a failure.
        let read = match tokio::time::timeout(READ_TIMEOUT, reader.read(&mut read_buf)).await {
            Ok(result) => result,
            Err(_elapsed) => continue,
        };
        let n = read.map_err(|_| EngineError::new(Where::SstpControl, Result_::ErrUnexpectedMessage))?;
        if n == 0 {
            return Err(EngineError::new(Where::SstpControl, Result_::ErrUnexpectedMessage));
        }
        buf.extend_from_slice(&read_buf[..n]);
    }
}

fn next_packet_len(buf: &[u8]) -> Result<Option<usize>, EngineError> {
    if buf.len() < SstpPacket::HEADER_LEN {
        return Ok(None);
    }
    let header: [u8; 4] = buf[..4].try_into().unwrap();
    let declared = SstpPacket::peek_length(&header)
        .map_err(|_| EngineError::new(Where::SstpControl, Result_::ErrInvalidPacketSize))?;
    if declared > MAX_PACKET_LEN {
        return Err(EngineError::new(Where::SstpControl, Result_::ErrInvalidPacketSize));
    }
    Ok(Some(declared))
}

async fn dispatch(
    packet: &SstpPacket,
    session: &Arc<Session>,
    router: &DemuxRouter,
    ppp_timer: &mut EchoTimer,
    tun_writer: &mut Box<dyn TunWriter>,
) -> Result<(), EngineError> {
    match packet {
        SstpPacket::Data(body) => dispatch_data(body, session, router, ppp_timer, tun_writer).await,
        SstpPacket::Control(control) => {
            let table = router.table.lock().await;
            if let Some(sender) = &table.sstp_control {
                let _ = sender.try_send(control.clone());
            }
            Ok(())
        }
    }
}

async fn dispatch_data(
    body: &[u8],
    session: &Arc<Session>,
    router: &DemuxRouter,
    ppp_timer: &mut EchoTimer,
    tun_writer: &mut Box<dyn TunWriter>,
) -> Result<(), EngineError> {
    if body.len() < 4 || body[0..2] != HDLC_HEADER {
        return Err(EngineError::new(Where::SstpControl, Result_::ErrParsingFailed));
    }
    ppp_timer.tick();
    let protocol_code = get_u16(&body[2..4]);
    let payload = &body[4..];

    let protocol = match PppProtocol::try_from(protocol_code) {
        Ok(p) => p,
        Err(_) => {
            // spec.md §4.3 step 4: only a terminal error if nothing is
            // registered to handle it; otherwise PPP-control answers with
            // a Protocol-Reject and the tunnel stays up.
            let table = router.table.lock().await;
            return match &table.protocol_reject {
                Some(sender) => {
                    let _ = sender.try_send(UnrecognizedFrame {
                        protocol_code,
                        payload: payload.to_vec(),
                    });
                    Ok(())
                }
                None => Err(EngineError::new(Where::SstpControl, Result_::ErrUnknownType)),
            };
        }
    };

    match protocol {
        PppProtocol::Ipv4 => {
            if session.config.ppp.ipv4_enabled {
                let _ = tun_writer.write(payload).await;
            }
            Ok(())
        }
        PppProtocol::Ipv6 => {
            if session.config.ppp.ipv6_enabled {
                let _ = tun_writer.write(payload).await;
            }
            Ok(())
        }
        other => {
            let frame = ControlFrame::try_from(payload)
                .map_err(|_| EngineError::new(Where::SstpControl, Result_::ErrParsingFailed))?;
            let table = router.table.lock().await;
            if let Some(sender) = table.ppp.get(&other) {
                let _ = sender.try_send(frame);
            }
            Ok(())
        }
    }
}

async fn check_liveness(
    sstp_timer: &mut EchoTimer,
    ppp_timer: &mut EchoTimer,
    writer: &Arc<TransportWriter>,
) -> Result<(), EngineError> {
    let now = Instant::now().into_std();
    match sstp_timer.check_alive(now) {
        Liveness::Alive => {}
        Liveness::SendEcho => {
            let packet = SstpPacket::Control(ControlPacket::new(SstpMessageType::EchoRequest, vec![]));
            let _ = writer.send(&packet.to_vec()).await;
        }
        Liveness::Dead => return Err(EngineError::new(Where::SstpControl, Result_::ErrTimeout)),
    }
    match ppp_timer.check_alive(now) {
        Liveness::Alive => {}
        Liveness::SendEcho => {
            let frame = ControlFrame::new(crate::ppp::CODE_ECHO_REQUEST, 0, vec![0, 0, 0, 0]);
            let mut body = Vec::with_capacity(4 + frame.len());
            body.extend_from_slice(&HDLC_HEADER);
            body.extend_from_slice(&PppProtocol::Lcp.code().to_be_bytes());
            frame.write_to(&mut body);
            let packet = SstpPacket::Data(body);
            let _ = writer.send(&packet.to_vec()).await;
        }
        Liveness::Dead => return Err(EngineError::new(Where::Lcp, Result_::ErrTimeout)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::TunError;
    use async_trait::async_trait;

    fn test_session() -> Arc<Session> {
        let config = Config::builder("vpn.example.com", "user", "pass").build();
        Session::new(Arc::new(config), "test-guid".into())
    }

    struct NullTunWriter;

    #[async_trait]
    impl TunWriter for NullTunWriter {
        async fn write(&mut self, _buf: &[u8]) -> Result<(), TunError> {
            Ok(())
        }
    }

    fn unknown_protocol_data_packet() -> Vec<u8> {
        // HDLC header + an unassigned PPP protocol number + a dummy payload.
        let mut body = HDLC_HEADER.to_vec();
        body.extend_from_slice(&0x002Bu16.to_be_bytes());
        body.extend_from_slice(&[1, 2, 3, 4]);
        body
    }

    #[tokio::test]
    async fn unknown_protocol_is_fatal_when_no_protocol_reject_handler_is_registered() {
        let session = test_session();
        let router = DemuxRouter::new();
        let mut ppp_timer = EchoTimer::new(ECHO_INTERVAL);
        let mut tun_writer: Box<dyn TunWriter> = Box::new(NullTunWriter);

        let body = unknown_protocol_data_packet();
        let err = dispatch_data(&body, &session, &router, &mut ppp_timer, &mut tun_writer)
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::new(Where::SstpControl, Result_::ErrUnknownType));
    }

    #[tokio::test]
    async fn unknown_protocol_is_routed_to_the_registered_reject_handler() {
        let session = test_session();
        let router = DemuxRouter::new();
        let mut reject_rx = router.open_protocol_reject_mailbox().await;
        let mut ppp_timer = EchoTimer::new(ECHO_INTERVAL);
        let mut tun_writer: Box<dyn TunWriter> = Box::new(NullTunWriter);

        let body = unknown_protocol_data_packet();
        dispatch_data(&body, &session, &router, &mut ppp_timer, &mut tun_writer)
            .await
            .unwrap();

        let unrecognized = reject_rx.try_recv().expect("forwarded to reject mailbox");
        assert_eq!(unrecognized.protocol_code, 0x002B);
        assert_eq!(unrecognized.payload, vec![1, 2, 3, 4]);
    }
}
