//! The outgoing multiplexer (spec.md §4.4): reads L3 datagrams off the tun
//! device and wraps each as an SSTP DATA packet carrying a PPP HDLC frame.
//!
//! spec.md §9 notes that the original design coalesces writes through two
//! alternating MTU-sized buffers handed off over a zero-capacity channel,
//! and explicitly allows the equivalent single-bounded-queue shape instead
//! of reproducing that wrinkle — this is that simpler shape: one read
//! buffer, one send per datagram, serialised through the transport's own
//! send-mutex (spec.md §5).

use crate::codec::ppp::{PppProtocol, HDLC_HEADER};
use crate::codec::sstp::SstpPacket;
use crate::error::{EngineError, Result_, Where};
use crate::external::TunReader;
use crate::session::Session;
use crate::transport::TransportWriter;
use std::sync::Arc;
use tracing::warn;

/// Comfortably above any negotiable MRU/MTU (spec.md §6: `[68, 2000]`).
const READ_BUF_LEN: usize = 2048;

/// Runs until the tun device errors or the task is cancelled at teardown.
pub async fn run(
    mut tun_reader: Box<dyn TunReader>,
    writer: Arc<TransportWriter>,
    session: Arc<Session>,
) -> Result<(), EngineError> {
    let mut buf = vec![0u8; READ_BUF_LEN];
    loop {
        let n = tun_reader
            .read(&mut buf)
            .await
            .map_err(|_| EngineError::new(Where::Tun, Result_::ErrUnexpectedMessage))?;
        if n == 0 {
            continue;
        }
        let datagram = &buf[..n];

        let protocol = match datagram[0] >> 4 {
            4 => PppProtocol::Ipv4,
            6 => PppProtocol::Ipv6,
            other => {
                // spec.md §4.4: reported, then dropped — not fatal to the
                // pump as a whole.
                warn!(ip_version = other, "dropping outgoing datagram of unrecognised IP version");
                continue;
            }
        };

        let enabled = match protocol {
            PppProtocol::Ipv4 => session.config.ppp.ipv4_enabled,
            PppProtocol::Ipv6 => session.config.ppp.ipv6_enabled,
            _ => false,
        };
        if !enabled {
            continue;
        }

        let mut body = Vec::with_capacity(4 + datagram.len());
        body.extend_from_slice(&HDLC_HEADER);
        body.extend_from_slice(&protocol.code().to_be_bytes());
        body.extend_from_slice(datagram);

        let packet = SstpPacket::Data(body);
        writer
            .send(&packet.to_vec())
            .await
            .map_err(|_| EngineError::new(Where::Tun, Result_::ErrUnexpectedMessage))?;
    }
}
