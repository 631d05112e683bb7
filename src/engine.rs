//! The Engine (spec.md §4.9): orchestrates every other component through
//! the strict phase ordering of spec.md §4.9, owns the session's negotiated
//! state, and is the sole authority that decides when to tear the tunnel
//! down. `Engine::run` is the crate's single public entry point once a
//! [`Config`] and the three external collaborators are in hand.

use crate::auth::{run_eap_mschapv2, run_mschapv2, run_pap};
use crate::codec::ppp::{ControlFrame, PppProtocol, UnrecognizedFrame};
use crate::codec::sstp::{Attribute, ControlPacket, SstpMessageType, SstpPacket};
use crate::config::{AuthProtocol, Config, PRIVATE_IPV4_RANGES, PRIVATE_IPV6_RANGES};
use crate::demux::{self, DemuxRouter};
use crate::error::{EngineError, Result_, TransportError, Where};
use crate::external::{ReportChannel, Reporter, TrustStore, TunDevice, TunReader, TunWriter};
use crate::mux;
use crate::ppp::control as ppp_control;
use crate::ppp::ipcp::IpcpPolicy;
use crate::ppp::ipv6cp::Ipv6cpPolicy;
use crate::ppp::lcp::LcpPolicy;
use crate::ppp::run_negotiator;
use crate::session::Session;
use crate::sstp::{build_crypto_binding, control as sstp_control};
use crate::transport::{self, TransportWriter};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// Forwards tun writes to whatever real [`TunWriter`] the Engine has
/// installed so far, dropping them until then. The demultiplexer (spec.md
/// §4.3) starts before the tun device is established (phase 6 of spec.md
/// §4.9 runs after LCP/Auth/IPCP/IPv6CP), so it needs a writer handle from
/// the start even though the real one only exists once phase 6 completes.
struct SharedTunWriter(Arc<Mutex<Option<Box<dyn TunWriter>>>>);

#[async_trait]
impl TunWriter for SharedTunWriter {
    async fn write(&mut self, buf: &[u8]) -> Result<(), crate::error::TunError> {
        match self.0.lock().await.as_mut() {
            Some(writer) => writer.write(buf).await,
            None => Ok(()),
        }
    }
}

/// Everything the Engine needs beyond the immutable [`Config`] (spec.md §6).
pub struct Collaborators {
    pub tun: Arc<dyn TunDevice>,
    pub trust_store: Option<Arc<dyn TrustStore>>,
    pub reporter: Arc<dyn Reporter>,
}

pub struct Engine;

impl Engine {
    /// Drives a single tunnel attempt from a cold TCP connect through
    /// steady-state packet pumping until a terminal condition is reached,
    /// then tears everything down and returns that condition. Never
    /// returns early: reconnection policy is the host's decision, not this
    /// crate's (spec.md §1 Non-goals).
    #[instrument(skip_all, fields(host = %config.hostname, port = config.port))]
    pub async fn run(config: Config, collaborators: Collaborators) -> EngineError {
        Self::run_inner(config, collaborators).await
    }

    async fn run_inner(config: Config, collaborators: Collaborators) -> EngineError {
        let Collaborators {
            tun,
            trust_store,
            reporter,
        } = collaborators;

        // spec.md §3: "guid — random UUID string, set at engine start". Generated
        // once, here, so the value put on the wire in SSTP_DUPLEX_POST's
        // SSTPCORRELATIONID header (spec.md §4.2) matches `negotiated.guid`.
        let guid = uuid::Uuid::new_v4().to_string();

        // --- Phase 1: TLS transport + SSTP_DUPLEX_POST upgrade (spec.md §4.2) ---
        let (reader, writer, leaf_cert) = match transport::connect(&config, trust_store.as_deref(), &guid).await {
            Ok(parts) => parts,
            Err(err) => return map_transport_error(err, &reporter),
        };

        let session = Session::new(Arc::new(config), guid);
        let router = DemuxRouter::new();
        let shared_tun_writer: Arc<Mutex<Option<Box<dyn TunWriter>>>> = Arc::new(Mutex::new(None));
        let sstp_rx_holder = Arc::new(Mutex::new(router.open_sstp_mailbox().await));

        let (ctrl_tx, mut ctrl_rx) = mpsc::channel::<EngineError>(8);
        let mut background: Vec<JoinHandle<()>> = Vec::new();

        background.push(spawn_demux(
            reader,
            Arc::clone(&session),
            router.clone(),
            Arc::clone(&writer),
            Arc::clone(&shared_tun_writer),
            ctrl_tx.clone(),
        ));

        // Raced against `ctrl_rx` for the whole of phases 2-6: the demux task
        // (spec.md §5, "engine start -> teardown") can report a terminal
        // error (TLS read failure, malformed packet, echo-timer expiry) at
        // any point, including while a negotiator is still waiting on its
        // own mailbox, and that must trigger teardown immediately rather
        // than waiting for the in-progress phase to time out on its own.
        let negotiation = tokio::select! {
            result = Self::negotiate(&session, &router, &writer, &sstp_rx_holder, &*tun, &shared_tun_writer) => result,
            maybe_err = ctrl_rx.recv() => {
                Err(maybe_err.unwrap_or_else(|| EngineError::new(Where::Engine, Result_::ErrUnexpectedMessage)))
            }
        };

        let err = match negotiation {
            Ok(tun_reader) => {
                Self::spawn_steady_state(
                    &session,
                    &router,
                    &writer,
                    &sstp_rx_holder,
                    &leaf_cert,
                    tun_reader,
                    &ctrl_tx,
                    &mut background,
                )
                .await;
                // Steady state: wait for the first terminal error from any
                // background task (spec.md §4.9, "controlMessages").
                match ctrl_rx.recv().await {
                    Some(err) => err,
                    None => EngineError::new(Where::Engine, Result_::ErrUnexpectedMessage),
                }
            }
            Err(err) => err,
        };

        warn!(?err, "tearing down tunnel");
        reporter.notify(ReportChannel::Error, &err.to_string(), None);
        Self::teardown(&writer, background).await;

        err
    }

    /// Phases 2 through 6 of spec.md §4.9: the SSTP call-connect request,
    /// LCP, authentication (dispatched by the protocol LCP negotiated),
    /// IPCP and IPv6CP in parallel, and finally tun device setup. Returns
    /// the tun device's read half, which the caller hands to the outgoing
    /// multiplexer once `Call-Connected` has been sent.
    async fn negotiate(
        session: &Arc<Session>,
        router: &DemuxRouter,
        writer: &Arc<TransportWriter>,
        sstp_rx_holder: &Arc<Mutex<mpsc::Receiver<ControlPacket>>>,
        tun: &dyn TunDevice,
        shared_tun_writer: &Arc<Mutex<Option<Box<dyn TunWriter>>>>,
    ) -> Result<Box<dyn TunReader>, EngineError> {
        {
            let mut sstp_rx = sstp_rx_holder.lock().await;
            sstp_control::run_request(session, &mut sstp_rx, writer).await?;
        }

        let mut lcp_rx = router.open_ppp_mailbox(PppProtocol::Lcp).await;
        run_negotiator(&LcpPolicy::new(), session, &mut lcp_rx, writer).await?;
        router.close_ppp_mailbox(PppProtocol::Lcp).await;

        Self::authenticate(session, router, writer).await?;

        let ipv4_enabled = session.config.ppp.ipv4_enabled;
        let ipv6_enabled = session.config.ppp.ipv6_enabled;

        let mut ipcp_rx = if ipv4_enabled {
            Some(router.open_ppp_mailbox(PppProtocol::Ipcp).await)
        } else {
            None
        };
        let mut ipv6cp_rx = if ipv6_enabled {
            Some(router.open_ppp_mailbox(PppProtocol::Ipv6cp).await)
        } else {
            None
        };

        let ipcp_policy = IpcpPolicy::new();
        let ipv6cp_policy = Ipv6cpPolicy::new();
        let (ipcp_result, ipv6cp_result) = tokio::join!(
            async {
                match &mut ipcp_rx {
                    Some(rx) => run_negotiator(&ipcp_policy, session, rx, writer).await,
                    None => Ok(()),
                }
            },
            async {
                match &mut ipv6cp_rx {
                    Some(rx) => run_negotiator(&ipv6cp_policy, session, rx, writer).await,
                    None => Ok(()),
                }
            },
        );
        if ipv4_enabled {
            router.close_ppp_mailbox(PppProtocol::Ipcp).await;
        }
        if ipv6_enabled {
            router.close_ppp_mailbox(PppProtocol::Ipv6cp).await;
        }
        ipcp_result?;
        ipv6cp_result?;

        let (tun_reader, tun_writer) = Self::setup_tun(session, tun).await?;
        *shared_tun_writer.lock().await = Some(tun_writer);

        Ok(tun_reader)
    }

    /// Dispatches to whichever authenticator LCP negotiated as
    /// `current_auth` (spec.md §4.7).
    async fn authenticate(
        session: &Arc<Session>,
        router: &DemuxRouter,
        writer: &Arc<TransportWriter>,
    ) -> Result<(), EngineError> {
        let current_auth = session.negotiated.lock().await.current_auth;
        match current_auth {
            Some(AuthProtocol::Pap) => {
                let mut mailbox = router.open_ppp_mailbox(PppProtocol::Pap).await;
                let result = run_pap(session, &mut mailbox, writer).await;
                router.close_ppp_mailbox(PppProtocol::Pap).await;
                result
            }
            Some(AuthProtocol::MsChapV2) => {
                let mut mailbox = router.open_ppp_mailbox(PppProtocol::Chap).await;
                let result = run_mschapv2(session, &mut mailbox, writer).await;
                router.close_ppp_mailbox(PppProtocol::Chap).await;
                result
            }
            Some(AuthProtocol::EapMsChapV2) => {
                let mut mailbox = router.open_ppp_mailbox(PppProtocol::Eap).await;
                let result = run_eap_mschapv2(session, &mut mailbox, writer).await;
                router.close_ppp_mailbox(PppProtocol::Eap).await;
                result
            }
            None => Err(EngineError::new(Where::Lcp, Result_::ErrAuthenticationFailed)),
        }
    }

    /// Configures the tun device per the negotiated addresses and the
    /// route/DNS/app-rule config, then brings it up (spec.md §4.9 phase 6,
    /// §6).
    async fn setup_tun(
        session: &Arc<Session>,
        tun: &dyn TunDevice,
    ) -> Result<(Box<dyn TunReader>, Box<dyn TunWriter>), EngineError> {
        let negotiated = session.negotiated.lock().await.clone();
        let config = &session.config;

        if config.ppp.ipv4_enabled {
            if negotiated.current_ipv4 == [0, 0, 0, 0] {
                return Err(EngineError::new(Where::Tun, Result_::ErrInvalidAddress));
            }
            tun.add_address(IpAddr::V4(Ipv4Addr::from(negotiated.current_ipv4)), 32)
                .await
                .map_err(|_| EngineError::new(Where::Tun, Result_::ErrInvalidAddress))?;
        }
        if config.ppp.ipv6_enabled {
            if negotiated.current_ipv6 == [0; 8] {
                return Err(EngineError::new(Where::Tun, Result_::ErrInvalidAddress));
            }
            let mut segments = [0u8; 16];
            segments[0] = 0xfe;
            segments[1] = 0x80;
            segments[8..16].copy_from_slice(&negotiated.current_ipv6);
            tun.add_address(IpAddr::V6(Ipv6Addr::from(segments)), 64)
                .await
                .map_err(|_| EngineError::new(Where::Tun, Result_::ErrInvalidAddress))?;
        }

        if config.dns.use_custom_server {
            if let Some(dns) = config.dns.custom_address {
                tun.add_dns_server(IpAddr::V4(dns))
                    .await
                    .map_err(|_| EngineError::new(Where::Route, Result_::ErrParsingFailed))?;
            }
        } else if config.dns.request_address && negotiated.current_proposed_dns != [0; 4] {
            tun.add_dns_server(IpAddr::V4(Ipv4Addr::from(negotiated.current_proposed_dns)))
                .await
                .map_err(|_| EngineError::new(Where::Route, Result_::ErrParsingFailed))?;
        }

        if config.route.add_custom_routes {
            for line in config.route.custom_routes.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let cidr: ipnet::IpNet = line
                    .parse()
                    .map_err(|_| EngineError::new(Where::Route, Result_::ErrParsingFailed))?;
                tun.add_route(cidr)
                    .await
                    .map_err(|_| EngineError::new(Where::Route, Result_::ErrParsingFailed))?;
            }
        }

        if config.route.add_default_route {
            if config.ppp.ipv4_enabled {
                add_route_literal(tun, "0.0.0.0/0").await?;
            }
            if config.ppp.ipv6_enabled {
                add_route_literal(tun, "::/0").await?;
            }
        }

        if config.route.route_private_addresses {
            if config.ppp.ipv4_enabled {
                for cidr in PRIVATE_IPV4_RANGES {
                    add_route_literal(tun, cidr).await?;
                }
            }
            if config.ppp.ipv6_enabled {
                for cidr in PRIVATE_IPV6_RANGES {
                    add_route_literal(tun, cidr).await?;
                }
            }
        }

        if config.route.enable_app_based_rule {
            for app in &config.route.allowed_applications {
                tun.add_allowed_application(app)
                    .await
                    .map_err(|_| EngineError::new(Where::Route, Result_::ErrParsingFailed))?;
            }
        }

        tun.set_mtu(negotiated.current_mru)
            .await
            .map_err(|_| EngineError::new(Where::Tun, Result_::ErrInvalidAddress))?;

        tun.establish()
            .await
            .map_err(|_| EngineError::new(Where::Tun, Result_::ErrInvalidAddress))
    }

    /// Phase 7/8 of spec.md §4.9: send `Call-Connected` with the
    /// crypto-binding, then spawn the three steady-state tasks (PPP-control,
    /// SSTP-control, outgoing multiplexer) and keep them running for the
    /// life of the tunnel. Any failure here (including the Call-Connected
    /// send itself) is reported on `ctrl_tx` exactly like the other
    /// background tasks, so the caller's single `ctrl_rx.recv()` still sees
    /// it.
    #[allow(clippy::too_many_arguments)]
    async fn spawn_steady_state(
        session: &Arc<Session>,
        router: &DemuxRouter,
        writer: &Arc<TransportWriter>,
        sstp_rx_holder: &Arc<Mutex<mpsc::Receiver<ControlPacket>>>,
        leaf_cert: &[u8],
        tun_reader: Box<dyn TunReader>,
        ctrl_tx: &mpsc::Sender<EngineError>,
        background: &mut Vec<JoinHandle<()>>,
    ) {
        if let Err(err) = Self::send_call_connected(session, writer, leaf_cert).await {
            let _ = ctrl_tx.send(err).await;
            return;
        }

        let lcp_rx = router.open_ppp_mailbox(PppProtocol::Lcp).await;
        let reject_rx = router.open_protocol_reject_mailbox().await;
        background.push(spawn_ppp_control(
            lcp_rx,
            reject_rx,
            Arc::clone(session),
            Arc::clone(writer),
            ctrl_tx.clone(),
        ));
        background.push(spawn_sstp_control(
            Arc::clone(sstp_rx_holder),
            Arc::clone(writer),
            ctrl_tx.clone(),
        ));
        background.push(spawn_mux(tun_reader, Arc::clone(writer), Arc::clone(session), ctrl_tx.clone()));

        info!(guid = %session.negotiated.lock().await.guid, "tunnel established");
    }

    async fn send_call_connected(
        session: &Session,
        writer: &TransportWriter,
        leaf_cert: &[u8],
    ) -> Result<(), EngineError> {
        let negotiated = session.negotiated.lock().await.clone();
        let crypto_binding = build_crypto_binding(
            negotiated.hlak.as_ref(),
            negotiated.nonce,
            leaf_cert,
            negotiated.hash_is_sha256,
        );
        let packet = SstpPacket::Control(ControlPacket::new(
            SstpMessageType::CallConnected,
            vec![Attribute::CryptoBinding(crypto_binding)],
        ));
        writer
            .send(&packet.to_vec())
            .await
            .map_err(|_| EngineError::new(Where::SstpControl, Result_::ErrUnexpectedMessage))
    }

    async fn teardown(writer: &Arc<TransportWriter>, background: Vec<JoinHandle<()>>) {
        let disconnect = SstpPacket::Control(ControlPacket::new(SstpMessageType::CallDisconnect, vec![]));
        let _ = writer.send(&disconnect.to_vec()).await;
        let abort = SstpPacket::Control(ControlPacket::new(SstpMessageType::CallAbort, vec![]));
        let _ = writer.send(&abort.to_vec()).await;

        for handle in background {
            handle.abort();
        }
    }
}

async fn add_route_literal(tun: &dyn TunDevice, cidr: &str) -> Result<(), EngineError> {
    let net: ipnet::IpNet = cidr.parse().expect("literal CIDR is always valid");
    tun.add_route(net)
        .await
        .map_err(|_| EngineError::new(Where::Route, Result_::ErrParsingFailed))
}

fn spawn_demux(
    reader: transport::TransportReader,
    session: Arc<Session>,
    router: DemuxRouter,
    writer: Arc<TransportWriter>,
    shared_tun_writer: Arc<Mutex<Option<Box<dyn TunWriter>>>>,
    ctrl_tx: mpsc::Sender<EngineError>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let tun_writer: Box<dyn TunWriter> = Box::new(SharedTunWriter(shared_tun_writer));
        if let Err(err) = demux::run(reader, session, router, writer, tun_writer).await {
            let _ = ctrl_tx.send(err).await;
        }
    })
}

fn spawn_ppp_control(
    mut mailbox: mpsc::Receiver<ControlFrame>,
    mut reject_mailbox: mpsc::Receiver<UnrecognizedFrame>,
    session: Arc<Session>,
    writer: Arc<TransportWriter>,
    ctrl_tx: mpsc::Sender<EngineError>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = ppp_control::run(&mut mailbox, &mut reject_mailbox, &session, &writer).await {
            let _ = ctrl_tx.send(err).await;
        }
    })
}

fn spawn_sstp_control(
    mailbox_holder: Arc<Mutex<mpsc::Receiver<ControlPacket>>>,
    writer: Arc<TransportWriter>,
    ctrl_tx: mpsc::Sender<EngineError>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut mailbox = mailbox_holder.lock().await;
        if let Err(err) = sstp_control::run_control(&mut mailbox, &writer).await {
            let _ = ctrl_tx.send(err).await;
        }
    })
}

fn spawn_mux(
    tun_reader: Box<dyn TunReader>,
    writer: Arc<TransportWriter>,
    session: Arc<Session>,
    ctrl_tx: mpsc::Sender<EngineError>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = mux::run(tun_reader, writer, session).await {
            let _ = ctrl_tx.send(err).await;
        }
    })
}

/// Maps a failure from the transport layer (spec.md §4.2) onto the
/// `(Where, Result_)` vocabulary, notifying the `Reporter` of an untrusted
/// leaf certificate where spec.md §7 calls for it.
fn map_transport_error(err: TransportError, reporter: &Arc<dyn Reporter>) -> EngineError {
    match err {
        TransportError::ProxyRejected(403) => EngineError::new(Where::Proxy, Result_::ErrAuthenticationFailed),
        TransportError::ProxyRejected(_) => EngineError::new(Where::Proxy, Result_::ErrUnexpectedMessage),
        TransportError::DuplexPostRejected(_) => {
            EngineError::new(Where::SstpDuplexPost, Result_::ErrUnexpectedMessage)
        }
        TransportError::CertificateUntrusted(leaf) => {
            let encoded = leaf.iter().map(|b| format!("{b:02x}")).collect::<String>();
            reporter.notify(ReportChannel::Certificate, &encoded, None);
            EngineError::new(Where::Tls, Result_::ErrVerificationFailed)
        }
        TransportError::Tls(_) => EngineError::new(Where::Tls, Result_::ErrVerificationFailed),
        TransportError::Io(_) => EngineError::new(Where::Tls, Result_::ErrUnexpectedMessage),
        TransportError::MalformedHttp => EngineError::new(Where::SstpDuplexPost, Result_::ErrUnexpectedMessage),
        TransportError::Parse(_) => EngineError::new(Where::SstpControl, Result_::ErrParsingFailed),
    }
}
