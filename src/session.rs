//! Shared session state (spec.md §3): the immutable [`Config`] plus the
//! mutable `Negotiated` region the Engine owns (written, per invariant 6,
//! only by the Engine or by the single task a field is delegated to for
//! the duration of its phase — e.g. `current_ipv4` by the IPCP negotiator).

use crate::config::{AuthProtocol, Config};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Mutable values negotiated over the lifetime of a tunnel attempt
/// (spec.md §3, `negotiated`).
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub current_mru: u16,
    pub current_auth: Option<AuthProtocol>,
    pub current_ipv4: [u8; 4],
    pub current_ipv6: [u8; 8],
    pub current_proposed_dns: [u8; 4],
    pub hlak: Option<[u8; 16]>,
    pub nonce: [u8; 32],
    /// `true` selects SHA-256 for the crypto-binding hash/HMAC, `false`
    /// selects SHA-1 (spec.md §4.8).
    pub hash_is_sha256: bool,
    pub guid: String,
    pub is_dns_rejected: bool,
}

impl Negotiated {
    fn new(config: &Config, guid: String) -> Self {
        let current_ipv4 = config
            .ppp
            .static_ipv4
            .map(|a| a.octets())
            .unwrap_or([0; 4]);
        Self {
            current_mru: config.ppp.mru,
            current_auth: None,
            current_ipv4,
            current_ipv6: [0; 8],
            current_proposed_dns: [0; 4],
            hlak: None,
            nonce: [0; 32],
            hash_is_sha256: true,
            guid,
            is_dns_rejected: false,
        }
    }
}

/// The single session instance shared by reference among every task
/// (spec.md §3). `negotiated` is mutex-protected for the bookkeeping
/// fields genuinely touched from more than one place (`frame_id`); the
/// negotiated-value fields are still conceptually single-writer, the mutex
/// only exists because Rust needs one to hand out `&mut` across `.await`
/// points within a single owning task.
pub struct Session {
    pub config: Arc<Config>,
    pub negotiated: Mutex<Negotiated>,
    frame_id_counter: Mutex<u8>,
}

impl Session {
    /// `guid` is the session identifier "set at engine start" (spec.md §3):
    /// the caller generates it once, before the TLS transport's
    /// `SSTP_DUPLEX_POST` upgrade puts it on the wire as
    /// `SSTPCORRELATIONID`, so the two always agree.
    pub fn new(config: Arc<Config>, guid: String) -> Arc<Self> {
        let negotiated = Negotiated::new(&config, guid);
        Arc::new(Self {
            config,
            negotiated: Mutex::new(negotiated),
            frame_id_counter: Mutex::new(0),
        })
    }

    /// Allocates the next PPP frame id, wrapping modulo 256 under mutual
    /// exclusion (spec.md §3 invariant 2).
    pub async fn next_frame_id(&self) -> u8 {
        let mut guard = self.frame_id_counter.lock().await;
        let id = *guard;
        *guard = guard.wrapping_add(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, PppConfig, DnsConfig, RouteConfig, ReconnectionConfig, TlsConfig};
    use std::time::Duration;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            hostname: "vpn.example.com".into(),
            port: 443,
            proxy: None,
            tls: TlsConfig {
                verify_host: true,
                ..Default::default()
            },
            ppp: PppConfig {
                username: "user".into(),
                password: "pass".into(),
                mru: 1500,
                mtu: 1500,
                auth_protocols: vec![AuthProtocol::MsChapV2],
                auth_timeout: Duration::from_secs(30),
                ipv4_enabled: true,
                ipv6_enabled: false,
                request_static_ipv4: false,
                static_ipv4: None,
            },
            dns: DnsConfig::default(),
            route: RouteConfig::default(),
            reconnection: ReconnectionConfig::default(),
        })
    }

    #[tokio::test]
    async fn frame_id_is_monotonic_modulo_256_under_concurrency() {
        let session = Session::new(test_config(), "test-guid".into());
        let mut handles = Vec::new();
        for _ in 0..512 {
            let session = Arc::clone(&session);
            handles.push(tokio::spawn(async move { session.next_frame_id().await }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();
        // 512 allocations modulo 256 must produce exactly two of each value.
        for window in ids.chunks(2) {
            assert_eq!(window[0], window[1]);
        }
    }
}
