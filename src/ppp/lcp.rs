//! LCP policies (spec.md §4.5). The client's own Configure-Request only
//! ever proposes an MRU: the Authentication-Protocol option is the
//! server's proposal to *us* (which protocol to authenticate with), so it
//! is decided entirely in `try_server_reject`/`try_server_nak`.

use super::negotiator::NegotiatorPolicy;
use crate::codec::ppp::{PppProtocol, RawOption};
use crate::config::AuthProtocol;
use crate::config::{MAX_MRU, MIN_MRU};
use crate::error::{EngineError, Result_, Where};
use crate::session::Session;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

const OPT_MRU: u8 = 1;
const OPT_AUTH_PROTOCOL: u8 = 3;
const CHAP_ALGORITHM_MSCHAP2: u8 = 0x81;

pub struct LcpPolicy {
    mru_rejected: AtomicBool,
}

impl LcpPolicy {
    pub fn new() -> Self {
        Self {
            mru_rejected: AtomicBool::new(false),
        }
    }

    /// The Authentication-Protocol option bytes for our single preferred
    /// protocol, in strict EAP-MSCHAPv2 > MSCHAPv2 > PAP priority,
    /// independent of what the server itself proposed (spec.md §9).
    fn preferred_auth_option(&self, session: &Session) -> Option<(AuthProtocol, RawOption)> {
        let enabled = &session.config.ppp.auth_protocols;
        if enabled.contains(&AuthProtocol::EapMsChapV2) {
            let value = PppProtocol::Eap.code().to_be_bytes().to_vec();
            Some((AuthProtocol::EapMsChapV2, RawOption::new(OPT_AUTH_PROTOCOL, value)))
        } else if enabled.contains(&AuthProtocol::MsChapV2) {
            let mut value = PppProtocol::Chap.code().to_be_bytes().to_vec();
            value.push(CHAP_ALGORITHM_MSCHAP2);
            Some((AuthProtocol::MsChapV2, RawOption::new(OPT_AUTH_PROTOCOL, value)))
        } else if enabled.contains(&AuthProtocol::Pap) {
            let value = PppProtocol::Pap.code().to_be_bytes().to_vec();
            Some((AuthProtocol::Pap, RawOption::new(OPT_AUTH_PROTOCOL, value)))
        } else {
            None
        }
    }
}

impl Default for LcpPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NegotiatorPolicy for LcpPolicy {
    fn where_(&self) -> Where {
        Where::Lcp
    }

    fn protocol(&self) -> PppProtocol {
        PppProtocol::Lcp
    }

    fn try_server_reject(&self, options: &[RawOption]) -> Option<Vec<RawOption>> {
        let unknown: Vec<RawOption> = options
            .iter()
            .filter(|o| o.ty != OPT_MRU && o.ty != OPT_AUTH_PROTOCOL)
            .cloned()
            .collect();
        if unknown.is_empty() {
            None
        } else {
            Some(unknown)
        }
    }

    async fn try_server_nak(&self, session: &Session, options: &[RawOption]) -> Option<Vec<RawOption>> {
        let mut nak = Vec::new();

        if let Some(mru_opt) = options.iter().find(|o| o.ty == OPT_MRU) {
            if mru_opt.value.len() == 2 {
                let declared = u16::from_be_bytes([mru_opt.value[0], mru_opt.value[1]]);
                if declared < session.config.ppp.mtu {
                    nak.push(RawOption::new(OPT_MRU, session.config.ppp.mtu.to_be_bytes().to_vec()));
                }
            }
        }

        if let Some((preferred, preferred_option)) = self.preferred_auth_option(session) {
            let matches_preferred = options
                .iter()
                .any(|o| o.ty == OPT_AUTH_PROTOCOL && o.value == preferred_option.value);
            if matches_preferred {
                session.negotiated.lock().await.current_auth = Some(preferred);
            } else {
                nak.push(preferred_option);
            }
        }

        if nak.is_empty() {
            None
        } else {
            Some(nak)
        }
    }

    async fn create_client_request(&self, session: &Session) -> Vec<RawOption> {
        if self.mru_rejected.load(Ordering::SeqCst) {
            return Vec::new();
        }
        let mru = session.negotiated.lock().await.current_mru;
        vec![RawOption::new(OPT_MRU, mru.to_be_bytes().to_vec())]
    }

    async fn accept_client_nak(&self, session: &Session, options: &[RawOption]) -> Result<(), EngineError> {
        if let Some(mru_opt) = options.iter().find(|o| o.ty == OPT_MRU) {
            if mru_opt.value.len() == 2 {
                let proposed = u16::from_be_bytes([mru_opt.value[0], mru_opt.value[1]]);
                let clamped = proposed.clamp(MIN_MRU, session.config.ppp.mru.min(MAX_MRU));
                session.negotiated.lock().await.current_mru = clamped;
            }
        }
        Ok(())
    }

    async fn accept_client_reject(&self, session: &Session, options: &[RawOption]) -> Result<(), EngineError> {
        if options.iter().any(|o| o.ty == OPT_MRU) {
            self.mru_rejected.store(true, Ordering::SeqCst);
            const DEFAULT_MRU_WHEN_UNNEGOTIATED: u16 = 1500;
            if DEFAULT_MRU_WHEN_UNNEGOTIATED > session.config.ppp.mru {
                return Err(EngineError::new(Where::LcpMru, Result_::ErrOptionRejected));
            }
        }
        if options.iter().any(|o| o.ty == OPT_AUTH_PROTOCOL) {
            return Err(EngineError::new(Where::LcpAuth, Result_::ErrOptionRejected));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DnsConfig, PppConfig, ReconnectionConfig, RouteConfig, TlsConfig};
    use std::sync::Arc;
    use std::time::Duration;

    fn test_session(mtu: u16, mru: u16, auth_protocols: Vec<AuthProtocol>) -> Arc<Session> {
        Session::new(Arc::new(Config {
            hostname: "vpn.example.com".into(),
            port: 443,
            proxy: None,
            tls: TlsConfig { verify_host: true, ..Default::default() },
            ppp: PppConfig {
                username: "user".into(),
                password: "pass".into(),
                mru,
                mtu,
                auth_protocols,
                auth_timeout: Duration::from_secs(30),
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
    async fn auth_priority_is_eap_over_chap_over_pap_regardless_of_server_offer() {
        let policy = LcpPolicy::new();
        let session = test_session(1500, 1500, vec![AuthProtocol::Pap, AuthProtocol::MsChapV2, AuthProtocol::EapMsChapV2]);

        // Server proposes PAP; our strict priority still insists on EAP-MSCHAPv2.
        let server_options = vec![RawOption::new(OPT_AUTH_PROTOCOL, PppProtocol::Pap.code().to_be_bytes().to_vec())];
        let nak = policy.try_server_nak(&session, &server_options).await;
        assert!(nak.is_some());
        let nak_options = nak.unwrap();
        assert!(nak_options
            .iter()
            .any(|o| o.ty == OPT_AUTH_PROTOCOL && o.value == PppProtocol::Eap.code().to_be_bytes().to_vec()));
    }

    #[tokio::test]
    async fn auth_nak_is_none_when_server_already_offers_the_preferred_protocol() {
        let policy = LcpPolicy::new();
        let session = test_session(1500, 1500, vec![AuthProtocol::MsChapV2]);
        let mut value = PppProtocol::Chap.code().to_be_bytes().to_vec();
        value.push(CHAP_ALGORITHM_MSCHAP2);
        let server_options = vec![RawOption::new(OPT_AUTH_PROTOCOL, value)];
        assert!(policy.try_server_nak(&session, &server_options).await.is_none());
        assert_eq!(session.negotiated.lock().await.current_auth, Some(AuthProtocol::MsChapV2));
    }

    #[tokio::test]
    async fn accept_client_nak_clamps_mru_into_min_max_range() {
        let policy = LcpPolicy::new();
        let session = test_session(1500, 1500, vec![AuthProtocol::Pap]);

        let too_small = vec![RawOption::new(OPT_MRU, 10u16.to_be_bytes().to_vec())];
        policy.accept_client_nak(&session, &too_small).await.unwrap();
        assert_eq!(session.negotiated.lock().await.current_mru, MIN_MRU);

        let too_large = vec![RawOption::new(OPT_MRU, 9000u16.to_be_bytes().to_vec())];
        policy.accept_client_nak(&session, &too_large).await.unwrap();
        let mru = session.negotiated.lock().await.current_mru;
        assert!(mru >= MIN_MRU && mru <= 1500);
    }

    #[tokio::test]
    async fn mru_reject_is_fatal_when_default_mru_exceeds_configured_mtu() {
        let policy = LcpPolicy::new();
        let session = test_session(1400, 1400, vec![AuthProtocol::Pap]);
        let rejected = vec![RawOption::new(OPT_MRU, 1400u16.to_be_bytes().to_vec())];
        let err = policy.accept_client_reject(&session, &rejected).await.unwrap_err();
        assert_eq!(err, EngineError::new(Where::LcpMru, Result_::ErrOptionRejected));
    }

    #[tokio::test]
    async fn mru_reject_reads_mru_not_mtu_when_the_two_fields_differ() {
        let policy = LcpPolicy::new();
        // mtu=1500 (would NOT trip the 1500 > mtu check) but mru=1400 (DOES
        // trip 1500 > mru): only reading the wrong field would pass here.
        let session = test_session(1500, 1400, vec![AuthProtocol::Pap]);
        let rejected = vec![RawOption::new(OPT_MRU, 1400u16.to_be_bytes().to_vec())];
        let err = policy.accept_client_reject(&session, &rejected).await.unwrap_err();
        assert_eq!(err, EngineError::new(Where::LcpMru, Result_::ErrOptionRejected));
    }

    #[tokio::test]
    async fn mru_reject_is_not_fatal_when_mru_already_at_default() {
        let policy = LcpPolicy::new();
        // mru=1500 (equal to the unnegotiated default, so 1500 > mru is
        // false) while mtu=1400 differs: reading mtu would wrongly fail.
        let session = test_session(1400, 1500, vec![AuthProtocol::Pap]);
        let rejected = vec![RawOption::new(OPT_MRU, 1500u16.to_be_bytes().to_vec())];
        assert!(policy.accept_client_reject(&session, &rejected).await.is_ok());
    }

    #[tokio::test]
    async fn auth_reject_is_always_fatal() {
        let policy = LcpPolicy::new();
        let session = test_session(1500, 1500, vec![AuthProtocol::Pap]);
        let rejected = vec![RawOption::new(OPT_AUTH_PROTOCOL, vec![0xC0, 0x23])];
        let err = policy.accept_client_reject(&session, &rejected).await.unwrap_err();
        assert_eq!(err, EngineError::new(Where::LcpAuth, Result_::ErrOptionRejected));
    }

    #[test]
    fn server_reject_flags_only_unknown_option_types() {
        let policy = LcpPolicy::new();
        let known = vec![RawOption::new(OPT_MRU, vec![0x05, 0xDC])];
        assert!(policy.try_server_reject(&known).is_none());
        let unknown = vec![RawOption::new(99, vec![1, 2, 3])];
        assert_eq!(policy.try_server_reject(&unknown), Some(unknown));
    }
}
