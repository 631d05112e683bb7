//! IPCP policies (spec.md §4.5). Preserves the exact quirk noted in
//! spec.md §9: a DNS Nak's replacement address is copied into
//! `current_proposed_dns` without validating it.

use super::negotiator::NegotiatorPolicy;
use crate::codec::ppp::{PppProtocol, RawOption};
use crate::error::{EngineError, Result_, Where};
use crate::session::Session;
use async_trait::async_trait;

const OPT_IP_ADDRESS: u8 = 3;
const OPT_PRIMARY_DNS: u8 = 129;

pub struct IpcpPolicy;

impl IpcpPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for IpcpPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NegotiatorPolicy for IpcpPolicy {
    fn where_(&self) -> Where {
        Where::Ipcp
    }

    fn protocol(&self) -> PppProtocol {
        PppProtocol::Ipcp
    }

    fn try_server_reject(&self, options: &[RawOption]) -> Option<Vec<RawOption>> {
        // Any option other than IP-Address is rejected: unrecognised
        // option types, and also the DNS option, which the client never
        // serves itself (spec.md §4.5).
        let reject: Vec<RawOption> = options
            .iter()
            .filter(|o| o.ty != OPT_IP_ADDRESS)
            .cloned()
            .collect();
        if reject.is_empty() {
            None
        } else {
            Some(reject)
        }
    }

    async fn try_server_nak(&self, _session: &Session, _options: &[RawOption]) -> Option<Vec<RawOption>> {
        None
    }

    async fn create_client_request(&self, session: &Session) -> Vec<RawOption> {
        let negotiated = session.negotiated.lock().await;
        let mut options = vec![RawOption::new(OPT_IP_ADDRESS, negotiated.current_ipv4.to_vec())];
        if session.config.dns.request_address && !negotiated.is_dns_rejected {
            options.push(RawOption::new(OPT_PRIMARY_DNS, negotiated.current_proposed_dns.to_vec()));
        }
        options
    }

    async fn accept_client_nak(&self, session: &Session, options: &[RawOption]) -> Result<(), EngineError> {
        let mut negotiated = session.negotiated.lock().await;

        if let Some(ip_opt) = options.iter().find(|o| o.ty == OPT_IP_ADDRESS) {
            if session.config.ppp.request_static_ipv4 {
                return Err(EngineError::new(Where::Ipcp, Result_::ErrAddressRejected));
            }
            if ip_opt.value.len() == 4 {
                negotiated.current_ipv4.copy_from_slice(&ip_opt.value);
            }
        }

        if let Some(dns_opt) = options.iter().find(|o| o.ty == OPT_PRIMARY_DNS) {
            // Preserved quirk: the Nak'd DNS value is copied verbatim,
            // with no validation of the address itself.
            if dns_opt.value.len() == 4 {
                negotiated.current_proposed_dns.copy_from_slice(&dns_opt.value);
            }
        }

        Ok(())
    }

    async fn accept_client_reject(&self, session: &Session, options: &[RawOption]) -> Result<(), EngineError> {
        if options.iter().any(|o| o.ty == OPT_IP_ADDRESS) {
            return Err(EngineError::new(Where::IpcpIp, Result_::ErrOptionRejected));
        }
        if options.iter().any(|o| o.ty == OPT_PRIMARY_DNS) {
            session.negotiated.lock().await.is_dns_rejected = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthProtocol, Config, DnsConfig, PppConfig, ReconnectionConfig, RouteConfig, TlsConfig};
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_session(request_static_ipv4: bool, static_ipv4: Option<Ipv4Addr>, request_dns: bool) -> Arc<Session> {
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
                auth_timeout: Duration::from_secs(30),
                ipv4_enabled: true,
                ipv6_enabled: false,
                request_static_ipv4,
                static_ipv4,
            },
            dns: DnsConfig { request_address: request_dns, ..Default::default() },
            route: RouteConfig::default(),
            reconnection: ReconnectionConfig::default(),
        }), "test-guid".into())
    }

    #[tokio::test]
    async fn static_ipv4_nak_is_fatal() {
        let policy = IpcpPolicy::new();
        let session = test_session(true, Some(Ipv4Addr::new(10, 0, 0, 5)), false);
        let nak = vec![RawOption::new(OPT_IP_ADDRESS, vec![192, 0, 2, 10])];
        let err = policy.accept_client_nak(&session, &nak).await.unwrap_err();
        assert_eq!(err, EngineError::new(Where::Ipcp, Result_::ErrAddressRejected));
    }

    #[tokio::test]
    async fn dynamic_ipv4_nak_adopts_peers_address() {
        let policy = IpcpPolicy::new();
        let session = test_session(false, None, false);
        let nak = vec![RawOption::new(OPT_IP_ADDRESS, vec![192, 0, 2, 10])];
        policy.accept_client_nak(&session, &nak).await.unwrap();
        assert_eq!(session.negotiated.lock().await.current_ipv4, [192, 0, 2, 10]);
    }

    #[tokio::test]
    async fn dns_nak_copies_proposed_value_without_validation() {
        // spec.md §9: the replacement DNS value is copied verbatim from a Nak,
        // even though 0.0.0.0 is not a usable DNS server address.
        let policy = IpcpPolicy::new();
        let session = test_session(false, None, true);
        let nak = vec![RawOption::new(OPT_PRIMARY_DNS, vec![0, 0, 0, 0])];
        policy.accept_client_nak(&session, &nak).await.unwrap();
        assert_eq!(session.negotiated.lock().await.current_proposed_dns, [0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn ip_address_reject_is_fatal_dns_reject_is_not() {
        let policy = IpcpPolicy::new();
        let session = test_session(false, None, true);

        let dns_reject = vec![RawOption::new(OPT_PRIMARY_DNS, vec![])];
        policy.accept_client_reject(&session, &dns_reject).await.unwrap();
        assert!(session.negotiated.lock().await.is_dns_rejected);

        let ip_reject = vec![RawOption::new(OPT_IP_ADDRESS, vec![])];
        let err = policy.accept_client_reject(&session, &ip_reject).await.unwrap_err();
        assert_eq!(err, EngineError::new(Where::IpcpIp, Result_::ErrOptionRejected));
    }

    #[test]
    fn server_reject_covers_dns_option_too() {
        let policy = IpcpPolicy::new();
        let ip_only = vec![RawOption::new(OPT_IP_ADDRESS, vec![1, 2, 3, 4])];
        assert!(policy.try_server_reject(&ip_only).is_none());
        let with_dns = vec![
            RawOption::new(OPT_IP_ADDRESS, vec![1, 2, 3, 4]),
            RawOption::new(OPT_PRIMARY_DNS, vec![8, 8, 8, 8]),
        ];
        let reject = policy.try_server_reject(&with_dns).unwrap();
        assert_eq!(reject, vec![RawOption::new(OPT_PRIMARY_DNS, vec![8, 8, 8, 8])]);
    }
}
