//! IPv6CP policies (spec.md §4.5): a single Interface-Identifier option
//! (RFC 5072), no DNS or address-family subtleties.

use super::negotiator::NegotiatorPolicy;
use crate::codec::ppp::{PppProtocol, RawOption};
use crate::error::{EngineError, Result_, Where};
use crate::session::Session;
use async_trait::async_trait;

const OPT_INTERFACE_IDENTIFIER: u8 = 1;

pub struct Ipv6cpPolicy;

impl Ipv6cpPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Ipv6cpPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NegotiatorPolicy for Ipv6cpPolicy {
    fn where_(&self) -> Where {
        Where::Ipv6cp
    }

    fn protocol(&self) -> PppProtocol {
        PppProtocol::Ipv6cp
    }

    fn try_server_reject(&self, options: &[RawOption]) -> Option<Vec<RawOption>> {
        let reject: Vec<RawOption> = options
            .iter()
            .filter(|o| o.ty != OPT_INTERFACE_IDENTIFIER)
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
        vec![RawOption::new(
            OPT_INTERFACE_IDENTIFIER,
            negotiated.current_ipv6.to_vec(),
        )]
    }

    async fn accept_client_nak(&self, session: &Session, options: &[RawOption]) -> Result<(), EngineError> {
        if let Some(opt) = options.iter().find(|o| o.ty == OPT_INTERFACE_IDENTIFIER) {
            if opt.value.len() == 8 {
                session
                    .negotiated
                    .lock()
                    .await
                    .current_ipv6
                    .copy_from_slice(&opt.value);
            }
        }
        Ok(())
    }

    async fn accept_client_reject(&self, _session: &Session, options: &[RawOption]) -> Result<(), EngineError> {
        if options.iter().any(|o| o.ty == OPT_INTERFACE_IDENTIFIER) {
            return Err(EngineError::new(Where::Ipv6cpIdentifier, Result_::ErrOptionRejected));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthProtocol, Config, DnsConfig, PppConfig, ReconnectionConfig, RouteConfig, TlsConfig};
    use std::sync::Arc;
    use std::time::Duration;

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
                auth_timeout: Duration::from_secs(30),
                ipv4_enabled: false,
                ipv6_enabled: true,
                request_static_ipv4: false,
                static_ipv4: None,
            },
            dns: DnsConfig::default(),
            route: RouteConfig::default(),
            reconnection: ReconnectionConfig::default(),
        }), "test-guid".into())
    }

    #[tokio::test]
    async fn nak_adopts_peers_interface_identifier() {
        let policy = Ipv6cpPolicy::new();
        let session = test_session();
        let nak = vec![RawOption::new(OPT_INTERFACE_IDENTIFIER, vec![1, 2, 3, 4, 5, 6, 7, 8])];
        policy.accept_client_nak(&session, &nak).await.unwrap();
        assert_eq!(session.negotiated.lock().await.current_ipv6, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[tokio::test]
    async fn identifier_reject_is_fatal() {
        let policy = Ipv6cpPolicy::new();
        let session = test_session();
        let reject = vec![RawOption::new(OPT_INTERFACE_IDENTIFIER, vec![])];
        let err = policy.accept_client_reject(&session, &reject).await.unwrap_err();
        assert_eq!(err, EngineError::new(Where::Ipv6cpIdentifier, Result_::ErrOptionRejected));
    }

    #[test]
    fn server_reject_flags_unknown_options_only() {
        let policy = Ipv6cpPolicy::new();
        let known = vec![RawOption::new(OPT_INTERFACE_IDENTIFIER, vec![0; 8])];
        assert!(policy.try_server_reject(&known).is_none());
        let unknown = vec![RawOption::new(50, vec![1])];
        assert_eq!(policy.try_server_reject(&unknown), Some(unknown));
    }
}
