//! The full recognised configuration surface (spec.md §6), built with a
//! chaining builder — data only, no UI or storage concerns attached.

use std::net::Ipv4Addr;
use std::time::Duration;

/// Which PPP authentication protocol to allow/negotiate, ordered by
/// preference where relevant (spec.md §6, `PPP_AUTH_PROTOCOLS`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthProtocol {
    Pap,
    MsChapV2,
    EapMsChapV2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVersion {
    Default,
    Tls12,
    Tls13,
}

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub verify_host: bool,
    pub specify_trust: bool,
    pub cert_dir: Option<String>,
    pub version: Option<TlsVersion>,
    pub select_suites: bool,
    pub suites: Vec<String>,
    pub use_custom_sni: bool,
    pub custom_sni: Option<String>,
}

impl TlsConfig {
    pub fn version(&self) -> TlsVersion {
        self.version.unwrap_or(TlsVersion::Default)
    }
}

#[derive(Debug, Clone)]
pub struct PppConfig {
    pub username: String,
    pub password: String,
    pub mru: u16,
    pub mtu: u16,
    pub auth_protocols: Vec<AuthProtocol>,
    pub auth_timeout: Duration,
    pub ipv4_enabled: bool,
    pub ipv6_enabled: bool,
    pub request_static_ipv4: bool,
    pub static_ipv4: Option<Ipv4Addr>,
}

#[derive(Debug, Clone, Default)]
pub struct DnsConfig {
    pub request_address: bool,
    pub use_custom_server: bool,
    pub custom_address: Option<Ipv4Addr>,
}

#[derive(Debug, Clone, Default)]
pub struct RouteConfig {
    pub add_default_route: bool,
    pub route_private_addresses: bool,
    pub add_custom_routes: bool,
    pub custom_routes: String, // newline-separated CIDRs, parsed at tun-setup time
    pub enable_app_based_rule: bool,
    pub allowed_applications: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectionConfig {
    pub enabled: bool,
    pub count: u32,
    pub interval: Duration,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            count: 1,
            interval: Duration::from_secs(5),
        }
    }
}

/// Immutable, per-attempt configuration (spec.md §3, `config`).
#[derive(Debug, Clone)]
pub struct Config {
    pub hostname: String,
    pub port: u16,
    pub proxy: Option<ProxyConfig>,
    pub tls: TlsConfig,
    pub ppp: PppConfig,
    pub dns: DnsConfig,
    pub route: RouteConfig,
    pub reconnection: ReconnectionConfig,
}

impl Config {
    pub fn builder(hostname: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(hostname, username, password)
    }
}

/// Private-address ranges routed when `route_private_addresses` is set
/// (spec.md §6).
pub const PRIVATE_IPV4_RANGES: [&str; 3] = ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"];
pub const PRIVATE_IPV6_RANGES: [&str; 1] = ["fc00::/7"];

/// Minimum/maximum MRU/MTU (spec.md §4.5/§6), and the default MTU used when
/// nothing narrower has been negotiated.
pub const MIN_MRU: u16 = 68;
pub const MAX_MRU: u16 = 2000;
pub const DEFAULT_MTU: u16 = 1500;

pub struct ConfigBuilder {
    hostname: String,
    port: u16,
    proxy: Option<ProxyConfig>,
    tls: TlsConfig,
    ppp: PppConfig,
    dns: DnsConfig,
    route: RouteConfig,
    reconnection: ReconnectionConfig,
}

impl ConfigBuilder {
    pub fn new(hostname: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port: 443,
            proxy: None,
            tls: TlsConfig {
                verify_host: true,
                ..Default::default()
            },
            ppp: PppConfig {
                username: username.into(),
                password: password.into(),
                mru: DEFAULT_MTU,
                mtu: DEFAULT_MTU,
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
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    pub fn mru_mtu(mut self, mru: u16, mtu: u16) -> Self {
        self.ppp.mru = mru;
        self.ppp.mtu = mtu;
        self
    }

    pub fn auth_protocols(mut self, protocols: Vec<AuthProtocol>) -> Self {
        self.ppp.auth_protocols = protocols;
        self
    }

    pub fn ip_stacks(mut self, ipv4: bool, ipv6: bool) -> Self {
        self.ppp.ipv4_enabled = ipv4;
        self.ppp.ipv6_enabled = ipv6;
        self
    }

    pub fn static_ipv4(mut self, addr: Ipv4Addr) -> Self {
        self.ppp.request_static_ipv4 = true;
        self.ppp.static_ipv4 = Some(addr);
        self
    }

    pub fn dns(mut self, dns: DnsConfig) -> Self {
        self.dns = dns;
        self
    }

    pub fn route(mut self, route: RouteConfig) -> Self {
        self.route = route;
        self
    }

    pub fn reconnection(mut self, reconnection: ReconnectionConfig) -> Self {
        self.reconnection = reconnection;
        self
    }

    pub fn build(self) -> Config {
        Config {
            hostname: self.hostname,
            port: self.port,
            proxy: self.proxy,
            tls: self.tls,
            ppp: self.ppp,
            dns: self.dns,
            route: self.route,
            reconnection: self.reconnection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_recognised_values() {
        let config = Config::builder("vpn.example.com", "alice", "hunter2").build();
        assert_eq!(config.port, 443);
        assert_eq!(config.ppp.mru, DEFAULT_MTU);
        assert_eq!(config.ppp.mtu, DEFAULT_MTU);
        assert_eq!(config.ppp.auth_protocols, vec![AuthProtocol::MsChapV2]);
        assert!(config.ppp.ipv4_enabled);
        assert!(!config.ppp.ipv6_enabled);
        assert!(config.tls.verify_host);
        assert!(!config.reconnection.enabled);
    }

    #[test]
    fn builder_chains_override_every_field() {
        let config = Config::builder("vpn.example.com", "alice", "hunter2")
            .port(8443)
            .mru_mtu(1400, 1400)
            .auth_protocols(vec![AuthProtocol::Pap])
            .ip_stacks(false, true)
            .static_ipv4(Ipv4Addr::new(10, 0, 0, 5))
            .build();
        assert_eq!(config.port, 8443);
        assert_eq!(config.ppp.mru, 1400);
        assert!(!config.ppp.ipv4_enabled);
        assert!(config.ppp.ipv6_enabled);
        assert_eq!(config.ppp.static_ipv4, Some(Ipv4Addr::new(10, 0, 0, 5)));
        assert!(config.ppp.request_static_ipv4);
    }

    #[test]
    fn private_ranges_cover_rfc1918_and_unique_local() {
        assert_eq!(PRIVATE_IPV4_RANGES, ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"]);
        assert_eq!(PRIVATE_IPV6_RANGES, ["fc00::/7"]);
    }
}
