//! The three collaborators the engine treats as external (spec.md §1, §6):
//! platform tun-device control, trust-store curation, and host
//! notification/logging. The engine only ever sees these traits; concrete
//! platform implementations live outside this crate.

use crate::error::TunError;
use async_trait::async_trait;
use std::net::IpAddr;

/// A half of the virtual network device: a blocking-shaped read of one L3
/// frame at a time.
#[async_trait]
pub trait TunReader: Send {
    /// Reads one L3 frame into `buf`, returning the number of bytes read.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TunError>;
}

/// The write half of the virtual network device.
#[async_trait]
pub trait TunWriter: Send {
    async fn write(&mut self, buf: &[u8]) -> Result<(), TunError>;
}

/// The platform collaborator that creates/configures the local virtual
/// network device (spec.md §6). Calls before `establish` configure the
/// device; `establish` brings it up and hands back the read/write halves.
#[async_trait]
pub trait TunDevice: Send + Sync {
    async fn add_address(&self, addr: IpAddr, prefix: u8) -> Result<(), TunError>;
    async fn add_dns_server(&self, addr: IpAddr) -> Result<(), TunError>;
    async fn add_route(&self, cidr: ipnet::IpNet) -> Result<(), TunError>;
    async fn add_allowed_application(&self, id: &str) -> Result<(), TunError>;
    async fn set_mtu(&self, mtu: u16) -> Result<(), TunError>;
    async fn establish(
        &self,
    ) -> Result<(Box<dyn TunReader>, Box<dyn TunWriter>), TunError>;
}

/// Supplies PEM-encoded CA certificates for a custom trust anchor when
/// `SSL_DO_SPECIFY_CERT` is set (spec.md §6).
pub trait TrustStore: Send + Sync {
    /// One entry per CA file, each already read into memory as PEM bytes.
    /// A failure to read/parse a specific file is the caller's
    /// responsibility to surface as `Err`; the engine tags it
    /// `ERR_PARSING_FAILED` at `Where::Cert`.
    fn list_ca_certs(&self) -> Result<Vec<(String, Vec<u8>)>, String>;
}

/// Reserved notification channels (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportChannel {
    Error,
    Reconnect,
    Disconnect,
    Certificate,
}

/// Host notification surface. `notify` is also where an untrusted leaf
/// certificate is surfaced (as `body`, PEM- or DER-encoded at the caller's
/// discretion) so the host can offer to save it (spec.md §4.2, §7).
pub trait Reporter: Send + Sync {
    fn notify(&self, channel: ReportChannel, body: &str, id: Option<&str>);
}
