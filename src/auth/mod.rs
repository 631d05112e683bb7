//! PPP authenticators (spec.md §4.7): PAP, MS-CHAPv2 (inside CHAP) and
//! EAP-MSCHAPv2. Each is a single task bound to its PPP protocol mailbox,
//! run once between LCP completion and the IPCP/IPv6CP phase.

pub mod eap_mschapv2;
pub mod mschapv2;
pub mod pap;

pub use eap_mschapv2::run as run_eap_mschapv2;
pub use mschapv2::run as run_mschapv2;
pub use pap::run as run_pap;
