//! A client implementation of the Secure Socket Tunneling Protocol (SSTP).
//!
//! SSTP carries a PPP session inside an HTTPS-shaped TLS tunnel: this crate
//! opens that tunnel, drives the SSTP call-setup handshake, negotiates PPP
//! (LCP, an authentication protocol, IPCP and/or IPv6CP), computes the SSTP
//! crypto-binding, and then bridges IP datagrams between the negotiated PPP
//! link and a caller-supplied virtual network device.
//!
//! # Getting started
//!
//! Build a [`Config`], provide implementations of the three collaborator
//! traits in [`external`], then hand all three to [`Engine::run`]. The
//! engine drives one tunnel attempt to completion: either it keeps pumping
//! packets until torn down, or it returns a terminal [`EngineError`].
//!
//! Reconnection policy is deliberately not part of this crate: the engine
//! reports a terminal outcome and returns: the caller decides whether and
//! when to start another attempt.

pub mod auth;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod demux;
pub mod echo_timer;
pub mod engine;
pub mod error;
pub mod external;
pub mod mux;
pub mod ppp;
pub mod session;
pub mod sstp;
pub mod transport;

pub use config::Config;
pub use engine::{Collaborators, Engine};
pub use error::{EngineError, Result_, Where};
