//! The SSTP control client (spec.md §4.8): the request sub-task that drives
//! `Call-Connect-Request`/`Ack`/`Nak`, the control sub-task that answers
//! `Echo-Request`/handles teardown for the lifetime of an established call,
//! and the crypto-binding the `Call-Connected` packet carries.

pub mod control;
mod crypto_binding;

pub use crypto_binding::build_crypto_binding;
