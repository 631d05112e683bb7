//! The SSTP crypto-binding (spec.md §4.8): ties the authenticated PPP
//! session to the specific TLS leaf certificate via an HMAC chain over the
//! Call-Connected packet.

use crate::codec::sstp::{Attribute, CryptoBindingBody, SstpMessageType};
use crate::crypto::mschap;
use sha1::Sha1;
use sha2::{Digest, Sha256};

const CMK_LABEL: &[u8] = b"SSTP inner method derived CMK";

/// `cmacSize` little-endian per spec.md §4.8: `0x1400` (20, SHA1) or
/// `0x2000` (32, SHA256).
fn cmac_size_le(sha256: bool) -> [u8; 2] {
    if sha256 {
        (32u16).to_le_bytes()
    } else {
        (20u16).to_le_bytes()
    }
}

/// Pads a certificate hash out to the fixed 32-byte Crypto-Binding field:
/// SHA-1 (20 bytes) is padded with trailing zeros, SHA-256 (32 bytes) fills
/// it exactly.
pub fn cert_hash(leaf_der: &[u8], sha256: bool) -> [u8; 32] {
    let mut out = [0u8; 32];
    if sha256 {
        let digest = Sha256::digest(leaf_der);
        out.copy_from_slice(&digest);
    } else {
        let digest = Sha1::digest(leaf_der);
        out[..20].copy_from_slice(&digest);
    }
    out
}

/// `CMK = HMAC(hlak, "SSTP inner method derived CMK" || cmacSize-le(u16) || 0x01)`.
/// `hlak` is the 16-byte MS-CHAPv2 master key, or `None` for PAP (which
/// uses an all-zero 32-byte key per spec.md §3 invariant 4).
fn compound_mac_key(hlak: Option<&[u8; 16]>, sha256: bool) -> Vec<u8> {
    let key: Vec<u8> = match hlak {
        Some(hlak) => hlak.to_vec(),
        None => vec![0u8; 32],
    };
    let mut data = Vec::with_capacity(CMK_LABEL.len() + 3);
    data.extend_from_slice(CMK_LABEL);
    data.extend_from_slice(&cmac_size_le(sha256));
    data.push(0x01);
    mschap::hmac(sha256, &key, &data)
}

/// Builds the Crypto-Binding attribute body for the Call-Connected packet:
/// the compound MAC is computed over the whole Call-Connected packet with
/// the MAC field zeroed, per spec.md §4.8.
pub fn build_crypto_binding(
    hlak: Option<&[u8; 16]>,
    nonce: [u8; 32],
    leaf_der: &[u8],
    sha256: bool,
) -> CryptoBindingBody {
    let hash_protocol = if sha256 { 2 } else { 1 };
    let body = CryptoBindingBody {
        hash_protocol,
        nonce,
        cert_hash: cert_hash(leaf_der, sha256),
        compound_mac: [0; 32],
    };

    let zeroed_packet = crate::codec::sstp::SstpPacket::Control(crate::codec::sstp::ControlPacket::new(
        SstpMessageType::CallConnected,
        vec![Attribute::CryptoBinding(body.clone())],
    ));

    let cmk = compound_mac_key(hlak, sha256);
    let mac = mschap::hmac(sha256, &cmk, &zeroed_packet.to_vec());

    let mut compound_mac = [0u8; 32];
    let len = mac.len().min(32);
    compound_mac[..len].copy_from_slice(&mac[..len]);

    CryptoBindingBody {
        compound_mac,
        ..body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmac_size_matches_hash_choice() {
        assert_eq!(cmac_size_le(false), 20u16.to_le_bytes());
        assert_eq!(cmac_size_le(true), 32u16.to_le_bytes());
    }

    #[test]
    fn cert_hash_sha1_is_padded_to_32() {
        let hash = cert_hash(b"certificate bytes", false);
        assert_eq!(hash.len(), 32);
        assert_eq!(&hash[20..], &[0u8; 12]);
    }

    #[test]
    fn cert_hash_sha256_fills_all_32_bytes() {
        let hash = cert_hash(b"certificate bytes", true);
        assert_ne!(&hash[20..], &[0u8; 12]);
    }

    #[test]
    fn compound_mac_differs_between_pap_and_mschap_keys() {
        let hlak = [7u8; 16];
        let a = build_crypto_binding(None, [1; 32], b"leaf", true);
        let b = build_crypto_binding(Some(&hlak), [1; 32], b"leaf", true);
        assert_ne!(a.compound_mac, b.compound_mac);
    }

    #[test]
    fn compound_mac_is_reproducible() {
        let hlak = [7u8; 16];
        let a = build_crypto_binding(Some(&hlak), [1; 32], b"leaf", true);
        let b = build_crypto_binding(Some(&hlak), [1; 32], b"leaf", true);
        assert_eq!(a.compound_mac, b.compound_mac);
    }
}
