//! RFC 2759 (MS-CHAP-v2) NT-Response/authenticator-response construction
//! and RFC 3079 HLAK derivation. Every function here is a direct
//! implementation of the algorithm spec.md §4.7 names but does not spell
//! out ("compute NT-Response per RFC 2759", "master key derived from NT
//! response ... per RFC 3079"); see `SPEC_FULL.md` §4.7 for the citations.

use cipher::{BlockEncrypt, KeyInit};
use des::Des;
use hmac::{Hmac, Mac};
use sha1::{Digest, Sha1};

/// MD4 of the UTF-16LE encoding of `password` (RFC 2759 step: `PasswordHash`).
pub fn nt_password_hash(password: &str) -> [u8; 16] {
    let utf16: Vec<u8> = password
        .encode_utf16()
        .flat_map(|c| c.to_le_bytes())
        .collect();
    let digest = md4::Md4::digest(&utf16);
    digest.into()
}

/// `PasswordHashHash`: MD4 applied a second time, used only in the HLAK
/// derivation (RFC 3079 §3.4) and the authenticator-response check (RFC
/// 2759 §8.7).
pub fn password_hash_hash(password_hash: &[u8; 16]) -> [u8; 16] {
    let digest = md4::Md4::digest(password_hash);
    digest.into()
}

/// `ChallengeHash` (RFC 2759 §8.2): SHA1 of the peer challenge, the
/// authenticator challenge and the username, truncated to 8 bytes.
pub fn challenge_hash(peer_challenge: &[u8; 16], auth_challenge: &[u8; 16], username: &str) -> [u8; 8] {
    let mut sha1 = Sha1::new();
    sha1.update(peer_challenge);
    sha1.update(auth_challenge);
    sha1.update(username.as_bytes());
    let digest = sha1.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Expands 7 key bytes into the 8-byte (56+parity bit) DES key shape RFC
/// 2759's `DesEncrypt` uses. The parity bit itself is left as the
/// low-order zero bit: DES implementations do not verify key parity.
fn des_key_from_7_bytes(key: &[u8; 7]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[0] = key[0] >> 1;
    out[1] = ((key[0] & 0x01) << 6) | (key[1] >> 2);
    out[2] = ((key[1] & 0x03) << 5) | (key[2] >> 3);
    out[3] = ((key[2] & 0x07) << 4) | (key[3] >> 4);
    out[4] = ((key[3] & 0x0F) << 3) | (key[4] >> 5);
    out[5] = ((key[4] & 0x1F) << 2) | (key[5] >> 6);
    out[6] = ((key[5] & 0x3F) << 1) | (key[6] >> 7);
    out[7] = key[6] & 0x7F;
    for byte in out.iter_mut() {
        *byte <<= 1;
    }
    out
}

fn des_encrypt_block(key7: &[u8; 7], block: &[u8; 8]) -> [u8; 8] {
    let key = des_key_from_7_bytes(key7);
    let cipher = Des::new_from_slice(&key).expect("DES key is always 8 bytes");
    let mut buf = cipher::generic_array::GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut buf);
    buf.into()
}

/// `ChallengeResponse` (RFC 2759 §8.5): the 24-byte NT-Response, built by
/// DES-encrypting the 8-byte challenge hash three times with the three
/// 7-byte keys sliced out of the 16-byte password hash (zero-padded to 21
/// bytes).
pub fn nt_response(password_hash: &[u8; 16], challenge: &[u8; 8]) -> [u8; 24] {
    let mut padded = [0u8; 21];
    padded[..16].copy_from_slice(password_hash);

    let k1: [u8; 7] = padded[0..7].try_into().unwrap();
    let k2: [u8; 7] = padded[7..14].try_into().unwrap();
    let k3: [u8; 7] = padded[14..21].try_into().unwrap();

    let mut out = [0u8; 24];
    out[0..8].copy_from_slice(&des_encrypt_block(&k1, challenge));
    out[8..16].copy_from_slice(&des_encrypt_block(&k2, challenge));
    out[16..24].copy_from_slice(&des_encrypt_block(&k3, challenge));
    out
}

const MAGIC1: &[u8] = b"Magic server to client signing constant";
const MAGIC2: &[u8] = b"Pad to make it do more than one iteration";

/// `GenerateAuthenticatorResponse` (RFC 2759 §8.7): the server's `S=` value
/// in the MS-CHAPv2 Success message, which the client recomputes and
/// compares to verify the server authenticated correctly.
pub fn authenticator_response(
    password_hash: &[u8; 16],
    nt_response: &[u8; 24],
    challenge_hash: &[u8; 8],
) -> [u8; 20] {
    let digest_hash = password_hash_hash(password_hash);

    let mut sha1 = Sha1::new();
    sha1.update(digest_hash);
    sha1.update(nt_response);
    sha1.update(MAGIC1);
    let intermediate = sha1.finalize();

    let mut sha1 = Sha1::new();
    sha1.update(intermediate);
    sha1.update(challenge_hash);
    sha1.update(MAGIC2);
    sha1.finalize().into()
}

/// RFC 3079 §3.4 `GetMasterKey`: the 16-byte HLAK shared by MS-CHAPv2 and
/// EAP-MSCHAPv2 for SSTP crypto-binding.
pub fn master_key(password_hash: &[u8; 16], nt_response: &[u8; 24]) -> [u8; 16] {
    let hash_hash = password_hash_hash(password_hash);
    let mut sha1 = Sha1::new();
    sha1.update(hash_hash);
    sha1.update(nt_response);
    sha1.update(b"This is the MPPE Master Key");
    let digest = sha1.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<sha2::Sha256>;

/// Computes an HMAC over `data` with the given `key`, using SHA1 when
/// `sha256` is `false` and SHA256 otherwise. Used both for the
/// `CMK`/`CMAC` crypto-binding derivation (spec.md §4.8) and for nothing
/// else — kept generic over the hash choice since `hashProtocol` is
/// negotiated per-session.
pub fn hmac(sha256: bool, key: &[u8], data: &[u8]) -> Vec<u8> {
    if sha256 {
        let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    } else {
        let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts keys of any length");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nt_password_hash_is_deterministic() {
        let a = nt_password_hash("hunter2");
        let b = nt_password_hash("hunter2");
        assert_eq!(a, b);
        assert_ne!(a, nt_password_hash("hunter3"));
    }

    #[test]
    fn nt_response_is_24_bytes_and_deterministic() {
        let hash = nt_password_hash("hunter2");
        let challenge = [0xAB; 8];
        let r1 = nt_response(&hash, &challenge);
        let r2 = nt_response(&hash, &challenge);
        assert_eq!(r1, r2);
        assert_eq!(r1.len(), 24);
    }

    #[test]
    fn authenticator_response_changes_with_input() {
        let hash = nt_password_hash("hunter2");
        let challenge = [0xAB; 8];
        let response = nt_response(&hash, &challenge);
        let a = authenticator_response(&hash, &response, &challenge);
        let other_hash = nt_password_hash("hunter3");
        let b = authenticator_response(&other_hash, &response, &challenge);
        assert_ne!(a, b);
    }

    #[test]
    fn master_key_is_16_bytes() {
        let hash = nt_password_hash("hunter2");
        let challenge = [0xAB; 8];
        let response = nt_response(&hash, &challenge);
        let key = master_key(&hash, &response);
        assert_eq!(key.len(), 16);
    }
}
