//! Crypto primitives used by MS-CHAPv2/EAP-MSCHAPv2 authentication and by
//! the SSTP crypto-binding: MD4 (via the `md4` crate), HMAC-SHA1/SHA256
//! (via `hmac`+`sha1`+`sha2`), and the DES-based NT-Response construction
//! (via `des`), per RFC 2759 (MS-CHAPv2) and RFC 3079 (HLAK derivation).

pub mod mschap;
