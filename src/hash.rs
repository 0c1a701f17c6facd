//! Hash-driven layer assignment.
//!
//! Every key's depth in the tree is derived from `sha256(key)`, encoded as
//! lowercase RFC 4648 base32 (no padding), by counting the number of leading
//! `'a'` characters (base32 digit value zero). This is the sole source of
//! structural determinism: any implementation computing it the same way
//! produces the same tree shape for the same key set, independent of
//! insertion order.

use sha2::{Digest, Sha256};

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

/// RFC 4648 base32 encoding, lowercase alphabet, no `=` padding.
///
/// No crate in this workspace's dependency tree exposes bare (non-multibase)
/// base32, so this is hand-rolled; it is small and pinned down by the known
/// test vector below.
fn base32_encode_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity((bytes.len() * 8).div_ceil(5));
    let mut buf: u32 = 0;
    let mut bits: u32 = 0;
    for &byte in bytes {
        buf = (buf << 8) | byte as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            let idx = (buf >> bits) & 0x1f;
            out.push(BASE32_ALPHABET[idx as usize] as char);
        }
    }
    if bits > 0 {
        let idx = (buf << (5 - bits)) & 0x1f;
        out.push(BASE32_ALPHABET[idx as usize] as char);
    }
    out
}

/// The natural layer of `key`: the number of leading zero-value base32
/// digits (`'a'`) in the base32 encoding of `sha256(key)`.
pub fn leading_zeros_on_hash(key: &str) -> u32 {
    let digest = Sha256::digest(key.as_bytes());
    let encoded = base32_encode_lower(&digest);
    encoded.chars().take_while(|&c| c == 'a').count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base32_matches_rfc4648_test_vector() {
        // RFC 4648 §10: "foobar" -> "MZXW6YTBOI======" (unpadded, lowercased here)
        assert_eq!(base32_encode_lower(b"foobar"), "mzxw6ytboi");
        assert_eq!(base32_encode_lower(b"foo"), "mzxw6");
        assert_eq!(base32_encode_lower(b""), "");
    }

    #[test]
    fn deterministic_and_pure() {
        assert_eq!(
            leading_zeros_on_hash("com.example.record/3jqfcqzm3fo2j"),
            leading_zeros_on_hash("com.example.record/3jqfcqzm3fo2j")
        );
    }

    #[test]
    fn distinct_keys_tend_to_differ() {
        // Can't assert inequality categorically (hash collisions in the
        // leading-zero count are expected), but the function must at least
        // run and produce a value for arbitrary input.
        let _ = leading_zeros_on_hash("a-completely-different-key");
    }

    #[test]
    fn layer_distribution_is_geometric() {
        // With a 32-symbol alphabet, each additional layer has probability
        // 1/32; most keys should land at layer 0.
        let mut at_layer_0 = 0;
        for i in 0..500 {
            if leading_zeros_on_hash(&format!("distribution-probe-{i}")) == 0 {
                at_layer_0 += 1;
            }
        }
        assert!(at_layer_0 > 400, "expected most keys at layer 0, got {at_layer_0}/500");
    }
}
