//! Callback signatures.
//!
//! The platform signs each callback with SHA-1 over the lexicographically
//! sorted concatenation of `token`, `timestamp`, `nonce` and the encrypted
//! payload, hex encoded in lowercase.

use std::fmt::Write as _;

use ring::digest::{digest, SHA1_FOR_LEGACY_USE_ONLY};

/// Compute the 40-character hex signature for one callback.
pub fn sign(token: &str, timestamp: &str, nonce: &str, payload: &str) -> String {
    let mut parts = [token, timestamp, nonce, payload];
    parts.sort_unstable();

    let hash = digest(&SHA1_FOR_LEGACY_USE_ONLY, parts.concat().as_bytes());
    hash.as_ref()
        .iter()
        .fold(String::with_capacity(40), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}

/// Recompute the signature and compare it with the one the caller sent.
pub fn verify(signature: &str, timestamp: &str, nonce: &str, payload: &str, token: &str) -> bool {
    let expected = sign(token, timestamp, nonce, payload);
    ring::constant_time::verify_slices_are_equal(expected.as_bytes(), signature.as_bytes()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    // sha1("12abchello")
    const ABC_HELLO: &str = "99217efb6c1c895be7e0c65c61ee06048045841b";

    #[test]
    fn signs_sorted_concatenation() {
        let sig = sign("abc", "1", "2", "hello");
        assert_eq!(sig, ABC_HELLO);
        assert_eq!(sig.len(), 40);
    }

    #[test]
    fn argument_order_does_not_matter() {
        assert_eq!(sign("hello", "2", "abc", "1"), ABC_HELLO);
    }

    #[test]
    fn verify_accepts_exact_inputs() {
        assert!(verify(ABC_HELLO, "1", "2", "hello", "abc"));
    }

    #[test]
    fn verify_rejects_changed_payload() {
        assert!(!verify(ABC_HELLO, "1", "2", "hellp", "abc"));
    }

    #[test]
    fn flipping_any_field_breaks_verification() {
        let (token, ts, nonce, payload) = ("QDG6eK", "1409659813", "263014780", "c2VjcmV0");
        let sig = sign(token, ts, nonce, payload);
        assert!(verify(&sig, ts, nonce, payload, token));

        assert!(!verify(&sig, ts, nonce, payload, "QDG6eL"));
        assert!(!verify(&sig, "1409659814", nonce, payload, token));
        assert!(!verify(&sig, ts, "263014781", payload, token));
        assert!(!verify(&sig, ts, nonce, "c2VjcmV1", token));

        let mut tampered = sig.clone().into_bytes();
        tampered[0] = if tampered[0] == b'0' { b'1' } else { b'0' };
        let tampered = String::from_utf8(tampered).expect("ascii");
        assert!(!verify(&tampered, ts, nonce, payload, token));
    }

    #[test]
    fn verify_rejects_truncated_signature() {
        assert!(!verify(&ABC_HELLO[..39], "1", "2", "hello", "abc"));
        assert!(!verify("", "1", "2", "hello", "abc"));
    }
}
