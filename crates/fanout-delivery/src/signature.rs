//! HMAC-SHA256 request signing for outbound webhooks.
//!
//! Subscribers with a configured secret receive an `X-Signature` header of
//! the form `sha256=<hex>` computed over the exact serialized request body,
//! so the receiver can verify both authenticity and body integrity.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Signs a payload with the subscription secret.
///
/// Returns `sha256=<hex HMAC-SHA256(secret, body)>`.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);

    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a `sha256=<hex>` signature against a payload.
///
/// Comparison happens in constant time via the MAC verifier.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let Some(hex_digest) = signature.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_rfc4231_test_vector() {
        // RFC 4231 test case 2: key "Jefe", data "what do ya want for nothing?"
        let signature = sign_payload("Jefe", b"what do ya want for nothing?");
        assert_eq!(
            signature,
            "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn signature_has_prefix_and_hex_digest() {
        let signature = sign_payload("secret", br#"{"type":"user.created"}"#);
        let digest = signature.strip_prefix("sha256=").expect("prefix");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signature_is_deterministic_and_secret_sensitive() {
        let body = br#"{"data":{"id":"1"}}"#;
        assert_eq!(sign_payload("s1", body), sign_payload("s1", body));
        assert_ne!(sign_payload("s1", body), sign_payload("s2", body));
    }

    #[test]
    fn verify_round_trips() {
        let body = br#"{"data":{"id":"1"}}"#;
        let signature = sign_payload("s1", body);

        assert!(verify_signature("s1", body, &signature));
        assert!(!verify_signature("s2", body, &signature));
        assert!(!verify_signature("s1", b"tampered", &signature));
        assert!(!verify_signature("s1", body, "sha256=nothex"));
        assert!(!verify_signature("s1", body, "v1=abcdef"));
    }
}
