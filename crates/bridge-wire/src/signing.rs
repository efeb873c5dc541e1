//! HMAC-SHA256 command signing.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Computes the lowercase hex HMAC-SHA256 digest of `data` keyed by `token`.
///
/// `data` must be exactly the canonical string that will also travel on the
/// wire in the `data` field (see [`crate::canonical::canonical_json`]) —
/// signing a re-serialized copy risks a byte mismatch between signer and
/// verifier.
#[must_use]
pub fn sign(token: &str, data: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(token.as_bytes()).expect("HMAC accepts any key length");
    mac.update(data.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verifies `signature` against `data` signed with `token`.
#[must_use]
pub fn verify(token: &str, data: &str, signature: &str) -> bool {
    sign(token, data).eq_ignore_ascii_case(signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_signing_round_trips_with_pinned_timestamp() {
        let data = r#"{"type":"device.command","tool":"read","args":{},"request_id":"rid-1","timestamp":1700000000}"#;
        let sig = sign("topsecret", data);
        assert!(verify("topsecret", data, &sig));
        assert!(!verify("wrong-token", data, &sig));
    }

    #[test]
    fn verify_rejects_tampered_data() {
        let data = r#"{"tool":"read"}"#;
        let sig = sign("secret", data);
        assert!(!verify("secret", r#"{"tool":"write"}"#, &sig));
    }
}
