//! Webhook signature verification.
//!
//! Providers sign the raw request body with the integration's shared
//! secret. We recompute HMAC-SHA256 and accept either a `sha256=<hex>`
//! prefixed or a bare hex signature; older provider versions still send
//! HMAC-SHA1, which is kept as a fallback.

use crate::error::{Error, Result};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;
type HmacSha1 = Hmac<Sha1>;

fn hmac_sha256_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn hmac_sha1_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    ConstantTimeEq::ct_eq(a.as_bytes(), b.as_bytes()).into()
}

/// Verify a provider signature over the raw payload. Rejection happens
/// before any event state is created.
pub fn verify_signature(secret: &str, payload: &[u8], provided: &str) -> Result<()> {
    let provided = provided.trim();
    if provided.is_empty() {
        return Err(Error::Unauthorized("empty_webhook_signature".into()));
    }
    let bare = provided
        .strip_prefix("sha256=")
        .unwrap_or(provided)
        .to_lowercase();

    let expected = hmac_sha256_hex(secret, payload);
    if constant_time_eq(&bare, &expected) {
        return Ok(());
    }

    // Legacy HMAC-SHA1 senders.
    let legacy = provided.strip_prefix("sha1=").unwrap_or(provided).to_lowercase();
    let expected_sha1 = hmac_sha1_hex(secret, payload);
    if constant_time_eq(&legacy, &expected_sha1) {
        return Ok(());
    }

    Err(Error::Unauthorized("invalid_webhook_signature".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"event":"call_analyzed","call":{"call_id":"c1"}}"#;

    #[test]
    fn accepts_prefixed_and_bare_sha256() {
        let sig = hmac_sha256_hex(SECRET, BODY);
        assert!(verify_signature(SECRET, BODY, &sig).is_ok());
        assert!(verify_signature(SECRET, BODY, &format!("sha256={}", sig)).is_ok());
    }

    #[test]
    fn accepts_legacy_sha1() {
        let sig = hmac_sha1_hex(SECRET, BODY);
        assert!(verify_signature(SECRET, BODY, &sig).is_ok());
    }

    #[test]
    fn rejects_tampered_payloads() {
        let sig = hmac_sha256_hex(SECRET, BODY);
        let err = verify_signature(SECRET, b"{\"event\":\"other\"}", &sig).unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[test]
    fn rejects_wrong_secret() {
        let sig = hmac_sha256_hex("other_secret", BODY);
        assert!(verify_signature(SECRET, BODY, &sig).is_err());
    }
}
