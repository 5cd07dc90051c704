//! HMAC-SHA256 webhook payload signing.
//!
//! The signature header value is `sha256=<hex(HMAC-SHA256(secret, body))>`,
//! computed over the exact serialized body bytes that are sent.

use beacon_core::defaults::SIGNATURE_PREFIX;
use beacon_core::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac(secret: &str, body: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Internal(format!("invalid signing key: {}", e)))?;
    mac.update(body);
    Ok(mac)
}

/// Compute the signature header value for `body`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String> {
    let digest = mac(secret, body)?.finalize().into_bytes();
    Ok(format!("{}{}", SIGNATURE_PREFIX, hex::encode(digest)))
}

/// Verify a received signature header value in constant time.
pub fn verify(secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(hex_part) = header_value.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_part) else {
        return false;
    };
    match mac(secret, body) {
        Ok(mac) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_format() {
        let sig = sign("my-secret", br#"{"data":[],"paging":{"total":0}}"#).unwrap();
        assert!(sig.starts_with("sha256="));
        let hex_part = &sig["sha256=".len()..];
        assert_eq!(hex_part.len(), 64);
        assert!(hex_part.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_signature_rfc4231_vector() {
        // RFC 4231 test case 2.
        let sig = sign("Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "sha256=5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_signature_deterministic_and_key_dependent() {
        let body = br#"{"data":[{"eventType":"entityUpdated"}]}"#;
        assert_eq!(sign("secret", body).unwrap(), sign("secret", body).unwrap());
        assert_ne!(sign("secret", body).unwrap(), sign("other-secret", body).unwrap());
    }

    #[test]
    fn test_one_byte_change_invalidates_signature() {
        let body = br#"{"data":[{"entityType":"table"}],"paging":{"total":1}}"#.to_vec();
        let sig = sign("secret", &body).unwrap();
        assert!(verify("secret", &body, &sig));

        let mut tampered = body.clone();
        tampered[10] ^= 0x01;
        assert!(!verify("secret", &tampered, &sig));
    }

    #[test]
    fn test_verify_rejects_malformed_headers() {
        let body = b"{}";
        let sig = sign("secret", body).unwrap();
        assert!(!verify("secret", body, &sig["sha256=".len()..]));
        assert!(!verify("secret", body, "sha256=not-hex"));
        assert!(!verify("wrong", body, &sig));
    }
}
