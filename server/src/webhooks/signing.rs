//! HMAC-SHA256 Webhook Signatures
//!
//! Verifies inbound payloads for the two schemes we accept:
//! - social platform: `sha256=<hex>` over the raw body
//! - payment provider: `t=<unix>,v1=<hex>` over `"<t>.<raw body>"`, with a
//!   freshness window on `t`

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Prefix carried by the social platform signature header.
pub const PLATFORM_SIGNATURE_PREFIX: &str = "sha256=";

/// Default maximum age of a payment signature timestamp.
pub const DEFAULT_PAYMENT_TOLERANCE_SECS: i64 = 300;

/// Sign a payload with HMAC-SHA256 and return the hex-encoded signature.
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time byte comparison.
pub(crate) fn constant_time_eq(expected: &[u8], provided: &[u8]) -> bool {
    expected.len() == provided.len()
        && expected
            .iter()
            .zip(provided)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Verify a social platform signature header (`sha256=<hex>`).
pub fn verify_platform_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(provided) = header.trim().strip_prefix(PLATFORM_SIGNATURE_PREFIX) else {
        return false;
    };
    let expected = sign_payload(secret, body);
    constant_time_eq(expected.as_bytes(), provided.to_ascii_lowercase().as_bytes())
}

/// Why a payment signature header was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaymentSignatureError {
    #[error("signature header is malformed")]
    Malformed,
    #[error("signature header has no timestamp")]
    MissingTimestamp,
    #[error("signature header has no v1 signature")]
    MissingSignature,
    #[error("signature timestamp is outside the tolerance ({age_secs}s)")]
    Stale { age_secs: i64 },
    #[error("no v1 signature matches the payload")]
    Mismatch,
}

/// Build the signed payload for the payment scheme: `"<t>.<body>"`.
fn payment_signed_payload(timestamp: i64, body: &[u8]) -> Vec<u8> {
    let prefix = format!("{timestamp}.");
    let mut signed = Vec::with_capacity(prefix.len() + body.len());
    signed.extend_from_slice(prefix.as_bytes());
    signed.extend_from_slice(body);
    signed
}

/// Sign a payment payload and return a complete header value.
pub fn sign_payment_payload(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let signature = sign_payload(secret, &payment_signed_payload(timestamp, body));
    format!("t={timestamp},v1={signature}")
}

/// Verify a payment provider signature header (`t=...,v1=...[,v1=...]`).
///
/// Any of several `v1` entries may match (the provider sends more than one
/// while a secret is being rolled). The timestamp must be within
/// `tolerance_secs` of `now_unix` in either direction.
pub fn verify_payment_signature(
    secret: &str,
    body: &[u8],
    header: &str,
    tolerance_secs: i64,
    now_unix: i64,
) -> Result<(), PaymentSignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        let (key, value) = part
            .trim()
            .split_once('=')
            .ok_or(PaymentSignatureError::Malformed)?;
        match key {
            "t" => {
                timestamp = Some(
                    value
                        .parse()
                        .map_err(|_| PaymentSignatureError::Malformed)?,
                );
            }
            "v1" => signatures.push(value),
            // v0 and future schemes are ignored
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(PaymentSignatureError::MissingTimestamp)?;
    if signatures.is_empty() {
        return Err(PaymentSignatureError::MissingSignature);
    }

    let age_secs = now_unix - timestamp;
    if age_secs.abs() > tolerance_secs {
        return Err(PaymentSignatureError::Stale { age_secs });
    }

    let expected = sign_payload(secret, &payment_signed_payload(timestamp, body));
    if signatures
        .iter()
        .any(|sig| constant_time_eq(expected.as_bytes(), sig.as_bytes()))
    {
        Ok(())
    } else {
        Err(PaymentSignatureError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test_secret_12345";

    #[test]
    fn platform_sign_and_verify() {
        let body = br#"{"object":"instagram","entry":[]}"#;
        let header = format!("sha256={}", sign_payload(SECRET, body));
        assert!(verify_platform_signature(SECRET, body, &header));
        assert!(!verify_platform_signature("wrong_secret", body, &header));
    }

    #[test]
    fn platform_rejects_any_flipped_bit() {
        let body = b"hello world".to_vec();
        let header = format!("sha256={}", sign_payload(SECRET, &body));

        for byte in 0..body.len() {
            for bit in 0..8 {
                let mut tampered = body.clone();
                tampered[byte] ^= 1 << bit;
                assert!(
                    !verify_platform_signature(SECRET, &tampered, &header),
                    "flipping bit {bit} of byte {byte} was accepted"
                );
            }
        }
    }

    #[test]
    fn platform_requires_prefix() {
        let body = b"payload";
        let bare = sign_payload(SECRET, body);
        assert!(!verify_platform_signature(SECRET, body, &bare));
        assert!(!verify_platform_signature(SECRET, body, ""));
        assert!(!verify_platform_signature(SECRET, body, "sha1=abcdef"));
    }

    #[test]
    fn platform_accepts_uppercase_hex() {
        let body = b"payload";
        let header = format!("sha256={}", sign_payload(SECRET, body).to_uppercase());
        assert!(verify_platform_signature(SECRET, body, &header));
    }

    #[test]
    fn payment_sign_and_verify() {
        let body = br#"{"id":"evt_1","type":"invoice.paid"}"#;
        let now = 1_700_000_000;
        let header = sign_payment_payload(SECRET, now, body);
        assert_eq!(
            verify_payment_signature(SECRET, body, &header, 300, now + 10),
            Ok(())
        );
        assert_eq!(
            verify_payment_signature(SECRET, b"{}", &header, 300, now),
            Err(PaymentSignatureError::Mismatch)
        );
    }

    #[test]
    fn payment_rejects_stale_timestamp_even_with_valid_signature() {
        let body = b"{}";
        let signed_at = 1_700_000_000;
        let header = sign_payment_payload(SECRET, signed_at, body);

        assert_eq!(
            verify_payment_signature(SECRET, body, &header, 300, signed_at + 301),
            Err(PaymentSignatureError::Stale { age_secs: 301 })
        );
        assert!(verify_payment_signature(SECRET, body, &header, 300, signed_at + 300).is_ok());
    }

    #[test]
    fn payment_accepts_any_matching_v1() {
        let body = b"{}";
        let now = 1_700_000_000;
        let good = sign_payment_payload(SECRET, now, body);
        let good_sig = good.split_once(",v1=").map(|(_, s)| s).unwrap();
        let header = format!("t={now},v1=deadbeef,v0=ignored,v1={good_sig}");
        assert!(verify_payment_signature(SECRET, body, &header, 300, now).is_ok());
    }

    #[test]
    fn payment_malformed_headers() {
        assert_eq!(
            verify_payment_signature(SECRET, b"{}", "garbage", 300, 0),
            Err(PaymentSignatureError::Malformed)
        );
        assert_eq!(
            verify_payment_signature(SECRET, b"{}", "v1=abc", 300, 0),
            Err(PaymentSignatureError::MissingTimestamp)
        );
        assert_eq!(
            verify_payment_signature(SECRET, b"{}", "t=5", 300, 5),
            Err(PaymentSignatureError::MissingSignature)
        );
        assert_eq!(
            verify_payment_signature(SECRET, b"{}", "t=abc,v1=00", 300, 0),
            Err(PaymentSignatureError::Malformed)
        );
    }
}
