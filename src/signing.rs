//! Slack request signing and verification using HMAC-SHA256.
//!
//! Slack signs event callbacks with a shared secret over the string
//! `v0:<timestamp>:<body>` and sends the result in the `X-Slack-Signature`
//! header as `v0=<hex>`, with the timestamp in `X-Slack-Request-Timestamp`.
//!
//! Verification is the first step in event processing; a request with a bad
//! or stale signature must be rejected before any parsing happens. Returned
//! errors are meant to be logged, never echoed back to the caller.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the timestamp used when generating the signature.
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";

/// Header carrying the generated HMAC signature.
pub const SIGNATURE_HEADER: &str = "x-slack-signature";

/// Maximum age of a request timestamp, in seconds.
const MAX_TIMESTAMP_AGE_SECS: i64 = 300;

/// Errors that can occur during signature verification.
#[derive(Debug, Error)]
pub enum SignatureError {
    /// The timestamp header was missing or empty.
    #[error("{TIMESTAMP_HEADER} header not present")]
    MissingTimestamp,

    /// The signature header was missing or empty.
    #[error("{SIGNATURE_HEADER} header not present")]
    MissingSignature,

    /// The timestamp header was not an integer.
    #[error("failed to parse {TIMESTAMP_HEADER} header: {0}")]
    MalformedTimestamp(#[source] std::num::ParseIntError),

    /// The timestamp was more than five minutes old.
    #[error("request timestamp ({0}) too old")]
    StaleTimestamp(i64),

    /// The provided signature did not match the computed one.
    #[error("signature does not match")]
    Mismatch,
}

/// The pieces of an HTTP request needed to validate its signature.
///
/// This is taken instead of a full request type so callers remain
/// responsible for body buffering.
#[derive(Debug, Clone)]
pub struct SignedRequest<'a> {
    /// The `X-Slack-Request-Timestamp` header value.
    pub timestamp: &'a str,

    /// The `X-Slack-Signature` header value (the provided HMAC signature).
    pub signature: &'a str,

    /// The raw request body.
    pub body: &'a [u8],
}

/// Computes the `v0=<hex>` signature for a timestamp and body.
///
/// This is the signing half of the scheme, used by tests and by anything
/// that needs to produce requests a verifier will trust.
pub fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(format!("v0:{timestamp}:").as_bytes());
    mac.update(body);
    format!("v0={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a request signature against the signing secret.
///
/// Checks, in order: both headers present, the timestamp parses and is no
/// more than 300 seconds old, and the signature matches. The comparison is
/// constant-time via the HMAC library.
pub fn verify(secret: &str, request: &SignedRequest<'_>) -> Result<(), SignatureError> {
    verify_at(secret, request, chrono::Utc::now().timestamp())
}

/// Verification with an explicit "now", so freshness is testable.
pub fn verify_at(
    secret: &str,
    request: &SignedRequest<'_>,
    now: i64,
) -> Result<(), SignatureError> {
    if request.timestamp.is_empty() {
        return Err(SignatureError::MissingTimestamp);
    }

    if request.signature.is_empty() {
        return Err(SignatureError::MissingSignature);
    }

    let ts: i64 = request
        .timestamp
        .parse()
        .map_err(SignatureError::MalformedTimestamp)?;

    if now - ts > MAX_TIMESTAMP_AGE_SECS {
        return Err(SignatureError::StaleTimestamp(ts));
    }

    // Strip the scheme prefix and decode; a malformed header can never match.
    let provided = request
        .signature
        .strip_prefix("v0=")
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
        .ok_or(SignatureError::Mismatch)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(format!("v0:{ts}:").as_bytes());
    mac.update(request.body);

    // Constant-time comparison via the HMAC library.
    mac.verify_slice(&provided)
        .map_err(|_| SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn signed<'a>(timestamp: &'a str, signature: &'a str, body: &'a [u8]) -> SignedRequest<'a> {
        SignedRequest {
            timestamp,
            signature,
            body,
        }
    }

    // ========================================================================
    // Unit tests for known vectors and edge cases
    // ========================================================================

    #[test]
    fn sign_produces_v0_prefixed_hex() {
        let sig = sign("secret", 1_531_420_618, b"hello");
        assert!(sig.starts_with("v0="));
        assert_eq!(sig.len(), 3 + 64); // "v0=" + 64 hex chars (32 bytes)
        assert!(sig[3..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    /// Known vector from Slack's request-signing documentation.
    ///
    /// <https://api.slack.com/authentication/verifying-requests-from-slack>
    #[test]
    fn slack_documentation_example() {
        let secret = "8f742231b10e8888abcd99yyyzzz85a5";
        let body = b"token=xyzz0WbapA4vBCDEFasx0q6G&team_id=T1DC2JH3J&team_domain=testteamnow&channel_id=G8PSS9T3V&channel_name=foobar&user_id=U2CERLKJA&user_name=roadrunner&command=%2Fwebhook-collect&text=&response_url=https%3A%2F%2Fhooks.slack.com%2Fcommands%2FT1DC2JH3J%2F397700885554%2F96rGlfmibIGlgcZRskXaIFfN&trigger_id=398738663015.47445629121.803a0bc887a14d10d2c447fce8b6703c";
        let ts = 1_531_420_618;

        let sig = sign(secret, ts, body);
        assert_eq!(
            sig,
            "v0=a2114d57b48eac39b9ad189dd8316235a7b4a8d21a10bd27519666489c69b503"
        );
    }

    #[test]
    fn verify_accepts_fresh_signed_request() {
        let secret = "test-secret";
        let ts = 1_700_000_000;
        let body = b"{\"type\":\"event_callback\"}";
        let sig = sign(secret, ts, body);

        let req = signed("1700000000", &sig, body);
        assert!(verify_at(secret, &req, ts).is_ok());
    }

    #[test]
    fn verify_accepts_timestamp_at_tolerance_boundary() {
        let secret = "test-secret";
        let ts = 1_700_000_000;
        let sig = sign(secret, ts, b"body");

        let req = signed("1700000000", &sig, b"body");
        assert!(verify_at(secret, &req, ts + 300).is_ok());
    }

    #[test]
    fn verify_rejects_stale_timestamp() {
        let secret = "test-secret";
        let ts = 1_700_000_000;
        let sig = sign(secret, ts, b"body");

        let req = signed("1700000000", &sig, b"body");
        let err = verify_at(secret, &req, ts + 301).unwrap_err();
        assert!(matches!(err, SignatureError::StaleTimestamp(_)));
    }

    #[test]
    fn verify_rejects_missing_headers() {
        let sig = sign("s", 1, b"body");

        let err = verify_at("s", &signed("", &sig, b"body"), 1).unwrap_err();
        assert!(matches!(err, SignatureError::MissingTimestamp));

        let err = verify_at("s", &signed("1", "", b"body"), 1).unwrap_err();
        assert!(matches!(err, SignatureError::MissingSignature));
    }

    #[test]
    fn verify_rejects_non_integer_timestamp() {
        let err = verify_at("s", &signed("yesterday", "v0=00", b""), 0).unwrap_err();
        assert!(matches!(err, SignatureError::MalformedTimestamp(_)));
    }

    #[test]
    fn verify_rejects_mutated_body() {
        let secret = "test-secret";
        let ts = 1_700_000_000;
        let sig = sign(secret, ts, b"original");

        let req = signed("1700000000", &sig, b"modified");
        let err = verify_at(secret, &req, ts).unwrap_err();
        assert!(matches!(err, SignatureError::Mismatch));
    }

    #[test]
    fn verify_rejects_mutated_signature() {
        let secret = "test-secret";
        let ts = 1_700_000_000;
        let mut sig = sign(secret, ts, b"body");
        // flip the last hex digit
        let last = sig.pop().unwrap();
        sig.push(if last == '0' { '1' } else { '0' });

        let req = signed("1700000000", &sig, b"body");
        let err = verify_at(secret, &req, ts).unwrap_err();
        assert!(matches!(err, SignatureError::Mismatch));
    }

    #[test]
    fn verify_rejects_wrong_scheme_prefix() {
        let secret = "test-secret";
        let ts = 1_700_000_000;
        let sig = sign(secret, ts, b"body").replacen("v0=", "v1=", 1);

        let req = signed("1700000000", &sig, b"body");
        assert!(matches!(
            verify_at(secret, &req, ts),
            Err(SignatureError::Mismatch)
        ));
    }

    #[test]
    fn verify_rejects_garbage_hex() {
        let req = signed("1700000000", "v0=zzzz", b"body");
        assert!(matches!(
            verify_at("s", &req, 1_700_000_000),
            Err(SignatureError::Mismatch)
        ));
    }

    #[test]
    fn verify_accepts_empty_body_and_secret() {
        let sig = sign("", 42, b"");
        let req = signed("42", &sig, b"");
        assert!(verify_at("", &req, 42).is_ok());
    }

    // ========================================================================
    // Property-based tests
    // ========================================================================

    proptest! {
        /// For any secret, timestamp, and body, signing and then verifying
        /// with the same secret succeeds while the request is fresh.
        #[test]
        fn prop_sign_verify_roundtrip(
            secret in ".*",
            ts in 0i64..=i64::MAX / 2,
            body: Vec<u8>,
            skew in 0i64..=300,
        ) {
            let sig = sign(&secret, ts, &body);
            let timestamp = ts.to_string();
            let req = signed(&timestamp, &sig, &body);
            prop_assert!(verify_at(&secret, &req, ts + skew).is_ok());
        }

        /// Signing with one secret and verifying with another fails.
        #[test]
        fn prop_wrong_secret_fails(
            secret1 in ".+",
            secret2 in ".+",
            ts in 0i64..=i64::MAX / 2,
            body: Vec<u8>,
        ) {
            prop_assume!(secret1 != secret2);

            let sig = sign(&secret1, ts, &body);
            let timestamp = ts.to_string();
            let req = signed(&timestamp, &sig, &body);
            prop_assert!(verify_at(&secret2, &req, ts).is_err());
        }

        /// Any modification to the body causes verification to fail.
        #[test]
        fn prop_modified_body_fails(
            secret in ".*",
            ts in 0i64..=i64::MAX / 2,
            original: Vec<u8>,
            modified: Vec<u8>,
        ) {
            prop_assume!(original != modified);

            let sig = sign(&secret, ts, &original);
            let timestamp = ts.to_string();
            let req = signed(&timestamp, &sig, &modified);
            prop_assert!(verify_at(&secret, &req, ts).is_err());
        }

        /// Verification never panics, whatever the header contents.
        #[test]
        fn prop_garbage_headers_no_panic(
            secret in ".*",
            timestamp in ".*",
            signature in ".*",
            body: Vec<u8>,
        ) {
            let req = signed(&timestamp, &signature, &body);
            let _ = verify_at(&secret, &req, 0);
        }
    }
}
