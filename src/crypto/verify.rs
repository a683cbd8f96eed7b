use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::sha2::Sha256;
use rsa::signature::Verifier;

use crate::error::WxPayError;
use crate::model::notify::NotifyHeaders;

/// Maximum clock skew accepted between a signed timestamp and local time.
pub const MAX_TIMESTAMP_SKEW_SECS: i64 = 300;

/// `"{timestamp}\n{nonce}\n{body}\n"`, the string gateway replies and
/// webhook deliveries are signed over.
pub fn build_verify_message(timestamp: &str, nonce: &str, body: &str) -> String {
    format!("{timestamp}\n{nonce}\n{body}\n")
}

/// Check the SHA256withRSA `Wechatpay-Signature` of `body` with a platform key.
pub fn verify_signature(
    verifying_key: &VerifyingKey<Sha256>,
    headers: &NotifyHeaders,
    body: &str,
) -> Result<(), WxPayError> {
    let raw = BASE64
        .decode(&headers.signature)
        .map_err(|e| WxPayError::VerifyError(format!("base64 decode: {e}")))?;
    let signature = Signature::try_from(raw.as_slice())
        .map_err(|e| WxPayError::VerifyError(format!("invalid signature: {e}")))?;

    let message = build_verify_message(&headers.timestamp, &headers.nonce, body);
    verifying_key
        .verify(message.as_bytes(), &signature)
        .map_err(|_| WxPayError::VerifyError("signature verification failed".into()))
}

/// Reject signed timestamps that are not numeric or are outside the
/// ±`MAX_TIMESTAMP_SKEW_SECS` window around `now`.
pub fn check_timestamp_freshness(timestamp: &str, now: i64) -> Result<(), WxPayError> {
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| WxPayError::VerifyError(format!("invalid timestamp: {timestamp}")))?;
    let skew = now.abs_diff(ts);
    if skew > MAX_TIMESTAMP_SKEW_SECS.unsigned_abs() {
        return Err(WxPayError::VerifyError(format!(
            "timestamp outside window: skew={skew}s"
        )));
    }
    Ok(())
}
