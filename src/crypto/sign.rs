use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rsa::{
    pkcs1::DecodeRsaPrivateKey,
    pkcs1v15::SigningKey,
    pkcs8::DecodePrivateKey,
    sha2::Sha256,
    signature::{RandomizedSigner, SignatureEncoding},
    RsaPrivateKey,
};

use crate::error::WxPayError;

/// Sign type reported to the client alongside `paySign`.
pub const SIGN_TYPE_RSA: &str = "RSA";

const NONCE_LENGTH: usize = 24;

/// Parse the merchant private key, accepting PKCS#1 or PKCS#8 PEM.
pub fn signing_key_from_pem(pem: &str) -> Result<SigningKey<Sha256>, WxPayError> {
    let private_key = RsaPrivateKey::from_pkcs1_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
        .map_err(|e| WxPayError::InvalidKey(format!("parse private key: {e}")))?;
    Ok(SigningKey::<Sha256>::new(private_key))
}

/// Build the signing message per WeChat Pay V3 spec.
///
/// Format: `"{method}\n{url_path}\n{timestamp}\n{nonce}\n{body}\n"`
///
/// - `method`: HTTP method, e.g. "GET", "POST"
/// - `url_path`: absolute path with query string, e.g. "/v3/pay/transactions/jsapi"
/// - `timestamp`: Unix timestamp in seconds
/// - `nonce`: random string
/// - `body`: request body (empty string for GET)
pub fn build_sign_message(
    method: &str,
    url_path: &str,
    timestamp: i64,
    nonce: &str,
    body: &str,
) -> String {
    format!("{method}\n{url_path}\n{timestamp}\n{nonce}\n{body}\n")
}

/// Sign the message using SHA256withRSA (PKCS1v15) and return base64-encoded signature.
pub fn sign_sha256_rsa(
    signing_key: &SigningKey<Sha256>,
    message: &str,
) -> Result<String, WxPayError> {
    let mut rng = rand::thread_rng();
    let signature = signing_key.sign_with_rng(&mut rng, message.as_bytes());
    Ok(BASE64.encode(signature.to_bytes()))
}

/// Build the message a client-side payment invocation is signed over.
///
/// Format: `"{app_id}\n{timestamp}\n{nonce}\n{package}\n"`
pub fn build_pay_sign_message(app_id: &str, timestamp: i64, nonce: &str, package: &str) -> String {
    format!("{app_id}\n{timestamp}\n{nonce}\n{package}\n")
}

/// Produce the `paySign` value a client needs to complete a JSAPI payment.
pub fn sign_payment(
    signing_key: &SigningKey<Sha256>,
    app_id: &str,
    timestamp: i64,
    nonce: &str,
    package: &str,
) -> Result<String, WxPayError> {
    let message = build_pay_sign_message(app_id, timestamp, nonce, package);
    sign_sha256_rsa(signing_key, &message)
}

/// Random alphanumeric nonce for payment signatures.
pub fn generate_nonce() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LENGTH)
        .map(char::from)
        .collect()
}

/// Build the complete Authorization header value.
///
/// Format: `WECHATPAY2-SHA256-RSA2048 mchid="...",nonce_str="...",timestamp="...",serial_no="...",signature="..."`
pub fn build_authorization_header(
    mch_id: &str,
    serial_no: &str,
    timestamp: i64,
    nonce: &str,
    signature: &str,
) -> String {
    format!(
        r#"WECHATPAY2-SHA256-RSA2048 mchid="{mch_id}",nonce_str="{nonce}",timestamp="{timestamp}",serial_no="{serial_no}",signature="{signature}""#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_sign_message() {
        assert_eq!(
            build_sign_message("POST", "/v3/pay/transactions/jsapi", 1554208460, "n1", r#"{"appid":"wx1"}"#),
            "POST\n/v3/pay/transactions/jsapi\n1554208460\nn1\n{\"appid\":\"wx1\"}\n"
        );
        // GET requests sign an empty body line.
        assert_eq!(
            build_sign_message("GET", "/v3/certificates", 1554208460, "n1", ""),
            "GET\n/v3/certificates\n1554208460\nn1\n\n"
        );
    }

    #[test]
    fn test_build_authorization_header() {
        let header =
            build_authorization_header("1900000001", "SERIAL123", 1554208460, "nonce123", "sig==");
        assert!(header.starts_with("WECHATPAY2-SHA256-RSA2048 "));
        assert!(header.contains(r#"mchid="1900000001""#));
        assert!(header.contains(r#"serial_no="SERIAL123""#));
        assert!(header.contains(r#"timestamp="1554208460""#));
        assert!(header.contains(r#"nonce_str="nonce123""#));
        assert!(header.contains(r#"signature="sig==""#));
    }

    #[test]
    fn test_signing_key_from_pem_accepts_pkcs8() {
        use rsa::pkcs8::{EncodePrivateKey, LineEnding};

        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let pem = private_key.to_pkcs8_pem(LineEnding::LF).unwrap();
        assert!(signing_key_from_pem(&pem).is_ok());
    }

    #[test]
    fn test_signing_key_from_pem_rejects_garbage() {
        let err = signing_key_from_pem("not a key").err().unwrap();
        assert!(matches!(err, WxPayError::InvalidKey(_)));
    }

    #[test]
    fn test_build_pay_sign_message() {
        let msg = build_pay_sign_message("wx1", 1554208460, "abc", "prepay_id=wx201410272009395522657a690389285100");
        assert_eq!(
            msg,
            "wx1\n1554208460\nabc\nprepay_id=wx201410272009395522657a690389285100\n"
        );
    }

    #[test]
    fn test_generate_nonce_shape() {
        let a = generate_nonce();
        let b = generate_nonce();
        assert_eq!(a.len(), 24);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_sign_payment_verifies_with_public_key() {
        use rsa::pkcs1v15::VerifyingKey;
        use rsa::signature::Verifier;
        use rsa::{RsaPrivateKey, RsaPublicKey};

        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let public_key = RsaPublicKey::from(&private_key);
        let signing_key = SigningKey::<Sha256>::new(private_key);

        let sig_b64 = sign_payment(&signing_key, "wx1", 1700000000, "nonce", "prepay_id=p1").unwrap();

        let sig_bytes = BASE64.decode(&sig_b64).unwrap();
        let signature = rsa::pkcs1v15::Signature::try_from(sig_bytes.as_slice()).unwrap();
        let verifying_key = VerifyingKey::<Sha256>::new(public_key);
        let canonical = "wx1\n1700000000\nnonce\nprepay_id=p1\n";
        assert!(verifying_key.verify(canonical.as_bytes(), &signature).is_ok());
        // Any other message must not verify.
        assert!(verifying_key.verify(b"wx1\n1700000000\nnonce\nprepay_id=p2\n", &signature).is_err());
    }
}
