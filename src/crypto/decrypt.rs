use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::error::WxPayError;
use crate::model::notify::NotifyResource;

/// The only resource encryption algorithm the gateway uses.
pub const AEAD_AES_256_GCM: &str = "AEAD_AES_256_GCM";

const NONCE_LEN: usize = 12;

/// Open a sealed `resource` block (webhook payload or platform certificate).
pub fn decrypt_resource(api_v3_key: &str, resource: &NotifyResource) -> Result<String, WxPayError> {
    if resource.algorithm != AEAD_AES_256_GCM {
        return Err(WxPayError::DecryptError(format!(
            "unsupported algorithm: {}",
            resource.algorithm
        )));
    }
    decrypt_aes_256_gcm(
        api_v3_key,
        &resource.nonce,
        &resource.associated_data,
        &resource.ciphertext,
    )
}

/// AES-256-GCM open with the API v3 key used verbatim as the 32-byte key.
/// `ciphertext_base64` carries the 16-byte tag at its end.
pub fn decrypt_aes_256_gcm(
    api_v3_key: &str,
    nonce: &str,
    associated_data: &str,
    ciphertext_base64: &str,
) -> Result<String, WxPayError> {
    let cipher = Aes256Gcm::new_from_slice(api_v3_key.as_bytes()).map_err(|_| {
        WxPayError::DecryptError(format!(
            "api_v3_key must be 32 bytes, got {}",
            api_v3_key.len()
        ))
    })?;

    if nonce.len() != NONCE_LEN {
        return Err(WxPayError::DecryptError(format!(
            "nonce must be {NONCE_LEN} bytes, got {}",
            nonce.len()
        )));
    }

    let sealed = BASE64
        .decode(ciphertext_base64)
        .map_err(|e| WxPayError::DecryptError(format!("base64 decode: {e}")))?;

    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce.as_bytes()),
            Payload {
                msg: &sealed,
                aad: associated_data.as_bytes(),
            },
        )
        .map_err(|_| WxPayError::DecryptError("authentication failed".into()))?;

    String::from_utf8(plaintext).map_err(|e| WxPayError::DecryptError(format!("utf8 decode: {e}")))
}
