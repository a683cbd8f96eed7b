use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::cert::PlatformCertManager;
use crate::client::{current_timestamp, WxPayClient};
use crate::crypto::decrypt::decrypt_resource;
use crate::error::WxPayError;
use crate::model::notify::{NotifyEnvelope, NotifyHeaders, TransactionNotify};

/// Why a webhook delivery was rejected. Every variant is answered with a 4xx ack.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("bad notification: {0}")]
    BadRequest(String),

    #[error("decrypt notification resource: {0}")]
    Decryption(#[source] WxPayError),

    #[error("parse notification: {0}")]
    Parse(String),

    #[error("verify notification: {0}")]
    Verification(#[source] WxPayError),
}

/// Parse the raw webhook body into its envelope.
pub fn parse_envelope(body: &str) -> Result<NotifyEnvelope, NotifyError> {
    serde_json::from_str(body).map_err(|e| NotifyError::Parse(format!("envelope: {e}")))
}

/// Decrypts and parses the `resource` of a transaction notification.
#[derive(Clone)]
pub struct NotificationCodec {
    api_v3_key: String,
}

impl NotificationCodec {
    pub fn new(api_v3_key: impl Into<String>) -> Self {
        Self {
            api_v3_key: api_v3_key.into(),
        }
    }

    pub fn decode(&self, envelope: &NotifyEnvelope) -> Result<TransactionNotify, NotifyError> {
        let resource = envelope
            .resource
            .as_ref()
            .ok_or_else(|| NotifyError::BadRequest("empty resource".into()))?;

        debug!(notify_id = %envelope.id, "decrypting notification resource");
        let plaintext =
            decrypt_resource(&self.api_v3_key, resource).map_err(NotifyError::Decryption)?;

        serde_json::from_str(&plaintext).map_err(|e| NotifyError::Parse(format!("resource: {e}")))
    }
}

/// Checks the `Wechatpay-*` signature headers of a webhook delivery.
#[async_trait]
pub trait NotifyVerifier: Send + Sync {
    async fn verify(&self, headers: &NotifyHeaders, body: &str) -> Result<(), WxPayError>;
}

#[async_trait]
impl NotifyVerifier for WxPayClient {
    async fn verify(&self, headers: &NotifyHeaders, body: &str) -> Result<(), WxPayError> {
        self.verify_notify_signature(headers, body).await
    }
}

#[async_trait]
impl NotifyVerifier for PlatformCertManager {
    async fn verify(&self, headers: &NotifyHeaders, body: &str) -> Result<(), WxPayError> {
        PlatformCertManager::verify(self, headers, body, current_timestamp())
    }
}
