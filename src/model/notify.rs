use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use super::common::Payer;
use super::order::OrderAmount;

/// Raw notification envelope from WeChat Pay callback POST body.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifyEnvelope {
    pub id: String,
    #[serde(default)]
    pub create_time: String,
    #[serde(default)]
    pub event_type: String,
    #[serde(default)]
    pub resource_type: String,
    #[serde(default)]
    pub resource: Option<NotifyResource>,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyResource {
    pub algorithm: String,
    pub ciphertext: String,
    pub nonce: String,
    #[serde(default)]
    pub associated_data: String,
    #[serde(default)]
    pub original_type: Option<String>,
}

/// Headers extracted from a WeChat Pay notification request.
#[derive(Debug, Clone)]
pub struct NotifyHeaders {
    pub timestamp: String,
    pub nonce: String,
    pub signature: String,
    pub serial: String,
}

impl NotifyHeaders {
    /// Returns `None` unless all four `Wechatpay-*` signature headers are present.
    pub fn from_header_map(headers: &HeaderMap) -> Option<Self> {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        Some(Self {
            timestamp: get("Wechatpay-Timestamp")?,
            nonce: get("Wechatpay-Nonce")?,
            signature: get("Wechatpay-Signature")?,
            serial: get("Wechatpay-Serial")?,
        })
    }
}

/// Decrypted transaction notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionNotify {
    pub appid: String,
    pub mchid: String,
    pub out_trade_no: String,
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default)]
    pub trade_type: String,
    pub trade_state: String,
    #[serde(default)]
    pub trade_state_desc: String,
    #[serde(default)]
    pub bank_type: String,
    #[serde(default)]
    pub success_time: String,
    #[serde(default)]
    pub payer: Payer,
    #[serde(default)]
    pub amount: OrderAmount,
    #[serde(default)]
    pub attach: Option<String>,
}

/// Acknowledgement body returned to the gateway for a webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyAck {
    pub code: String,
    pub message: String,
}

impl NotifyAck {
    pub fn success() -> Self {
        Self {
            code: "SUCCESS".into(),
            message: String::new(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            code: "FAIL".into(),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == "SUCCESS"
    }
}
