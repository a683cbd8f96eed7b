use serde::{Deserialize, Serialize};

use super::common::Payer;

#[derive(Debug, Clone, Deserialize)]
pub struct OrderQueryResponse {
    pub appid: String,
    pub mchid: String,
    pub out_trade_no: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
    pub trade_state: String,
    #[serde(default)]
    pub trade_state_desc: String,
    #[serde(default)]
    pub trade_type: Option<String>,
    #[serde(default)]
    pub bank_type: Option<String>,
    #[serde(default)]
    pub success_time: Option<String>,
    #[serde(default)]
    pub amount: Option<OrderAmount>,
    #[serde(default)]
    pub payer: Option<Payer>,
    #[serde(default)]
    pub attach: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderAmount {
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub payer_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payer_currency: Option<String>,
}

/// Payment state of one trade as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusView {
    pub app_id: String,
    pub trade_id: String,
    pub trade_state: String,
    pub transaction_id: Option<String>,
    pub trade_type: Option<String>,
    pub success_time: Option<String>,
}

impl From<OrderQueryResponse> for PaymentStatusView {
    fn from(resp: OrderQueryResponse) -> Self {
        Self {
            app_id: resp.appid,
            trade_id: resp.out_trade_no,
            trade_state: resp.trade_state,
            transaction_id: resp.transaction_id,
            trade_type: resp.trade_type,
            success_time: resp.success_time,
        }
    }
}
