use async_trait::async_trait;

use crate::client::WxPayClient;
use crate::error::WxPayError;
use crate::model::order::OrderQueryResponse;
use crate::model::prepay::{JsapiPrepayRequest, JsapiPrepayResponse};

/// The gateway operations the order lifecycle drives.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn prepay(&self, req: &JsapiPrepayRequest) -> Result<JsapiPrepayResponse, WxPayError>;

    async fn query_order(&self, out_trade_no: &str) -> Result<OrderQueryResponse, WxPayError>;

    async fn close_order(&self, out_trade_no: &str) -> Result<(), WxPayError>;
}

#[async_trait]
impl PaymentGateway for WxPayClient {
    async fn prepay(&self, req: &JsapiPrepayRequest) -> Result<JsapiPrepayResponse, WxPayError> {
        self.jsapi_prepay(req).await
    }

    async fn query_order(&self, out_trade_no: &str) -> Result<OrderQueryResponse, WxPayError> {
        self.query_order_by_out_trade_no(out_trade_no).await
    }

    async fn close_order(&self, out_trade_no: &str) -> Result<(), WxPayError> {
        WxPayClient::close_order(self, out_trade_no).await
    }
}
