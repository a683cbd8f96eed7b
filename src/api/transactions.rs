//! JSAPI transaction endpoints the order lifecycle drives.

use serde::Serialize;

use crate::client::{encode_path_segment, WxPayClient};
use crate::error::WxPayError;
use crate::model::order::OrderQueryResponse;
use crate::model::prepay::{JsapiPrepayRequest, JsapiPrepayResponse};

const JSAPI_PREPAY_PATH: &str = "/v3/pay/transactions/jsapi";

#[derive(Serialize)]
struct CloseBody<'a> {
    mchid: &'a str,
}

fn query_path(out_trade_no: &str, mch_id: &str) -> String {
    format!(
        "/v3/pay/transactions/out-trade-no/{}?mchid={}",
        encode_path_segment(out_trade_no),
        encode_path_segment(mch_id)
    )
}

fn close_path(out_trade_no: &str) -> String {
    format!(
        "/v3/pay/transactions/out-trade-no/{}/close",
        encode_path_segment(out_trade_no)
    )
}

impl WxPayClient {
    /// `POST /v3/pay/transactions/jsapi`
    pub async fn jsapi_prepay(
        &self,
        req: &JsapiPrepayRequest,
    ) -> Result<JsapiPrepayResponse, WxPayError> {
        self.post_json(JSAPI_PREPAY_PATH, req).await
    }

    /// `GET /v3/pay/transactions/out-trade-no/{out_trade_no}?mchid={mchid}`
    pub async fn query_order_by_out_trade_no(
        &self,
        out_trade_no: &str,
    ) -> Result<OrderQueryResponse, WxPayError> {
        self.get_json(&query_path(out_trade_no, self.mch_id())).await
    }

    /// `POST /v3/pay/transactions/out-trade-no/{out_trade_no}/close`, answered with 204.
    pub async fn close_order(&self, out_trade_no: &str) -> Result<(), WxPayError> {
        let body = CloseBody {
            mchid: self.mch_id(),
        };
        self.post_empty(&close_path(out_trade_no), &body).await
    }
}
