use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Local, SecondsFormat, TimeDelta};
use rsa::pkcs1v15::SigningKey;
use rsa::sha2::Sha256;
use tracing::{error, info, warn};

use crate::crypto::sign::{generate_nonce, sign_payment, SIGN_TYPE_RSA};
use crate::error::{ServiceError, StoreError};
use crate::gateway::PaymentGateway;
use crate::model::common::{Amount, Payer};
use crate::model::order::PaymentStatusView;
use crate::model::platform::{PaymentStatus, PlatformOrder};
use crate::model::prepay::{JsapiPrepayRequest, PaymentParams};
use crate::retry::{GatewayOp, RetryPolicy};
use crate::store::OrderStore;
use crate::trade_id::TradeIdGenerator;

/// Gateway codes that mean the order is already gone, so closing it succeeded.
const CLOSED_CODES: &[&str] = &["ORDERNOTEXIST", "ORDER_NOT_EXIST", "ORDER_CLOSED", "MCH_NOT_EXISTS"];

const MSG_CREATE_ORDER_FAILED: &str = "Failed to create platform-order.";
const MSG_SIGNATURE_FAILED: &str = "Failed to create payment signature.";
const MSG_EXPIRE_OUT_OF_RANGE: &str = "Payment expire time out of range.";

/// Merchant-level settings the lifecycle needs on every request.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub merchant_id: String,
    pub notify_url: String,
    pub supported_app_ids: HashSet<String>,
    pub payment_expire_minutes: i64,
}

#[derive(Debug, Clone, Default)]
pub struct PrepayOrderRequest {
    pub app_id: String,
    pub payer_uid: String,
    pub trade_id: String,
    pub item_description: String,
    pub item_amount_total: i64,
}

/// Drives an order from creation through prepay and payment signing, and
/// proxies status queries and closes to the gateway.
pub struct OrderLifecycleManager {
    gateway: Arc<dyn PaymentGateway>,
    orders: Arc<dyn OrderStore>,
    signing_key: Arc<SigningKey<Sha256>>,
    trade_ids: TradeIdGenerator,
    retry: RetryPolicy,
    settings: LifecycleSettings,
}

impl OrderLifecycleManager {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        orders: Arc<dyn OrderStore>,
        signing_key: Arc<SigningKey<Sha256>>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            gateway,
            orders,
            signing_key,
            trade_ids: TradeIdGenerator::new(),
            retry: RetryPolicy::default(),
            settings,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn create_trade_id(&self) -> String {
        self.trade_ids.next()
    }

    pub async fn create_prepay_order(
        &self,
        req: PrepayOrderRequest,
    ) -> Result<PaymentParams, ServiceError> {
        self.validate_prepay(&req)?;
        let trade_id = req.trade_id.as_str();

        let now = Local::now();
        let expire_at = TimeDelta::try_minutes(self.settings.payment_expire_minutes)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                error!(
                    trade_id,
                    minutes = self.settings.payment_expire_minutes,
                    "payment expire time out of range"
                );
                ServiceError::Internal(MSG_EXPIRE_OUT_OF_RANGE.into())
            })?;
        let order = PlatformOrder {
            app_id: req.app_id.clone(),
            merchant_id: self.settings.merchant_id.clone(),
            trade_id: req.trade_id.clone(),
            payer_uid: req.payer_uid.clone(),
            item_description: req.item_description.clone(),
            item_amount_total: req.item_amount_total,
            status: PaymentStatus::CreateOrder,
            expire_time: expire_at.timestamp(),
            create_time: now.timestamp(),
            update_time: now.timestamp(),
        };

        if let Err(e) = self.orders.add_platform_order(order).await {
            warn!(trade_id, error = %e, "failed to create platform order");
            // A duplicate belongs to an earlier request; leave its status alone.
            if !matches!(e, StoreError::Duplicate(_)) {
                self.set_status(trade_id, PaymentStatus::CreateOrderFailed).await;
            }
            return Err(ServiceError::Internal(MSG_CREATE_ORDER_FAILED.into()));
        }

        self.set_status(trade_id, PaymentStatus::CreatePrepay).await;
        let prepay_req = JsapiPrepayRequest {
            appid: req.app_id.clone(),
            mchid: self.settings.merchant_id.clone(),
            description: req.item_description.clone(),
            out_trade_no: req.trade_id.clone(),
            time_expire: Some(expire_at.to_rfc3339_opts(SecondsFormat::Secs, false)),
            notify_url: self.settings.notify_url.clone(),
            amount: Amount {
                total: req.item_amount_total,
                currency: None,
            },
            payer: Payer {
                openid: req.payer_uid.clone(),
            },
            attach: None,
        };

        let gateway = &self.gateway;
        let prepay_req = &prepay_req;
        let prepay = match self
            .retry
            .run(GatewayOp::Prepay, || gateway.prepay(prepay_req))
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                self.set_status(trade_id, PaymentStatus::CreatePrepayFailed).await;
                return Err(ServiceError::Internal(e.op.to_string()));
            }
        };
        self.set_status(trade_id, PaymentStatus::GotPrepayId).await;

        match self.sign(&req.app_id, &prepay.prepay_id).await {
            Some(params) => {
                self.set_status(trade_id, PaymentStatus::CreateSignature).await;
                info!(trade_id, "prepay order created");
                Ok(params)
            }
            None => {
                self.set_status(trade_id, PaymentStatus::CreateSignatureFailed).await;
                Err(ServiceError::Internal(MSG_SIGNATURE_FAILED.into()))
            }
        }
    }

    pub async fn query_status(&self, trade_id: &str) -> Result<PaymentStatusView, ServiceError> {
        if trade_id.is_empty() {
            return Err(ServiceError::InvalidArgument("Empty trade_id".into()));
        }

        let gateway = &self.gateway;
        self.retry
            .run(GatewayOp::Query, || gateway.query_order(trade_id))
            .await
            .map(PaymentStatusView::from)
            .map_err(|e| ServiceError::Internal(e.op.to_string()))
    }

    pub async fn close_order(&self, trade_id: &str) -> Result<(), ServiceError> {
        if trade_id.is_empty() {
            return Err(ServiceError::InvalidArgument("Empty trade_id".into()));
        }

        let gateway = &self.gateway;
        let result = self
            .retry
            .run(GatewayOp::Close, || gateway.close_order(trade_id))
            .await;

        match result {
            Ok(()) => {}
            Err(e) if e.api_code().is_some_and(|code| CLOSED_CODES.contains(&code)) => {
                info!(trade_id, code = e.api_code(), "order already closed");
            }
            Err(e) => {
                self.set_status(trade_id, PaymentStatus::CloseOrderFailed).await;
                return Err(ServiceError::Internal(e.op.to_string()));
            }
        }
        self.set_status(trade_id, PaymentStatus::CloseOrder).await;
        Ok(())
    }

    fn validate_prepay(&self, req: &PrepayOrderRequest) -> Result<(), ServiceError> {
        let invalid = |msg: &str| Err(ServiceError::InvalidArgument(msg.into()));
        if req.app_id.is_empty() {
            return invalid("Empty app_id");
        }
        if !self.settings.supported_app_ids.contains(&req.app_id) {
            return invalid("Unsupported app_id");
        }
        if req.payer_uid.is_empty() {
            return invalid("Empty payer_uid");
        }
        if req.trade_id.is_empty() {
            return invalid("Empty trade_id");
        }
        if req.item_description.is_empty() {
            return invalid("Empty item_description");
        }
        if req.item_amount_total <= 0 {
            return invalid("Invalid item_amount_total");
        }
        Ok(())
    }

    /// Sign the client payment parameters off the async workers.
    async fn sign(&self, app_id: &str, prepay_id: &str) -> Option<PaymentParams> {
        let timestamp = Local::now().timestamp();
        let nonce = generate_nonce();
        let package = format!("prepay_id={prepay_id}");

        let key = Arc::clone(&self.signing_key);
        let (app, n, pkg) = (app_id.to_string(), nonce.clone(), package.clone());
        let signed = tokio::task::spawn_blocking(move || sign_payment(&key, &app, timestamp, &n, &pkg)).await;

        match signed {
            Ok(Ok(pay_sign)) => Some(PaymentParams {
                timestamp,
                nonce,
                package,
                sign_type: SIGN_TYPE_RSA.to_string(),
                pay_sign,
            }),
            Ok(Err(e)) => {
                warn!(error = %e, "failed to sign payment");
                None
            }
            Err(e) => {
                warn!(error = %e, "payment signing task failed");
                None
            }
        }
    }

    async fn set_status(&self, trade_id: &str, status: PaymentStatus) {
        if let Err(e) = self.orders.update_status(trade_id, status).await {
            warn!(trade_id, %status, error = %e, "failed to update order status");
        }
    }
}
