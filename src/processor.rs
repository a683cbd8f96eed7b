use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use tracing::{debug, error, info, warn};

use crate::model::notify::{NotifyAck, NotifyEnvelope, NotifyHeaders, TransactionNotify};
use crate::model::platform::{PaymentNotification, PaymentStatus};
use crate::notify::{parse_envelope, NotificationCodec, NotifyError, NotifyVerifier};
use crate::shopping::{ShoppingInfoUploader, UploadShoppingInfoParams};
use crate::store::{NotificationStore, OrderStore};
use crate::task_pool::TaskPool;

const MSG_PARSE_FAILED: &str = "通知解析失败";
const MSG_RESOURCE_EMPTY: &str = "通知资源为空";
const MSG_DECRYPT_FAILED: &str = "通知资源解密失败";
const MSG_RESOURCE_PARSE_FAILED: &str = "通知资源解析失败";
const MSG_VERIFY_FAILED: &str = "通知验签失败";

/// Turns webhook deliveries into stored notifications and order status updates.
pub struct NotificationProcessor {
    codec: NotificationCodec,
    verifier: Option<Arc<dyn NotifyVerifier>>,
    orders: Arc<dyn OrderStore>,
    notifications: Arc<dyn NotificationStore>,
    uploader: Arc<dyn ShoppingInfoUploader>,
    tasks: Arc<TaskPool>,
}

impl NotificationProcessor {
    /// `verifier` of `None` accepts deliveries without checking their signature.
    pub fn new(
        codec: NotificationCodec,
        verifier: Option<Arc<dyn NotifyVerifier>>,
        orders: Arc<dyn OrderStore>,
        notifications: Arc<dyn NotificationStore>,
        uploader: Arc<dyn ShoppingInfoUploader>,
        tasks: Arc<TaskPool>,
    ) -> Self {
        Self {
            codec,
            verifier,
            orders,
            notifications,
            uploader,
            tasks,
        }
    }

    /// Handle a delivery as received on the wire. A body that is not UTF-8
    /// is rejected like any other unparseable envelope.
    pub async fn handle_raw(&self, headers: &HeaderMap, body: &[u8]) -> (StatusCode, NotifyAck) {
        match std::str::from_utf8(body) {
            Ok(body) => self.handle(headers, body).await,
            Err(e) => {
                let e = NotifyError::Parse(format!("body is not utf-8: {e}"));
                warn!(error = %e, "rejected payment notification");
                (StatusCode::BAD_REQUEST, NotifyAck::fail(MSG_PARSE_FAILED))
            }
        }
    }

    pub async fn handle(&self, headers: &HeaderMap, body: &str) -> (StatusCode, NotifyAck) {
        let (envelope, resource) = match self.decode(headers, body).await {
            Ok(decoded) => decoded,
            Err((e, message)) => {
                warn!(error = %e, "rejected payment notification");
                return (StatusCode::BAD_REQUEST, NotifyAck::fail(message));
            }
        };

        let trade_id = resource.out_trade_no.as_str();
        info!(
            notify_id = %envelope.id,
            trade_id,
            event_type = %envelope.event_type,
            trade_state = %resource.trade_state,
            "received payment notification"
        );
        self.set_status(trade_id, PaymentStatus::ReceivedNotification).await;

        let record = PaymentNotification::from_decoded(&envelope, &resource);
        match self.notifications.add_payment_notification(record).await {
            Ok(()) => self.set_status(trade_id, PaymentStatus::StoredNotification).await,
            Err(e) => {
                error!(notify_id = %envelope.id, trade_id, error = %e, "failed to store payment notification");
                self.set_status(trade_id, PaymentStatus::StoredNotificationFailed).await;
            }
        }

        let params = UploadShoppingInfoParams {
            app_id: resource.appid.clone(),
            merchant_id: resource.mchid.clone(),
            trade_id: resource.out_trade_no.clone(),
            transaction_id: resource.transaction_id.clone(),
            payer_uid: resource.payer.openid.clone(),
            pay_total: resource.amount.payer_total.unwrap_or_default(),
        };
        let uploader = Arc::clone(&self.uploader);
        self.tasks
            .submit(move || async move { uploader.upload(params).await })
            .await;

        self.set_status(trade_id, PaymentStatus::AckedNotification).await;
        (StatusCode::OK, NotifyAck::success())
    }

    /// Parse, verify and decrypt. Errors carry the ack message to send back.
    async fn decode(
        &self,
        headers: &HeaderMap,
        body: &str,
    ) -> Result<(NotifyEnvelope, TransactionNotify), (NotifyError, &'static str)> {
        let envelope = parse_envelope(body).map_err(|e| (e, MSG_PARSE_FAILED))?;

        if let Some(verifier) = &self.verifier {
            let sig = NotifyHeaders::from_header_map(headers).ok_or_else(|| {
                (
                    NotifyError::BadRequest("missing signature headers".into()),
                    MSG_VERIFY_FAILED,
                )
            })?;
            verifier
                .verify(&sig, body)
                .await
                .map_err(|e| (NotifyError::Verification(e), MSG_VERIFY_FAILED))?;
            debug!(notify_id = %envelope.id, serial = %sig.serial, "notification signature verified");
        }

        let resource = self.codec.decode(&envelope).map_err(|e| {
            let message = match e {
                NotifyError::BadRequest(_) => MSG_RESOURCE_EMPTY,
                NotifyError::Decryption(_) => MSG_DECRYPT_FAILED,
                NotifyError::Parse(_) | NotifyError::Verification(_) => MSG_RESOURCE_PARSE_FAILED,
            };
            (e, message)
        })?;

        Ok((envelope, resource))
    }

    async fn set_status(&self, trade_id: &str, status: PaymentStatus) {
        if let Err(e) = self.orders.update_status(trade_id, status).await {
            warn!(trade_id, %status, error = %e, "failed to update order status");
        }
    }
}
