use serde::{Deserialize, Serialize};

use super::notify::{NotifyEnvelope, TransactionNotify};

/// Progress of a platform order. Codes are persisted as integers.
///
/// Every `*Failed` code is a terminal sibling of the step before it, never a
/// predecessor of a later step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum PaymentStatus {
    CreateOrder = 0,
    CreateOrderFailed = 1,
    CreatePrepay = 2,
    CreatePrepayFailed = 3,
    GotPrepayId = 4,
    CreateSignature = 5,
    CreateSignatureFailed = 6,
    CloseOrder = 7,
    CloseOrderFailed = 8,
    ReceivedNotification = 9,
    StoredNotification = 10,
    StoredNotificationFailed = 11,
    AckedNotification = 12,
}

impl PaymentStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        use PaymentStatus::*;
        Some(match code {
            0 => CreateOrder,
            1 => CreateOrderFailed,
            2 => CreatePrepay,
            3 => CreatePrepayFailed,
            4 => GotPrepayId,
            5 => CreateSignature,
            6 => CreateSignatureFailed,
            7 => CloseOrder,
            8 => CloseOrderFailed,
            9 => ReceivedNotification,
            10 => StoredNotification,
            11 => StoredNotificationFailed,
            12 => AckedNotification,
            _ => return None,
        })
    }

    pub fn is_failure(self) -> bool {
        use PaymentStatus::*;
        matches!(
            self,
            CreateOrderFailed
                | CreatePrepayFailed
                | CreateSignatureFailed
                | CloseOrderFailed
                | StoredNotificationFailed
        )
    }

    fn is_close(self) -> bool {
        matches!(self, PaymentStatus::CloseOrder | PaymentStatus::CloseOrderFailed)
    }

    fn is_notification(self) -> bool {
        self >= PaymentStatus::ReceivedNotification
    }

    /// Whether the lifecycle graph allows moving from `self` to `next`.
    ///
    /// The main line is `CreateOrder -> CreatePrepay -> GotPrepayId ->
    /// CreateSignature`; each step may instead fall to its failed sibling.
    /// Closing is reachable from any state outside the close pair, and the
    /// notification chain is reachable from any state outside itself.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        if next.is_close() {
            return !self.is_close();
        }
        if next == ReceivedNotification {
            return !self.is_notification();
        }
        matches!(
            (self, next),
            (CreateOrder, CreateOrderFailed)
                | (CreateOrder, CreatePrepay)
                | (CreatePrepay, CreatePrepayFailed)
                | (CreatePrepay, GotPrepayId)
                | (GotPrepayId, CreateSignature)
                | (GotPrepayId, CreateSignatureFailed)
                | (ReceivedNotification, StoredNotification)
                | (ReceivedNotification, StoredNotificationFailed)
                | (StoredNotification, AckedNotification)
                | (StoredNotificationFailed, AckedNotification)
        )
    }

    pub fn as_str(self) -> &'static str {
        use PaymentStatus::*;
        match self {
            CreateOrder => "create-order",
            CreateOrderFailed => "create-order-failed",
            CreatePrepay => "create-prepay",
            CreatePrepayFailed => "create-prepay-failed",
            GotPrepayId => "got-prepay-id",
            CreateSignature => "create-signature",
            CreateSignatureFailed => "create-signature-failed",
            CloseOrder => "close-order",
            CloseOrderFailed => "close-order-failed",
            ReceivedNotification => "received-notification",
            StoredNotification => "stored-notification",
            StoredNotificationFailed => "stored-notification-failed",
            AckedNotification => "acked-notification",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<PaymentStatus> for i32 {
    fn from(status: PaymentStatus) -> Self {
        status.code()
    }
}

impl TryFrom<i32> for PaymentStatus {
    type Error = String;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        PaymentStatus::from_code(code).ok_or_else(|| format!("unknown payment status code: {code}"))
    }
}

/// One merchant-side payment intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformOrder {
    pub app_id: String,
    pub merchant_id: String,
    pub trade_id: String,
    pub payer_uid: String,
    pub item_description: String,
    pub item_amount_total: i64,
    pub status: PaymentStatus,
    pub expire_time: i64,
    pub create_time: i64,
    pub update_time: i64,
}

/// Append-only record of one received webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentNotification {
    pub notify_id: String,
    pub create_time: String,
    pub event_type: String,
    pub app_id: String,
    pub merchant_id: String,
    pub trade_id: String,
    pub transaction_id: String,
    pub trade_type: String,
    pub trade_state: String,
    pub trade_state_desc: String,
    pub bank_type: String,
    pub success_time: String,
    pub payer_open_id: String,
    pub amount_total: i64,
    pub amount_payer_total: i64,
    pub amount_currency: String,
    pub amount_payer_currency: String,
    pub summary: String,
}

impl PaymentNotification {
    pub fn from_decoded(envelope: &NotifyEnvelope, resource: &TransactionNotify) -> Self {
        Self {
            notify_id: envelope.id.clone(),
            create_time: envelope.create_time.clone(),
            event_type: envelope.event_type.clone(),
            app_id: resource.appid.clone(),
            merchant_id: resource.mchid.clone(),
            trade_id: resource.out_trade_no.clone(),
            transaction_id: resource.transaction_id.clone(),
            trade_type: resource.trade_type.clone(),
            trade_state: resource.trade_state.clone(),
            trade_state_desc: resource.trade_state_desc.clone(),
            bank_type: resource.bank_type.clone(),
            success_time: resource.success_time.clone(),
            payer_open_id: resource.payer.openid.clone(),
            amount_total: resource.amount.total,
            amount_payer_total: resource.amount.payer_total.unwrap_or_default(),
            amount_currency: resource.amount.currency.clone().unwrap_or_default(),
            amount_payer_currency: resource.amount.payer_currency.clone().unwrap_or_default(),
            summary: envelope.summary.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PaymentStatus::*;

    #[test]
    fn test_codes_roundtrip_through_integers() {
        for code in 0..=12 {
            let status = PaymentStatus::from_code(code).unwrap();
            assert_eq!(status.code(), code);
        }
        assert!(PaymentStatus::from_code(13).is_none());
        assert!(PaymentStatus::try_from(-1).is_err());
    }

    #[test]
    fn test_main_line_moves_forward_only() {
        assert!(CreateOrder.can_transition_to(CreatePrepay));
        assert!(CreatePrepay.can_transition_to(GotPrepayId));
        assert!(GotPrepayId.can_transition_to(CreateSignature));

        assert!(!CreateSignature.can_transition_to(CreatePrepay));
        assert!(!GotPrepayId.can_transition_to(CreateOrder));
        assert!(!CreateOrder.can_transition_to(GotPrepayId));
    }

    #[test]
    fn test_failed_siblings_are_terminal() {
        assert!(CreatePrepay.can_transition_to(CreatePrepayFailed));
        assert!(!CreatePrepayFailed.can_transition_to(GotPrepayId));
        assert!(!CreateOrderFailed.can_transition_to(CreatePrepay));
        assert!(CreatePrepayFailed.is_failure());
        assert!(!GotPrepayId.is_failure());
    }

    #[test]
    fn test_close_reachable_from_any_non_close_state() {
        for status in [CreateOrder, CreatePrepayFailed, CreateSignature, AckedNotification] {
            assert!(status.can_transition_to(CloseOrder));
            assert!(status.can_transition_to(CloseOrderFailed));
        }
        assert!(!CloseOrder.can_transition_to(CloseOrderFailed));
    }

    #[test]
    fn test_notification_chain() {
        assert!(CreateSignature.can_transition_to(ReceivedNotification));
        assert!(ReceivedNotification.can_transition_to(StoredNotificationFailed));
        assert!(StoredNotificationFailed.can_transition_to(AckedNotification));
        // A redelivered webhook would rewind the chain.
        assert!(!AckedNotification.can_transition_to(ReceivedNotification));
    }

    #[test]
    fn test_status_serializes_as_integer() {
        assert_eq!(serde_json::to_string(&GotPrepayId).unwrap(), "4");
        let parsed: PaymentStatus = serde_json::from_str("12").unwrap();
        assert_eq!(parsed, AckedNotification);
    }
}
