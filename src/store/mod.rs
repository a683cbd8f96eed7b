//! Persistence ports for platform orders and received notifications.

mod in_memory;
mod postgres;

pub use in_memory::{InMemoryNotificationStore, InMemoryOrderStore};
pub use postgres::{connect, PgNotificationStore, PgOrderStore};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::platform::{PaymentNotification, PaymentStatus, PlatformOrder};

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert a new order. A second insert for the same `trade_id` is a
    /// `StoreError::Duplicate`.
    async fn add_platform_order(&self, order: PlatformOrder) -> StoreResult<()>;

    /// Overwrite the status of an existing order. `update_time` never moves
    /// backwards.
    async fn update_status(&self, trade_id: &str, status: PaymentStatus) -> StoreResult<()>;

    async fn get_platform_order(&self, trade_id: &str) -> StoreResult<Option<PlatformOrder>>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Append a notification record. Redeliveries are stored again.
    async fn add_payment_notification(&self, notification: PaymentNotification) -> StoreResult<()>;

    async fn list_by_trade_id(&self, trade_id: &str) -> StoreResult<Vec<PaymentNotification>>;
}

pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
