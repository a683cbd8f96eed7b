use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

use super::{now_secs, NotificationStore, OrderStore, StoreResult};
use crate::error::StoreError;
use crate::model::platform::{PaymentNotification, PaymentStatus, PlatformOrder};

/// Orders keyed by `trade_id`, for tests and single-node runs.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<String, PlatformOrder>>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn add_platform_order(&self, order: PlatformOrder) -> StoreResult<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.trade_id) {
            return Err(StoreError::Duplicate(order.trade_id));
        }
        orders.insert(order.trade_id.clone(), order);
        Ok(())
    }

    async fn update_status(&self, trade_id: &str, status: PaymentStatus) -> StoreResult<()> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(trade_id)
            .ok_or_else(|| StoreError::NotFound(trade_id.to_string()))?;

        if order.status != status && !order.status.can_transition_to(status) {
            warn!(
                trade_id,
                from = %order.status,
                to = %status,
                "order status regression"
            );
        }
        order.status = status;
        order.update_time = order.update_time.max(now_secs());
        Ok(())
    }

    async fn get_platform_order(&self, trade_id: &str) -> StoreResult<Option<PlatformOrder>> {
        let orders = self.orders.read().await;
        Ok(orders.get(trade_id).cloned())
    }
}

/// Append-only notification log.
#[derive(Default, Clone)]
pub struct InMemoryNotificationStore {
    notifications: Arc<RwLock<Vec<PaymentNotification>>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.notifications.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.notifications.read().await.is_empty()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn add_payment_notification(&self, notification: PaymentNotification) -> StoreResult<()> {
        self.notifications.write().await.push(notification);
        Ok(())
    }

    async fn list_by_trade_id(&self, trade_id: &str) -> StoreResult<Vec<PaymentNotification>> {
        let notifications = self.notifications.read().await;
        Ok(notifications
            .iter()
            .filter(|n| n.trade_id == trade_id)
            .cloned()
            .collect())
    }
}
