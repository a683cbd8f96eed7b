use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tracing::info;

use super::{now_secs, NotificationStore, OrderStore, StoreResult};
use crate::error::StoreError;
use crate::model::platform::{PaymentNotification, PaymentStatus, PlatformOrder};

/// Open a pool and apply the bundled migrations.
pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StoreError::Backend(format!("migrate: {e}")))?;
    info!(max_connections, "postgres storage ready");
    Ok(pool)
}

#[derive(Debug, FromRow)]
struct PlatformOrderRow {
    app_id: String,
    merchant_id: String,
    trade_id: String,
    payer_uid: String,
    item_description: String,
    item_amount_total: i64,
    status: i32,
    expire_time: i64,
    create_time: i64,
    update_time: i64,
}

impl TryFrom<PlatformOrderRow> for PlatformOrder {
    type Error = StoreError;

    fn try_from(row: PlatformOrderRow) -> Result<Self, Self::Error> {
        Ok(PlatformOrder {
            status: PaymentStatus::try_from(row.status).map_err(StoreError::Backend)?,
            app_id: row.app_id,
            merchant_id: row.merchant_id,
            trade_id: row.trade_id,
            payer_uid: row.payer_uid,
            item_description: row.item_description,
            item_amount_total: row.item_amount_total,
            expire_time: row.expire_time,
            create_time: row.create_time,
            update_time: row.update_time,
        })
    }
}

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn add_platform_order(&self, order: PlatformOrder) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO platform_orders (
                app_id, merchant_id, trade_id, payer_uid, item_description,
                item_amount_total, status, expire_time, create_time, update_time
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&order.app_id)
        .bind(&order.merchant_id)
        .bind(&order.trade_id)
        .bind(&order.payer_uid)
        .bind(&order.item_description)
        .bind(order.item_amount_total)
        .bind(order.status.code())
        .bind(order.expire_time)
        .bind(order.create_time)
        .bind(order.update_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_status(&self, trade_id: &str, status: PaymentStatus) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE platform_orders
             SET status = $1, update_time = GREATEST(update_time, $2)
             WHERE trade_id = $3",
        )
        .bind(status.code())
        .bind(now_secs())
        .bind(trade_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(trade_id.to_string()));
        }
        Ok(())
    }

    async fn get_platform_order(&self, trade_id: &str) -> StoreResult<Option<PlatformOrder>> {
        let row = sqlx::query_as::<_, PlatformOrderRow>(
            "SELECT app_id, merchant_id, trade_id, payer_uid, item_description,
                    item_amount_total, status, expire_time, create_time, update_time
             FROM platform_orders
             WHERE trade_id = $1",
        )
        .bind(trade_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PlatformOrder::try_from).transpose()
    }
}

#[derive(Debug, FromRow)]
struct PaymentNotificationRow {
    notify_id: String,
    create_time: String,
    event_type: String,
    app_id: String,
    merchant_id: String,
    trade_id: String,
    transaction_id: String,
    trade_type: String,
    trade_state: String,
    trade_state_desc: String,
    bank_type: String,
    success_time: String,
    payer_open_id: String,
    amount_total: i64,
    amount_payer_total: i64,
    amount_currency: String,
    amount_payer_currency: String,
    summary: String,
}

impl From<PaymentNotificationRow> for PaymentNotification {
    fn from(row: PaymentNotificationRow) -> Self {
        PaymentNotification {
            notify_id: row.notify_id,
            create_time: row.create_time,
            event_type: row.event_type,
            app_id: row.app_id,
            merchant_id: row.merchant_id,
            trade_id: row.trade_id,
            transaction_id: row.transaction_id,
            trade_type: row.trade_type,
            trade_state: row.trade_state,
            trade_state_desc: row.trade_state_desc,
            bank_type: row.bank_type,
            success_time: row.success_time,
            payer_open_id: row.payer_open_id,
            amount_total: row.amount_total,
            amount_payer_total: row.amount_payer_total,
            amount_currency: row.amount_currency,
            amount_payer_currency: row.amount_payer_currency,
            summary: row.summary,
        }
    }
}

pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn add_payment_notification(&self, n: PaymentNotification) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO payment_notifications (
                notify_id, create_time, event_type, app_id, merchant_id, trade_id,
                transaction_id, trade_type, trade_state, trade_state_desc, bank_type,
                success_time, payer_open_id, amount_total, amount_payer_total,
                amount_currency, amount_payer_currency, summary
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
        )
        .bind(&n.notify_id)
        .bind(&n.create_time)
        .bind(&n.event_type)
        .bind(&n.app_id)
        .bind(&n.merchant_id)
        .bind(&n.trade_id)
        .bind(&n.transaction_id)
        .bind(&n.trade_type)
        .bind(&n.trade_state)
        .bind(&n.trade_state_desc)
        .bind(&n.bank_type)
        .bind(&n.success_time)
        .bind(&n.payer_open_id)
        .bind(n.amount_total)
        .bind(n.amount_payer_total)
        .bind(&n.amount_currency)
        .bind(&n.amount_payer_currency)
        .bind(&n.summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_by_trade_id(&self, trade_id: &str) -> StoreResult<Vec<PaymentNotification>> {
        let rows = sqlx::query_as::<_, PaymentNotificationRow>(
            "SELECT notify_id, create_time, event_type, app_id, merchant_id, trade_id,
                    transaction_id, trade_type, trade_state, trade_state_desc, bank_type,
                    success_time, payer_open_id, amount_total, amount_payer_total,
                    amount_currency, amount_payer_currency, summary
             FROM payment_notifications
             WHERE trade_id = $1
             ORDER BY id",
        )
        .bind(trade_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PaymentNotification::from).collect())
    }
}
