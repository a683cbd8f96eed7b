#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rsa::pkcs1v15::SigningKey;
use rsa::sha2::Sha256;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tokio::time::Instant;

use wxpay_callback_service::error::{StoreError, WxPayError};
use wxpay_callback_service::gateway::PaymentGateway;
use wxpay_callback_service::model::order::OrderQueryResponse;
use wxpay_callback_service::model::platform::{
    PaymentNotification, PaymentStatus, PlatformOrder,
};
use wxpay_callback_service::model::prepay::{JsapiPrepayRequest, JsapiPrepayResponse};
use wxpay_callback_service::shopping::{ShoppingInfoUploader, UploadShoppingInfoParams};
use wxpay_callback_service::store::{NotificationStore, OrderStore, StoreResult};
use wxpay_callback_service::{LifecycleSettings, OrderLifecycleManager};

pub const API_V3_KEY: &str = "01234567890123456789012345678901";
pub const MCH_ID: &str = "1900000001";
pub const NOTIFY_NONCE: &str = "0123456789ab";

pub struct TestKey {
    pub signing_key: Arc<SigningKey<Sha256>>,
    pub public_key: RsaPublicKey,
}

pub fn test_key() -> TestKey {
    let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
    let public_key = RsaPublicKey::from(&private_key);
    TestKey {
        signing_key: Arc::new(SigningKey::<Sha256>::new(private_key)),
        public_key,
    }
}

pub fn settings() -> LifecycleSettings {
    LifecycleSettings {
        merchant_id: MCH_ID.into(),
        notify_url: "https://example.com/notify".into(),
        supported_app_ids: HashSet::from(["wx1".to_string()]),
        payment_expire_minutes: 30,
    }
}

pub fn manager(
    gateway: Arc<dyn PaymentGateway>,
    orders: Arc<dyn OrderStore>,
    key: &TestKey,
) -> OrderLifecycleManager {
    OrderLifecycleManager::new(gateway, orders, Arc::clone(&key.signing_key), settings())
}

type Script<T> = Box<dyn Fn(u32) -> Result<T, WxPayError> + Send + Sync>;

/// Gateway whose answers are scripted per call number (0-based).
pub struct ScriptedGateway {
    prepay: Script<JsapiPrepayResponse>,
    query: Script<OrderQueryResponse>,
    close: Script<()>,
    pub prepay_calls: AtomicU32,
    pub query_calls: AtomicU32,
    pub close_calls: AtomicU32,
    pub prepay_requests: Mutex<Vec<JsapiPrepayRequest>>,
    pub prepay_times: Mutex<Vec<Instant>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            prepay: Box::new(|_| Ok(JsapiPrepayResponse {
                prepay_id: "wx201410272009395522657a690389285100".into(),
            })),
            query: Box::new(|_| Err(WxPayError::api("ORDERNOTEXIST", "order not exist"))),
            close: Box::new(|_| Ok(())),
            prepay_calls: AtomicU32::new(0),
            query_calls: AtomicU32::new(0),
            close_calls: AtomicU32::new(0),
            prepay_requests: Mutex::new(Vec::new()),
            prepay_times: Mutex::new(Vec::new()),
        }
    }

    pub fn on_prepay(
        mut self,
        f: impl Fn(u32) -> Result<JsapiPrepayResponse, WxPayError> + Send + Sync + 'static,
    ) -> Self {
        self.prepay = Box::new(f);
        self
    }

    pub fn on_query(
        mut self,
        f: impl Fn(u32) -> Result<OrderQueryResponse, WxPayError> + Send + Sync + 'static,
    ) -> Self {
        self.query = Box::new(f);
        self
    }

    pub fn on_close(
        mut self,
        f: impl Fn(u32) -> Result<(), WxPayError> + Send + Sync + 'static,
    ) -> Self {
        self.close = Box::new(f);
        self
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn prepay(&self, req: &JsapiPrepayRequest) -> Result<JsapiPrepayResponse, WxPayError> {
        self.prepay_requests.lock().unwrap().push(req.clone());
        self.prepay_times.lock().unwrap().push(Instant::now());
        let n = self.prepay_calls.fetch_add(1, Ordering::SeqCst);
        (self.prepay)(n)
    }

    async fn query_order(&self, _out_trade_no: &str) -> Result<OrderQueryResponse, WxPayError> {
        let n = self.query_calls.fetch_add(1, Ordering::SeqCst);
        (self.query)(n)
    }

    async fn close_order(&self, _out_trade_no: &str) -> Result<(), WxPayError> {
        let n = self.close_calls.fetch_add(1, Ordering::SeqCst);
        (self.close)(n)
    }
}

/// Order store that refuses every write.
#[derive(Default)]
pub struct BrokenOrderStore;

#[async_trait]
impl OrderStore for BrokenOrderStore {
    async fn add_platform_order(&self, _order: PlatformOrder) -> StoreResult<()> {
        Err(StoreError::Backend("connection refused".into()))
    }

    async fn update_status(&self, _trade_id: &str, _status: PaymentStatus) -> StoreResult<()> {
        Err(StoreError::Backend("connection refused".into()))
    }

    async fn get_platform_order(&self, _trade_id: &str) -> StoreResult<Option<PlatformOrder>> {
        Err(StoreError::Backend("connection refused".into()))
    }
}

/// Notification store that refuses every insert.
#[derive(Default)]
pub struct BrokenNotificationStore;

#[async_trait]
impl NotificationStore for BrokenNotificationStore {
    async fn add_payment_notification(&self, _n: PaymentNotification) -> StoreResult<()> {
        Err(StoreError::Backend("disk full".into()))
    }

    async fn list_by_trade_id(&self, _trade_id: &str) -> StoreResult<Vec<PaymentNotification>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub struct RecordingUploader {
    pub uploads: Mutex<Vec<UploadShoppingInfoParams>>,
}

#[async_trait]
impl ShoppingInfoUploader for RecordingUploader {
    async fn upload(&self, params: UploadShoppingInfoParams) {
        self.uploads.lock().unwrap().push(params);
    }
}

pub fn order(trade_id: &str, status: PaymentStatus) -> PlatformOrder {
    PlatformOrder {
        app_id: "wx1".into(),
        merchant_id: MCH_ID.into(),
        trade_id: trade_id.into(),
        payer_uid: "o1".into(),
        item_description: "d".into(),
        item_amount_total: 100,
        status,
        expire_time: 0,
        create_time: 0,
        update_time: 0,
    }
}

pub fn encrypt_resource(plaintext: &str, key: &str) -> String {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).unwrap();
    let ct = cipher
        .encrypt(
            Nonce::from_slice(NOTIFY_NONCE.as_bytes()),
            Payload {
                msg: plaintext.as_bytes(),
                aad: b"transaction",
            },
        )
        .unwrap();
    BASE64.encode(ct)
}

pub fn transaction_json(trade_id: &str) -> String {
    serde_json::json!({
        "appid": "wx1",
        "mchid": MCH_ID,
        "out_trade_no": trade_id,
        "transaction_id": "4200000001202401010000000001",
        "trade_type": "JSAPI",
        "trade_state": "SUCCESS",
        "trade_state_desc": "支付成功",
        "bank_type": "CMC",
        "success_time": "2024-01-01T12:00:00+08:00",
        "payer": { "openid": "o1" },
        "amount": { "total": 100, "payer_total": 90, "currency": "CNY", "payer_currency": "CNY" }
    })
    .to_string()
}

pub fn notification_body(notify_id: &str, ciphertext: &str) -> String {
    serde_json::json!({
        "id": notify_id,
        "create_time": "2024-01-01T12:00:01+08:00",
        "event_type": "TRANSACTION.SUCCESS",
        "resource_type": "encrypt-resource",
        "summary": "支付成功",
        "resource": {
            "algorithm": "AEAD_AES_256_GCM",
            "ciphertext": ciphertext,
            "nonce": NOTIFY_NONCE,
            "associated_data": "transaction",
            "original_type": "transaction"
        }
    })
    .to_string()
}

pub fn paid_notification(notify_id: &str, trade_id: &str) -> String {
    notification_body(notify_id, &encrypt_resource(&transaction_json(trade_id), API_V3_KEY))
}
