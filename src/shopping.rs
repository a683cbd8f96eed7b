//! Upload of paid orders to the mini-program shopping-order service.
//!
//! Runs after a notification is acknowledged; failures are only logged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

const UPLOAD_ENDPOINT: &str = "https://api.weixin.qq.com/user-order/orders";
const ACCESS_TOKEN_KEY_PREFIX: &str = "miniprogram_backend_service.wx.access_token.appid.";
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_IDLE_PER_HOST: usize = 32;

const ORDER_NUMBER_TYPE: &str = "WXPAY_TRADE_NUMBER";
const JUMP_LINK_PATH: &str = "/index";
const JUMP_LINK_TYPE: &str = "MINI_PROGRAM";
const ITEM_NAME: &str = "虚拟商品";

#[derive(Error, Debug)]
pub enum ShoppingError {
    #[error("access token unavailable for app {0}")]
    MissingToken(String),

    #[error("access token cache: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("upload request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upload rejected: errcode={errcode}, errmsg={errmsg}")]
    Rejected { errcode: i64, errmsg: String },
}

/// What a paid notification contributes to the upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadShoppingInfoParams {
    pub app_id: String,
    pub merchant_id: String,
    pub trade_id: String,
    pub transaction_id: String,
    pub payer_uid: String,
    pub pay_total: i64,
}

#[async_trait]
pub trait ShoppingInfoUploader: Send + Sync {
    /// Fire-and-forget; the outcome is logged, never returned.
    async fn upload(&self, params: UploadShoppingInfoParams);
}

#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self, app_id: &str) -> Result<Option<String>, ShoppingError>;
}

/// Reads tokens another service keeps fresh in Redis.
#[derive(Clone)]
pub struct RedisAccessTokenSource {
    conn: ConnectionManager,
}

impl RedisAccessTokenSource {
    pub async fn connect(redis_url: &str) -> Result<Self, ShoppingError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl AccessTokenSource for RedisAccessTokenSource {
    async fn access_token(&self, app_id: &str) -> Result<Option<String>, ShoppingError> {
        let mut conn = self.conn.clone();
        let token: Option<String> = conn.get(format!("{ACCESS_TOKEN_KEY_PREFIX}{app_id}")).await?;
        Ok(token)
    }
}

/// Fixed tokens per app id. An empty map disables uploads.
#[derive(Debug, Clone, Default)]
pub struct StaticAccessTokenSource {
    tokens: std::collections::HashMap<String, String>,
}

impl StaticAccessTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, app_id: impl Into<String>, token: impl Into<String>) -> Self {
        self.tokens.insert(app_id.into(), token.into());
        self
    }
}

#[async_trait]
impl AccessTokenSource for StaticAccessTokenSource {
    async fn access_token(&self, app_id: &str) -> Result<Option<String>, ShoppingError> {
        Ok(self.tokens.get(app_id).cloned())
    }
}

#[derive(Debug, Serialize)]
struct UploadRequest<'a> {
    order_key: OrderKey<'a>,
    order_list: OrderList<'a>,
    payer: UploadPayer<'a>,
    upload_time: String,
}

#[derive(Debug, Serialize)]
struct OrderKey<'a> {
    order_number_type: &'static str,
    transaction_id: &'a str,
    mchid: &'a str,
    out_trade_no: &'a str,
}

#[derive(Debug, Serialize)]
struct OrderList<'a> {
    merchant_order_no: &'a str,
    order_detail_jump_link: JumpLink<'a>,
    item_list: Item,
}

#[derive(Debug, Serialize)]
struct JumpLink<'a> {
    appid: &'a str,
    path: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct Item {
    name: &'static str,
    description: &'static str,
    unit_price: i64,
    quantity: i64,
}

#[derive(Debug, Serialize)]
struct UploadPayer<'a> {
    openid: &'a str,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
}

impl<'a> UploadRequest<'a> {
    fn new(params: &'a UploadShoppingInfoParams, upload_time: String) -> Self {
        Self {
            order_key: OrderKey {
                order_number_type: ORDER_NUMBER_TYPE,
                transaction_id: &params.transaction_id,
                mchid: &params.merchant_id,
                out_trade_no: &params.trade_id,
            },
            order_list: OrderList {
                merchant_order_no: &params.trade_id,
                order_detail_jump_link: JumpLink {
                    appid: &params.app_id,
                    path: JUMP_LINK_PATH,
                    kind: JUMP_LINK_TYPE,
                },
                item_list: Item {
                    name: ITEM_NAME,
                    description: "",
                    unit_price: params.pay_total,
                    quantity: 1,
                },
            },
            payer: UploadPayer {
                openid: &params.payer_uid,
            },
            upload_time,
        }
    }
}

pub struct WxShoppingInfoUploader {
    http: reqwest::Client,
    tokens: Arc<dyn AccessTokenSource>,
    endpoint: String,
}

impl WxShoppingInfoUploader {
    pub fn new(tokens: Arc<dyn AccessTokenSource>) -> Result<Self, ShoppingError> {
        let http = reqwest::Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .build()?;
        Ok(Self {
            http,
            tokens,
            endpoint: UPLOAD_ENDPOINT.to_string(),
        })
    }

    /// Point uploads somewhere other than the production endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    async fn try_upload(&self, params: &UploadShoppingInfoParams) -> Result<(), ShoppingError> {
        let token = self
            .tokens
            .access_token(&params.app_id)
            .await?
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ShoppingError::MissingToken(params.app_id.clone()))?;

        let body = UploadRequest::new(params, chrono::Local::now().to_rfc3339());
        let resp: UploadResponse = self
            .http
            .post(&self.endpoint)
            .query(&[("access_token", token.as_str())])
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if resp.errcode != 0 {
            return Err(ShoppingError::Rejected {
                errcode: resp.errcode,
                errmsg: resp.errmsg,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ShoppingInfoUploader for WxShoppingInfoUploader {
    async fn upload(&self, params: UploadShoppingInfoParams) {
        match self.try_upload(&params).await {
            Ok(()) => debug!(trade_id = %params.trade_id, "shopping info uploaded"),
            Err(e) => error!(trade_id = %params.trade_id, error = %e, "failed to upload shopping info"),
        }
    }
}
