use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, WxPayError};
use crate::task_pool::OverflowPolicy;

const DEFAULT_BASE_URL: &str = "https://api.mch.weixin.qq.com";
const ENV_PREFIX: &str = "WXPAY";
const DEFAULTS_FILE: &str = "config/default";

pub struct ClientConfig {
    pub mch_id: String,
    pub serial_no: String,
    pub api_v3_key: String,
    pub private_key_pem: String,
    pub http_client: Option<reqwest::Client>,
    pub base_url: String,
}

pub struct ClientConfigBuilder {
    mch_id: Option<String>,
    serial_no: Option<String>,
    api_v3_key: Option<String>,
    private_key_pem: Option<String>,
    http_client: Option<reqwest::Client>,
    base_url: Option<String>,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            mch_id: None,
            serial_no: None,
            api_v3_key: None,
            private_key_pem: None,
            http_client: None,
            base_url: None,
        }
    }
}

impl ClientConfigBuilder {
    pub fn mch_id(mut self, mch_id: impl Into<String>) -> Self {
        self.mch_id = Some(mch_id.into());
        self
    }

    pub fn serial_no(mut self, serial_no: impl Into<String>) -> Self {
        self.serial_no = Some(serial_no.into());
        self
    }

    pub fn api_v3_key(mut self, api_v3_key: impl Into<String>) -> Self {
        self.api_v3_key = Some(api_v3_key.into());
        self
    }

    pub fn private_key_pem(mut self, private_key_pem: impl Into<String>) -> Self {
        self.private_key_pem = Some(private_key_pem.into());
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn build(self) -> Result<ClientConfig, WxPayError> {
        let mch_id = self
            .mch_id
            .ok_or_else(|| WxPayError::Config("mch_id is required".into()))?;
        let serial_no = self
            .serial_no
            .ok_or_else(|| WxPayError::Config("serial_no is required".into()))?;
        let api_v3_key = self
            .api_v3_key
            .ok_or_else(|| WxPayError::Config("api_v3_key is required".into()))?;
        let private_key_pem = self
            .private_key_pem
            .ok_or_else(|| WxPayError::Config("private_key_pem is required".into()))?;

        if api_v3_key.len() != 32 {
            return Err(WxPayError::Config(format!(
                "api_v3_key must be 32 bytes, got {}",
                api_v3_key.len()
            )));
        }

        Ok(ClientConfig {
            mch_id,
            serial_no,
            api_v3_key,
            private_key_pem,
            http_client: self.http_client,
            base_url: self.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }
}

/// Full service configuration.
///
/// Layered as: `config/default.toml` when present, then an optional file, then `WXPAY__*`
/// environment variables (`WXPAY__MERCHANT__API_V3_KEY` sets
/// `merchant.api_v3_key`).
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
    pub merchant: MerchantConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub task_pool: TaskPoolConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub http_addr: String,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".into(),
            request_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Plain,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Plain,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MerchantConfig {
    pub mch_id: String,
    pub cert_serial_no: String,
    pub api_v3_key: String,
    pub private_key_path: String,
    pub notify_url: String,
    pub supported_app_ids: Vec<String>,
    #[serde(default = "default_payment_expire_minutes")]
    pub payment_expire_minutes: i64,
}

fn default_payment_expire_minutes() -> i64 {
    30
}

/// Longest accepted payment window: 7 days.
const MAX_PAYMENT_EXPIRE_MINUTES: i64 = 7 * 24 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct NotifyConfig {
    pub verify_signature: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            verify_signature: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskPoolConfig {
    pub workers: usize,
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for TaskPoolConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            capacity: 256,
            overflow: OverflowPolicy::Block,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the defaults file, an optional override file
    /// and `WXPAY__*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(DEFAULTS_FILE).required(false));
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("merchant.supported_app_ids")
                .try_parsing(true),
        );

        let cfg: ServiceConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let m = &self.merchant;
        if m.mch_id.is_empty() {
            return Err(ConfigError::Invalid("merchant.mch_id is empty".into()));
        }
        if m.api_v3_key.len() != 32 {
            return Err(ConfigError::Invalid(format!(
                "merchant.api_v3_key must be 32 bytes, got {}",
                m.api_v3_key.len()
            )));
        }
        if m.notify_url.is_empty() {
            return Err(ConfigError::Invalid("merchant.notify_url is empty".into()));
        }
        if m.supported_app_ids.iter().all(|id| id.is_empty()) {
            return Err(ConfigError::Invalid(
                "merchant.supported_app_ids is empty".into(),
            ));
        }
        if !(1..=MAX_PAYMENT_EXPIRE_MINUTES).contains(&m.payment_expire_minutes) {
            return Err(ConfigError::Invalid(format!(
                "merchant.payment_expire_minutes must be within 1..={MAX_PAYMENT_EXPIRE_MINUTES}, got {}",
                m.payment_expire_minutes
            )));
        }
        if self.storage.backend == StorageBackend::Postgres && self.storage.database_url.is_none() {
            return Err(ConfigError::Invalid(
                "storage.database_url is required for the postgres backend".into(),
            ));
        }
        if self.task_pool.workers == 0 || self.task_pool.capacity == 0 {
            return Err(ConfigError::Invalid(
                "task_pool.workers and task_pool.capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn supported_app_ids(&self) -> HashSet<String> {
        self.merchant
            .supported_app_ids
            .iter()
            .filter(|id| !id.is_empty())
            .cloned()
            .collect()
    }

    /// Read the merchant private key PEM from `merchant.private_key_path`.
    pub fn read_private_key_pem(&self) -> Result<String, ConfigError> {
        let path = &self.merchant.private_key_path;
        std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })
    }

    pub fn client_config(&self, private_key_pem: String) -> Result<ClientConfig, WxPayError> {
        ClientConfig::builder()
            .mch_id(&self.merchant.mch_id)
            .serial_no(&self.merchant.cert_serial_no)
            .api_v3_key(&self.merchant.api_v3_key)
            .private_key_pem(private_key_pem)
            .base_url(&self.gateway.base_url)
            .build()
    }
}
