pub mod api;
pub mod cert;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod logging;
pub mod model;
pub mod notify;
pub mod processor;
pub mod retry;
pub mod shopping;
pub mod store;
pub mod task_pool;
pub mod trade_id;

pub use client::WxPayClient;
pub use config::{ClientConfig, ClientConfigBuilder, ServiceConfig};
pub use error::{ServiceError, StoreError, WxPayError};
pub use gateway::PaymentGateway;
pub use lifecycle::{LifecycleSettings, OrderLifecycleManager, PrepayOrderRequest};
pub use processor::NotificationProcessor;
