use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the signed WeChat Pay HTTP client.
#[derive(Error, Debug)]
pub enum WxPayError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WeChat Pay API error: code={code}, message={message}")]
    Api {
        code: String,
        message: String,
        detail: Option<Box<ApiErrorDetail>>,
    },

    #[error("Signature generation failed: {0}")]
    SignError(String),

    #[error("Signature verification failed: {0}")]
    VerifyError(String),

    #[error("Decryption failed: {0}")]
    DecryptError(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Certificate error: {0}")]
    CertError(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WxPayError {
    /// The gateway business code, if this is an API error.
    pub fn api_code(&self) -> Option<&str> {
        match self {
            WxPayError::Api { code, .. } => Some(code.as_str()),
            _ => None,
        }
    }

    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        WxPayError::Api {
            code: code.into(),
            message: message.into(),
            detail: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiErrorDetail {
    pub field: Option<String>,
    pub value: Option<String>,
    pub issue: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorResponse {
    pub code: String,
    pub message: String,
    pub detail: Option<ApiErrorDetail>,
}

/// Storage failures surfaced by `OrderStore` / `NotificationStore`.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return StoreError::Duplicate(db.message().to_string());
            }
        }
        if matches!(e, sqlx::Error::RowNotFound) {
            return StoreError::NotFound("row not found".into());
        }
        StoreError::Backend(e.to_string())
    }
}

/// Errors returned from the RPC-style operations of the order lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::InvalidArgument(_) => "InvalidArgument",
            ServiceError::Internal(_) => "Internal",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ServiceError::InvalidArgument(m) | ServiceError::Internal(m) => m,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON body carried by every RPC error response.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            code: self.code().to_string(),
            message: self.message().to_string(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

/// Configuration loading or validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
