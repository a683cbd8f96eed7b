use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, warn};

use crate::error::WxPayError;

/// Gateway business codes worth retrying with identical parameters.
///
/// The gateway documents both spellings depending on the endpoint.
const RETRYABLE_CODES: &[&str] = &[
    "SYSTEM_ERROR",
    "SYSTEMERROR",
    "BANK_ERROR",
    "BANKERROR",
    "FREQUENCY_LIMITED",
];

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Terminal,
}

/// Classify a gateway call failure.
pub fn classify(err: &WxPayError) -> ErrorClass {
    match err.api_code() {
        Some(code) if RETRYABLE_CODES.contains(&code) => ErrorClass::Retryable,
        _ => ErrorClass::Terminal,
    }
}

/// The gateway operation a retry loop was driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOp {
    Prepay,
    Query,
    Close,
}

impl GatewayOp {
    pub fn as_str(self) -> &'static str {
        match self {
            GatewayOp::Prepay => "WX_PRE_PAY_ERROR",
            GatewayOp::Query => "WX_QUERY_ORDER_ERROR",
            GatewayOp::Close => "WX_CLOSE_ORDER_ERROR",
        }
    }
}

impl fmt::Display for GatewayOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The first non-retryable error ended the loop.
    Terminal,
    /// Every retry was spent on retryable errors.
    Exhausted,
}

#[derive(Error, Debug)]
#[error("{op}: {source}")]
pub struct GatewayCallError {
    pub op: GatewayOp,
    pub kind: FailureKind,
    pub attempts: u32,
    #[source]
    pub source: WxPayError,
}

impl GatewayCallError {
    pub fn api_code(&self) -> Option<&str> {
        self.source.api_code()
    }
}

/// Bounded retry with linear backoff: the wait before retry `k` is `k * base`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            max_retries,
            backoff_base,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the `retry`-th retry (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        self.backoff_base * retry
    }

    /// Run `call` until it succeeds, fails terminally, or the retries run out.
    ///
    /// The backoff sleep suspends the calling task; nothing cancels the loop
    /// short of dropping the future.
    pub async fn run<T, F, Fut>(&self, op: GatewayOp, mut call: F) -> Result<T, GatewayCallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WxPayError>>,
    {
        let mut retries = 0;
        loop {
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let attempts = retries + 1;
            let code = err.api_code().unwrap_or("-");

            if classify(&err) == ErrorClass::Terminal {
                error!(%op, attempts, code, error = %err, "gateway call failed");
                return Err(GatewayCallError {
                    op,
                    kind: FailureKind::Terminal,
                    attempts,
                    source: err,
                });
            }
            if retries >= self.max_retries {
                error!(%op, attempts, code, error = %err, "gateway call retries exhausted");
                return Err(GatewayCallError {
                    op,
                    kind: FailureKind::Exhausted,
                    attempts,
                    source: err,
                });
            }

            retries += 1;
            let delay = self.backoff(retries);
            warn!(%op, retry = retries, code, delay_ms = delay.as_millis() as u64, "retrying gateway call");
            tokio::time::sleep(delay).await;
        }
    }
}
