use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::{Method, StatusCode};
use rsa::pkcs1v15::SigningKey;
use rsa::sha2::Sha256;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::cert::manager::{decode_certificates, PlatformCertManager, CERT_REFRESH_INTERVAL};
use crate::config::ClientConfig;
use crate::crypto::sign::{
    build_authorization_header, build_sign_message, sign_sha256_rsa, signing_key_from_pem,
};
use crate::error::{ApiErrorResponse, WxPayError};
use crate::model::notify::NotifyHeaders;

const USER_AGENT: &str = concat!("wxpay-callback-service/", env!("CARGO_PKG_VERSION"));
const CERTIFICATES_PATH: &str = "/v3/certificates";

/// A 2xx gateway reply before its signature has been checked.
struct GatewayReply {
    signature: Option<NotifyHeaders>,
    body: String,
}

/// Signed HTTP client for the WeChat Pay v3 merchant API.
///
/// Every request carries a `WECHATPAY2-SHA256-RSA2048` authorization header,
/// and every reply is checked against the cached platform certificates.
pub struct WxPayClient {
    config: ClientConfig,
    http: reqwest::Client,
    signing_key: Arc<SigningKey<Sha256>>,
    certs: RwLock<PlatformCertManager>,
    /// Epoch seconds after which the certificate set is re-fetched. 0 forces a fetch.
    certs_due_at: AtomicI64,
}

impl WxPayClient {
    /// Parse the merchant key and load the platform certificates.
    pub async fn new(config: ClientConfig) -> Result<Self, WxPayError> {
        let signing_key = Arc::new(signing_key_from_pem(&config.private_key_pem)?);
        let http = config.http_client.clone().unwrap_or_default();

        let client = Self {
            config,
            http,
            signing_key,
            certs: RwLock::new(PlatformCertManager::new()),
            certs_due_at: AtomicI64::new(0),
        };
        client.refresh_certs_if_due().await?;
        Ok(client)
    }

    pub fn mch_id(&self) -> &str {
        &self.config.mch_id
    }

    /// The merchant signing key, shared with the payment-signature step.
    pub fn signing_key(&self) -> Arc<SigningKey<Sha256>> {
        Arc::clone(&self.signing_key)
    }

    /// Verify the `Wechatpay-*` signature headers of a webhook delivery.
    pub async fn verify_notify_signature(
        &self,
        headers: &NotifyHeaders,
        body: &str,
    ) -> Result<(), WxPayError> {
        self.refresh_certs_if_due().await?;
        self.certs.read().await.verify(headers, body, current_timestamp())
    }

    pub(crate) async fn post_json<Req, Resp>(&self, path: &str, req: &Req) -> Result<Resp, WxPayError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let body = self.execute(Method::POST, path, Some(serde_json::to_string(req)?)).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// POST whose success reply (204) has no body.
    pub(crate) async fn post_empty<Req: Serialize>(&self, path: &str, req: &Req) -> Result<(), WxPayError> {
        self.execute(Method::POST, path, Some(serde_json::to_string(req)?)).await?;
        Ok(())
    }

    pub(crate) async fn get_json<Resp: DeserializeOwned>(&self, path: &str) -> Result<Resp, WxPayError> {
        let body = self.execute(Method::GET, path, None).await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
    ) -> Result<String, WxPayError> {
        self.refresh_certs_if_due().await?;
        let reply = self.send(method, path, body).await?;

        let Some(signature) = reply.signature else {
            warn!(path, "gateway reply missing signature headers");
            return Err(WxPayError::VerifyError("response missing signature headers".into()));
        };
        self.certs.read().await.verify_signed(&signature, &reply.body)?;
        Ok(reply.body)
    }

    /// Re-fetch the platform certificates once the current set is due.
    ///
    /// The fast path is a single atomic load. The write lock is held only to
    /// swap in the decoded set.
    async fn refresh_certs_if_due(&self) -> Result<(), WxPayError> {
        let now = current_timestamp();
        if now < self.certs_due_at.load(Ordering::Acquire) {
            return Ok(());
        }

        debug!("fetching platform certificates");
        // Not signature-checked: the payload is sealed with the API v3 key.
        let reply = self.send(Method::GET, CERTIFICATES_PATH, None).await?;
        let certs = decode_certificates(&reply.body, &self.config.api_v3_key)?;
        self.certs.write().await.update_certs(certs);

        let due_at = current_timestamp() + CERT_REFRESH_INTERVAL.as_secs() as i64;
        self.certs_due_at.store(due_at, Ordering::Release);
        Ok(())
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
    ) -> Result<GatewayReply, WxPayError> {
        let payload = body.as_deref().unwrap_or("");
        let authorization = self.authorization(&method, path, payload).await?;
        debug!(%method, path, "sending signed request");

        let mut req = self
            .http
            .request(method, format!("{}{path}", self.config.base_url))
            .header("Authorization", authorization)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT);
        if let Some(body) = body {
            req = req.header("Content-Type", "application/json").body(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let signature = NotifyHeaders::from_header_map(resp.headers());
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(parse_api_error(status, &text));
        }
        Ok(GatewayReply {
            signature,
            body: text,
        })
    }

    /// Sign `method\npath\ntimestamp\nnonce\nbody\n` off the async workers.
    async fn authorization(&self, method: &Method, path: &str, body: &str) -> Result<String, WxPayError> {
        let timestamp = current_timestamp();
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let message = build_sign_message(method.as_str(), path, timestamp, &nonce, body);

        let key = Arc::clone(&self.signing_key);
        let signature = tokio::task::spawn_blocking(move || sign_sha256_rsa(&key, &message))
            .await
            .map_err(|e| WxPayError::SignError(format!("signing task: {e}")))??;

        Ok(build_authorization_header(
            &self.config.mch_id,
            &self.config.serial_no,
            timestamp,
            &nonce,
            &signature,
        ))
    }
}

/// Turn a non-2xx reply into `WxPayError::Api`. Bodies that are not the
/// gateway's error JSON keep the HTTP status as their code.
fn parse_api_error(status: StatusCode, body: &str) -> WxPayError {
    match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(err) => WxPayError::Api {
            code: err.code,
            message: err.message,
            detail: err.detail.map(Box::new),
        },
        Err(_) => WxPayError::api(format!("HTTP_{}", status.as_u16()), body),
    }
}

/// Percent-encode a URL path segment or query value.
pub(crate) fn encode_path_segment(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

pub(crate) fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
