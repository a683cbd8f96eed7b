use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::error::ServiceError;
use crate::lifecycle::{OrderLifecycleManager, PrepayOrderRequest};
use crate::model::notify::NotifyAck;
use crate::model::order::PaymentStatusView;
use crate::model::prepay::PaymentParams;
use crate::processor::NotificationProcessor;

const PANIC_MESSAGE: &str = "Recover from internal server panic.";

#[derive(Clone)]
pub struct AppState {
    lifecycle: Arc<OrderLifecycleManager>,
    processor: Arc<NotificationProcessor>,
}

impl AppState {
    pub fn new(lifecycle: Arc<OrderLifecycleManager>, processor: Arc<NotificationProcessor>) -> Self {
        Self {
            lifecycle,
            processor,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeIdResponse {
    pub trade_id: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrepayOrderBody {
    pub app_id: String,
    pub payer_uid: String,
    pub trade_id: String,
    pub item_description: String,
    pub item_amount_total: i64,
}

impl From<PrepayOrderBody> for PrepayOrderRequest {
    fn from(body: PrepayOrderBody) -> Self {
        Self {
            app_id: body.app_id,
            payer_uid: body.payer_uid,
            trade_id: body.trade_id,
            item_description: body.item_description,
            item_amount_total: body.item_amount_total,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TradeIdBody {
    pub trade_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EmptyResponse {}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub code: i32,
    pub message: String,
}

/// Build the service router with request-id, tracing, panic and timeout layers.
pub fn router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/v1/MakeNewPlatformTradeId", post(make_trade_id))
        .route("/v1/MakeNewWxPrepayOrder", post(make_prepay_order))
        .route("/v1/QueryWxPaymentStatus", post(query_payment_status))
        .route("/v1/CloseWxPrepayOrder", post(close_prepay_order))
        .route("/notify", post(payment_notify))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http().make_span_with(|req: &Request| {
                    let request_id = req
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-");
                    tracing::info_span!(
                        "http_request",
                        method = %req.method(),
                        uri = %req.uri(),
                        request_id,
                    )
                }))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(TimeoutLayer::new(request_timeout)),
        )
}

#[derive(Clone, Copy)]
struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&uuid::Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = detail, "request handler panicked");
    ServiceError::Internal(PANIC_MESSAGE.into()).into_response()
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ServiceError> {
    body.map(|Json(v)| v)
        .map_err(|e| ServiceError::InvalidArgument(e.body_text()))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        code: 0,
        message: "OK".into(),
    })
}

async fn make_trade_id(State(state): State<AppState>) -> Json<TradeIdResponse> {
    Json(TradeIdResponse {
        trade_id: state.lifecycle.create_trade_id(),
    })
}

async fn make_prepay_order(
    State(state): State<AppState>,
    body: Result<Json<PrepayOrderBody>, JsonRejection>,
) -> Result<Json<PaymentParams>, ServiceError> {
    let req = json_body(body)?;
    let params = state.lifecycle.create_prepay_order(req.into()).await?;
    Ok(Json(params))
}

async fn query_payment_status(
    State(state): State<AppState>,
    body: Result<Json<TradeIdBody>, JsonRejection>,
) -> Result<Json<PaymentStatusView>, ServiceError> {
    let req = json_body(body)?;
    let view = state.lifecycle.query_status(&req.trade_id).await?;
    Ok(Json(view))
}

async fn close_prepay_order(
    State(state): State<AppState>,
    body: Result<Json<TradeIdBody>, JsonRejection>,
) -> Result<Json<EmptyResponse>, ServiceError> {
    let req = json_body(body)?;
    state.lifecycle.close_order(&req.trade_id).await?;
    Ok(Json(EmptyResponse {}))
}

async fn payment_notify(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<NotifyAck>) {
    let (status, ack) = state.processor.handle_raw(&headers, &body).await;
    (status, Json(ack))
}
