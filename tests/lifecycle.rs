mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::sha2::Sha256;
use rsa::signature::Verifier;

use common::{manager, order, test_key, BrokenOrderStore, ScriptedGateway, MCH_ID};
use wxpay_callback_service::error::{ServiceError, WxPayError};
use wxpay_callback_service::model::order::OrderQueryResponse;
use wxpay_callback_service::model::platform::PaymentStatus;
use wxpay_callback_service::store::{InMemoryOrderStore, OrderStore};
use wxpay_callback_service::PrepayOrderRequest;

fn request() -> PrepayOrderRequest {
    PrepayOrderRequest {
        app_id: "wx1".into(),
        payer_uid: "u1".into(),
        trade_id: "T1".into(),
        item_description: "d".into(),
        item_amount_total: 100,
    }
}

async fn status_of(orders: &InMemoryOrderStore, trade_id: &str) -> PaymentStatus {
    orders
        .get_platform_order(trade_id)
        .await
        .unwrap()
        .expect("order exists")
        .status
}

#[tokio::test]
async fn prepay_success_ends_at_create_signature_with_verifiable_signature() {
    let key = test_key();
    let gateway = Arc::new(ScriptedGateway::new());
    let orders = Arc::new(InMemoryOrderStore::new());
    let mgr = manager(gateway.clone(), orders.clone(), &key);

    let params = mgr.create_prepay_order(request()).await.unwrap();

    assert_eq!(status_of(&orders, "T1").await, PaymentStatus::CreateSignature);
    assert!(!params.pay_sign.is_empty());
    assert_eq!(params.sign_type, "RSA");
    assert_eq!(params.package, "prepay_id=wx201410272009395522657a690389285100");
    assert_eq!(params.nonce.len(), 24);
    assert!(params.nonce.chars().all(|c| c.is_ascii_alphanumeric()));

    let canonical = format!(
        "wx1\n{}\n{}\n{}\n",
        params.timestamp, params.nonce, params.package
    );
    let sig_bytes = BASE64.decode(&params.pay_sign).unwrap();
    let signature = Signature::try_from(sig_bytes.as_slice()).unwrap();
    let verifying_key = VerifyingKey::<Sha256>::new(key.public_key.clone());
    assert!(verifying_key.verify(canonical.as_bytes(), &signature).is_ok());

    let sent = gateway.prepay_requests.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].appid, "wx1");
    assert_eq!(sent[0].mchid, MCH_ID);
    assert_eq!(sent[0].out_trade_no, "T1");
    assert_eq!(sent[0].description, "d");
    assert_eq!(sent[0].amount.total, 100);
    assert_eq!(sent[0].payer.openid, "u1");
    assert_eq!(sent[0].notify_url, "https://example.com/notify");
    assert!(sent[0].time_expire.is_some());
}

#[tokio::test]
async fn stored_order_carries_request_fields_and_expiry() {
    let key = test_key();
    let orders = Arc::new(InMemoryOrderStore::new());
    let mgr = manager(Arc::new(ScriptedGateway::new()), orders.clone(), &key);

    mgr.create_prepay_order(request()).await.unwrap();

    let saved = orders.get_platform_order("T1").await.unwrap().unwrap();
    assert_eq!(saved.merchant_id, MCH_ID);
    assert_eq!(saved.payer_uid, "u1");
    assert_eq!(saved.item_amount_total, 100);
    assert_eq!(saved.expire_time - saved.create_time, 30 * 60);
    assert!(saved.update_time >= saved.create_time);
}

#[tokio::test(start_paused = true)]
async fn prepay_system_error_is_retried_three_times_then_fails() {
    let key = test_key();
    let gateway = Arc::new(
        ScriptedGateway::new().on_prepay(|_| Err(WxPayError::api("SYSTEM_ERROR", "busy"))),
    );
    let orders = Arc::new(InMemoryOrderStore::new());
    let mgr = manager(gateway.clone(), orders.clone(), &key);

    let err = mgr.create_prepay_order(request()).await.unwrap_err();

    assert_eq!(err, ServiceError::Internal("WX_PRE_PAY_ERROR".into()));
    assert_eq!(status_of(&orders, "T1").await, PaymentStatus::CreatePrepayFailed);
    // One call plus three retries.
    assert_eq!(gateway.prepay_calls.load(Ordering::SeqCst), 4);

    let times = gateway.prepay_times.lock().unwrap().clone();
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        vec![
            Duration::from_secs(1),
            Duration::from_secs(2),
            Duration::from_secs(3)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn prepay_recovers_after_transient_errors() {
    let key = test_key();
    let gateway = Arc::new(ScriptedGateway::new().on_prepay(|n| {
        if n < 2 {
            Err(WxPayError::api("FREQUENCY_LIMITED", "slow down"))
        } else {
            Ok(wxpay_callback_service::model::prepay::JsapiPrepayResponse {
                prepay_id: "p3".into(),
            })
        }
    }));
    let orders = Arc::new(InMemoryOrderStore::new());
    let mgr = manager(gateway.clone(), orders.clone(), &key);

    let params = mgr.create_prepay_order(request()).await.unwrap();
    assert_eq!(params.package, "prepay_id=p3");
    assert_eq!(gateway.prepay_calls.load(Ordering::SeqCst), 3);
    assert_eq!(status_of(&orders, "T1").await, PaymentStatus::CreateSignature);
}

#[tokio::test]
async fn prepay_terminal_error_is_not_retried() {
    let key = test_key();
    let gateway = Arc::new(
        ScriptedGateway::new().on_prepay(|_| Err(WxPayError::api("PARAM_ERROR", "bad openid"))),
    );
    let orders = Arc::new(InMemoryOrderStore::new());
    let mgr = manager(gateway.clone(), orders.clone(), &key);

    let err = mgr.create_prepay_order(request()).await.unwrap_err();
    assert_eq!(err, ServiceError::Internal("WX_PRE_PAY_ERROR".into()));
    assert_eq!(gateway.prepay_calls.load(Ordering::SeqCst), 1);
    assert_eq!(status_of(&orders, "T1").await, PaymentStatus::CreatePrepayFailed);
}

#[tokio::test]
async fn storage_failure_on_insert_stops_before_gateway() {
    let key = test_key();
    let gateway = Arc::new(ScriptedGateway::new());
    let mgr = manager(gateway.clone(), Arc::new(BrokenOrderStore), &key);

    let err = mgr.create_prepay_order(request()).await.unwrap_err();
    assert_eq!(
        err,
        ServiceError::Internal("Failed to create platform-order.".into())
    );
    assert_eq!(gateway.prepay_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn close_treats_already_closed_codes_as_success() {
    for code in ["ORDER_CLOSED", "ORDERNOTEXIST", "ORDER_NOT_EXIST", "MCH_NOT_EXISTS"] {
        let key = test_key();
        let gateway = Arc::new(
            ScriptedGateway::new().on_close(move |_| Err(WxPayError::api(code, "gone"))),
        );
        let orders = Arc::new(InMemoryOrderStore::new());
        orders
            .add_platform_order(order("T1", PaymentStatus::CreateSignature))
            .await
            .unwrap();
        let mgr = manager(gateway.clone(), orders.clone(), &key);

        mgr.close_order("T1").await.unwrap();
        assert_eq!(status_of(&orders, "T1").await, PaymentStatus::CloseOrder, "{code}");
        assert_eq!(gateway.close_calls.load(Ordering::SeqCst), 1);
    }
}

#[tokio::test]
async fn close_success_and_failure_update_status() {
    let key = test_key();
    let orders = Arc::new(InMemoryOrderStore::new());
    orders
        .add_platform_order(order("T1", PaymentStatus::CreateSignature))
        .await
        .unwrap();
    orders
        .add_platform_order(order("T2", PaymentStatus::CreateSignature))
        .await
        .unwrap();

    let ok = manager(Arc::new(ScriptedGateway::new()), orders.clone(), &key);
    ok.close_order("T1").await.unwrap();
    assert_eq!(status_of(&orders, "T1").await, PaymentStatus::CloseOrder);

    let failing = manager(
        Arc::new(ScriptedGateway::new().on_close(|_| Err(WxPayError::api("PARAM_ERROR", "bad")))),
        orders.clone(),
        &key,
    );
    let err = failing.close_order("T2").await.unwrap_err();
    assert_eq!(err, ServiceError::Internal("WX_CLOSE_ORDER_ERROR".into()));
    assert_eq!(status_of(&orders, "T2").await, PaymentStatus::CloseOrderFailed);
}

#[tokio::test]
async fn close_of_unknown_order_still_succeeds() {
    let key = test_key();
    let mgr = manager(
        Arc::new(ScriptedGateway::new()),
        Arc::new(InMemoryOrderStore::new()),
        &key,
    );
    assert!(mgr.close_order("never-created").await.is_ok());
}

#[tokio::test]
async fn query_maps_gateway_response_without_touching_store() {
    let key = test_key();
    let gateway = Arc::new(ScriptedGateway::new().on_query(|_| {
        Ok(OrderQueryResponse {
            appid: "wx1".into(),
            mchid: MCH_ID.into(),
            out_trade_no: "T1".into(),
            transaction_id: Some("4200".into()),
            trade_state: "SUCCESS".into(),
            trade_state_desc: "支付成功".into(),
            trade_type: Some("JSAPI".into()),
            bank_type: None,
            success_time: Some("2024-01-01T12:00:00+08:00".into()),
            amount: None,
            payer: None,
            attach: None,
        })
    }));
    let orders = Arc::new(InMemoryOrderStore::new());
    orders
        .add_platform_order(order("T1", PaymentStatus::CreateSignature))
        .await
        .unwrap();
    let mgr = manager(gateway, orders.clone(), &key);

    let view = mgr.query_status("T1").await.unwrap();
    assert_eq!(view.app_id, "wx1");
    assert_eq!(view.trade_id, "T1");
    assert_eq!(view.trade_state, "SUCCESS");
    assert_eq!(view.transaction_id.as_deref(), Some("4200"));
    assert_eq!(view.trade_type.as_deref(), Some("JSAPI"));
    assert_eq!(status_of(&orders, "T1").await, PaymentStatus::CreateSignature);
}

#[tokio::test]
async fn query_failure_is_internal() {
    let key = test_key();
    let mgr = manager(
        Arc::new(ScriptedGateway::new()),
        Arc::new(InMemoryOrderStore::new()),
        &key,
    );
    let err = mgr.query_status("T1").await.unwrap_err();
    assert_eq!(err, ServiceError::Internal("WX_QUERY_ORDER_ERROR".into()));
}
