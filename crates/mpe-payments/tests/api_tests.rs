//! Integration tests for the payment API.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use mpe_payments::{
    api::{create_router, ApiState},
    PaymentKey, PaymentState, PaymentStateStore, PaymentUri,
};
use std::sync::Arc;
use tower::ServiceExt;

const TX: &str = "0x8f7a7e3c1b3d4f5a6b7c8d9e0f1a2b3c4d5e6f708192a3b4c5d6e7f8091a2b3c";

async fn app_with_payment() -> (Router, Arc<PaymentStateStore>, PaymentState) {
    let store = PaymentStateStore::memory();
    let payment = store
        .create(
            PaymentKey {
                room_id: "!room:example.org".into(),
                sender: "@alice:example.org".into(),
                command: "org1 v1 calc add".into(),
            },
            PaymentUri {
                scheme: "ethereum".into(),
                token: "0x5B7533812759B45C2B44C19e320ba2cD2681b542".into(),
                recipient: "0x1111111111111111111111111111111111111111".into(),
                amount: 100,
            },
        )
        .await
        .unwrap();

    let app = create_router(Arc::new(ApiState::new(store.clone())));
    (app, store, payment)
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn put_tx(id: &str, tx_hash: &str) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri("/api/payment")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({ "id": id, "tx_hash": tx_hash }).to_string(),
        ))
        .unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _, _) = app_with_payment().await;

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["healthy"], true);
    assert_eq!(json["payments"], 1);
}

#[tokio::test]
async fn test_get_payment() {
    let (app, _, payment) = app_with_payment().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/payment?id={}", payment.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "pending");
    assert_eq!(json["id"], payment.id.to_string());
    assert!(json["payment_uri"]
        .as_str()
        .unwrap()
        .ends_with("/transfer?address=0x1111111111111111111111111111111111111111&uint256=100"));
}

#[tokio::test]
async fn test_get_unknown_payment() {
    let (app, _, _) = app_with_payment().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/payment?id={}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_record_tx_hash() {
    let (app, store, payment) = app_with_payment().await;

    let response = app
        .oneshot(put_tx(&payment.id.to_string(), TX))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        store.get(payment.id).await.unwrap().tx_hash.as_deref(),
        Some(TX)
    );
}

#[tokio::test]
async fn test_record_tx_hash_after_expiry_conflicts() {
    let (app, store, payment) = app_with_payment().await;
    store.mark_expired(payment.id).await.unwrap();

    let response = app
        .oneshot(put_tx(&payment.id.to_string(), TX))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["code"], "NOT_PENDING");
}

#[tokio::test]
async fn test_tx_hash_reused_for_second_payment_conflicts() {
    let (app, store, payment) = app_with_payment().await;
    store.record_tx_hash(payment.id, TX).await.unwrap();
    let other = store
        .create(payment.key.clone(), payment.uri.clone())
        .await
        .unwrap();

    let response = app
        .oneshot(put_tx(&other.id.to_string(), TX))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["code"], "TX_HASH_IN_USE");
    assert!(store.get(other.id).await.unwrap().tx_hash.is_none());
}

#[tokio::test]
async fn test_record_malformed_tx_hash() {
    let (app, _, payment) = app_with_payment().await;

    let response = app
        .oneshot(put_tx(&payment.id.to_string(), "0xdeadbeef"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
