//! HTTP surface, driven through the router without a socket.

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use tower::ServiceExt;

use opensase_marketplace::api::{router, AppState};
use opensase_marketplace::config::Config;
use opensase_marketplace::payment::SandboxGateway;
use opensase_marketplace::publisher::EventPublisher;
use opensase_marketplace::services::Services;
use opensase_marketplace::shipping::FlatRateTable;
use opensase_marketplace::store::InMemoryStore;

fn app() -> Router {
    let services = Services::new(
        Arc::new(InMemoryStore::new()),
        Arc::new(SandboxGateway::new()),
        Arc::new(FlatRateTable::default()),
        EventPublisher::disabled(),
        &Config::default(),
    );
    router(AppState::new(services))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri).header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

fn decimal(v: &Value) -> Decimal {
    Decimal::from_str(v.as_str().unwrap()).unwrap()
}

async fn seed_store(app: &Router, slug: &str) -> Value {
    let (status, store) = send(app, Method::POST, "/api/v1/stores", Some(json!({"slug": slug, "name": slug}))).await;
    assert_eq!(status, StatusCode::CREATED);
    store
}

async fn seed_product(app: &Router, store_id: &Value, slug: &str, price: &str, quantity: i32) -> String {
    let (status, product) = send(app, Method::POST, "/api/v1/products", Some(json!({
        "store_id": store_id, "slug": slug, "name": slug, "base_price": price, "quantity": quantity, "publish": true
    }))).await;
    assert_eq!(status, StatusCode::CREATED, "{product}");
    product["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let (status, body) = send(&app(), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_cart_to_cash_order() {
    let app = app();
    let store = seed_store(&app, "alpha").await;
    let mug = seed_product(&app, &store["id"], "mug", "50.00", 5).await;
    let (status, _) = send(&app, Method::POST, "/api/v1/coupons", Some(json!({
        "store_id": store["id"], "code": "starter5", "discount_type": "PERCENTAGE", "value": "5"
    }))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, cart) = send(&app, Method::POST, "/api/v1/cart/web-1", Some(json!({"product_id": mug, "quantity": 2}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(cart["lines"].as_array().unwrap().len(), 1);

    let (status, preview) = send(&app, Method::POST, "/api/v1/cart/web-1/coupon", Some(json!({"code": "STARTER5"}))).await;
    assert_eq!(status, StatusCode::OK, "{preview}");
    assert_eq!(decimal(&preview["discount"]["product_discount"]), Decimal::new(5, 0));

    let (status, quote) = send(&app, Method::POST, "/api/v1/cart/web-1/quote", Some(json!({"shipping_method_id": "standard"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(quote["totals"]["total"], "113.09");

    let (status, order) = send(&app, Method::POST, "/api/v1/checkout/cash", Some(json!({
        "session_id": "web-1", "shipping_method_id": "standard", "customer_email": "ada@example.com"
    }))).await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    assert_eq!(order["status"], "CONFIRMED");
    assert_eq!(order["totals"]["total"], "113.09");

    let uri = format!("/api/v1/products/{mug}");
    let (_, product) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(product["quantity"], 3);

    let uri = format!("/api/v1/orders/{}/cancel", order["id"].as_str().unwrap());
    let (status, cancelled) = send(&app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "CANCELLED");
    let (status, _) = send(&app, Method::POST, &uri, None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_different_store_conflict() {
    let app = app();
    let alpha = seed_store(&app, "alpha").await;
    let beta = seed_store(&app, "beta").await;
    let mug = seed_product(&app, &alpha["id"], "mug", "10", 5).await;
    let cap = seed_product(&app, &beta["id"], "cap", "12", 5).await;

    send(&app, Method::POST, "/api/v1/cart/web-2", Some(json!({"product_id": mug, "quantity": 1}))).await;
    let (status, body) = send(&app, Method::POST, "/api/v1/cart/web-2", Some(json!({"product_id": cap, "quantity": 1}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "DIFFERENT_STORE");
    assert_eq!(body["error"]["details"]["current_store"]["slug"], "alpha");
    assert_eq!(body["error"]["details"]["requested_store"]["slug"], "beta");
}

#[tokio::test]
async fn test_error_statuses() {
    let app = app();
    let store = seed_store(&app, "alpha").await;
    let mug = seed_product(&app, &store["id"], "mug", "10", 1).await;

    let (status, body) = send(&app, Method::POST, "/api/v1/cart/web-3", Some(json!({"product_id": mug, "quantity": 0}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["fields"], json!(["quantity"]));

    let (status, body) = send(&app, Method::POST, "/api/v1/cart/web-3", Some(json!({"product_id": mug, "quantity": 2}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "OUT_OF_STOCK");

    send(&app, Method::POST, "/api/v1/cart/web-3", Some(json!({"product_id": mug, "quantity": 1}))).await;
    let (status, body) = send(&app, Method::POST, "/api/v1/cart/web-3/coupon", Some(json!({"code": "NOPE"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "INVALID_CODE");

    let (status, _) = send(&app, Method::GET, "/api/v1/shipping/quote?zip=123", None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let (status, body) = send(&app, Method::GET, "/api/v1/shipping/quote?zip=94107", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["methods"][1]["estimated_delivery"], "2-3 days");

    let uri = format!("/api/v1/orders/{}", uuid::Uuid::now_v7());
    let (status, body) = send(&app, Method::GET, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["details"]["entity"], "order");
}

#[tokio::test]
async fn test_card_webhook_round() {
    let app = app();
    let store = seed_store(&app, "alpha").await;
    let mug = seed_product(&app, &store["id"], "mug", "20", 3).await;
    send(&app, Method::POST, "/api/v1/cart/web-4", Some(json!({"product_id": mug, "quantity": 1}))).await;

    let (status, created) = send(&app, Method::POST, "/api/v1/checkout/payment-intent", Some(json!({
        "session_id": "web-4", "shipping_method_id": "express", "customer_email": "bo@example.com"
    }))).await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["order"]["status"], "PENDING_PAYMENT");

    let hook = json!({"event_id": "evt_9", "intent_id": created["intent_id"], "status": "succeeded"});
    let (status, ack) = send(&app, Method::POST, "/api/v1/payments/webhook", Some(hook.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["disposition"], "applied");
    let (_, ack) = send(&app, Method::POST, "/api/v1/payments/webhook", Some(hook)).await;
    assert_eq!(ack["disposition"], "already_settled");

    let (_, product) = send(&app, Method::GET, &format!("/api/v1/products/{mug}"), None).await;
    assert_eq!(product["quantity"], 2);
}
