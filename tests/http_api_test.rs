mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use common::TestApp;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn send(app: &axum::Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = match body {
        Some(json) => Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let app = TestApp::new().await;
    let (status, body) = send(&app.router(), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn register_then_order_then_check_over_http() {
    let app = TestApp::new().await;
    let router = app.router();

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/v1/users",
        Some(json!({ "user_id": 1, "display_name": "alice" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user_id"], 1);

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/v1/users/1/orders",
        Some(json!({ "recipient": "alice_gift", "quantity": 100, "rail": "crypto_invoice" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body["pay_url"].as_str().unwrap().starts_with("https://pay.example/"));
    assert!(body["message"].as_str().unwrap().contains("Pay here"));

    // a second order while one is pending conflicts
    let (status, _) = send(
        &router,
        Method::POST,
        "/api/v1/users/1/orders",
        Some(json!({ "recipient": "alice_gift", "quantity": 100, "rail": "crypto_invoice" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&router, Method::POST, "/api/v1/users/1/orders/check", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "not_yet_paid");
    assert!(body["message"].as_str().unwrap().contains("not seen your payment"));

    app.invoice_rail.mark_paid();
    let (status, body) = send(&router, Method::POST, "/api/v1/users/1/orders/check", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "paid_and_fulfilled");
    assert!(body["message"].as_str().unwrap().contains("Payment confirmed"));

    let (status, _) = send(&router, Method::GET, "/api/v1/users/1/orders/pending", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&router, Method::GET, "/api/v1/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_sold"], 100);
}

#[tokio::test]
async fn conversation_endpoint_drives_the_dialogue() {
    let app = TestApp::new().await;
    let router = app.router();

    send(
        &router,
        Method::POST,
        "/api/v1/users",
        Some(json!({ "user_id": 2, "display_name": "bob" })),
    )
    .await;

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/v1/users/2/conversation",
        Some(json!({ "type": "start", "first_contact": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], "prompt");
    assert_eq!(body["state"], "choose_recipient");

    // validation failures map to 400
    let (status, _) = send(
        &router,
        Method::POST,
        "/api/v1/users/2/conversation",
        Some(json!({ "type": "text", "text": "@bob" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn rail_outage_returns_a_localized_try_later_message() {
    let app = TestApp::new().await;
    let router = app.router();

    send(
        &router,
        Method::POST,
        "/api/v1/users",
        Some(json!({ "user_id": 3, "display_name": "carol" })),
    )
    .await;

    // more failures than the retry budget allows
    app.invoice_rail
        .fail_creates
        .store(10, std::sync::atomic::Ordering::SeqCst);
    let (status, body) = send(
        &router,
        Method::POST,
        "/api/v1/users/3/orders",
        Some(json!({ "recipient": "carol_gift", "quantity": 50, "rail": "crypto_invoice" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["message"].as_str().unwrap().contains("try later"));
}

#[tokio::test]
async fn unknown_users_yield_404() {
    let app = TestApp::new().await;
    let (status, _) = send(&app.router(), Method::GET, "/api/v1/users/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_endpoints_enforce_the_admin_list() {
    let app = TestApp::new().await;
    app.services
        .settings
        .set(starshop_api::services::settings::keys::ADMIN_IDS, "900")
        .await
        .unwrap();
    let router = app.router();

    let (status, _) = send(
        &router,
        Method::PUT,
        "/api/v1/admin/settings",
        Some(json!({ "admin_id": 1, "key": "markup_percent", "value": "12" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &router,
        Method::PUT,
        "/api/v1/admin/settings",
        Some(json!({ "admin_id": 900, "key": "markup_percent", "value": "12" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/v1/admin/stats/reset-profit",
        Some(json!({ "admin_id": 900 })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}
