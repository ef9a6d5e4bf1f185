mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{form_encode, line, order_request, signed_notification, TestApp};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use storefront_api::entities::order::{self, OrderStatus, PaymentMethod};
use uuid::Uuid;

async fn notify(app: &TestApp, body: String) -> StatusCode {
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/orders/notify")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .expect("build request");
    app.send(request).await.status()
}

async fn load(app: &TestApp, id: Uuid) -> order::Model {
    order::Entity::find_by_id(id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .expect("order exists")
}

async fn payfast_order(app: &TestApp, stock: i32, quantity: i32) -> (Uuid, Uuid) {
    let (product, option) = app.seed_product("Olive Oil", stock, dec!(725)).await;
    let created = app
        .state
        .services
        .orders
        .create_order(
            order_request(vec![line(&option, quantity)], PaymentMethod::PayFast, None),
            None,
            None,
        )
        .await
        .unwrap();
    app.take_events();
    (created.order.id, product.id)
}

#[tokio::test]
async fn complete_notification_moves_order_to_processing_once() {
    let app = TestApp::new().await;
    let (order_id, _) = payfast_order(&app, 5, 2).await;
    let payload = signed_notification(order_id, "COMPLETE");

    assert_eq!(notify(&app, form_encode(&payload)).await, StatusCode::OK);
    let order = load(&app, order_id).await;
    assert_eq!(order.status, OrderStatus::Processing);
    let result = order.payment_result.expect("payment result recorded");
    assert_eq!(result.id.as_deref(), Some("1089250"));
    assert_eq!(result.status.as_deref(), Some("COMPLETE"));
    assert!(result.redirect_url.is_some(), "redirect url is kept");
    assert_eq!(app.take_events().len(), 1);

    // Gateways retry; a repeat only refreshes the recorded result
    assert_eq!(notify(&app, form_encode(&payload)).await, StatusCode::OK);
    assert_eq!(load(&app, order_id).await.status, OrderStatus::Processing);
    assert!(app.take_events().is_empty());
}

#[tokio::test]
async fn failed_notification_cancels_and_restores_stock_once() {
    let app = TestApp::new().await;
    let (order_id, product_id) = payfast_order(&app, 5, 2).await;
    assert_eq!(app.stock_of(product_id).await, 3);
    let payload = signed_notification(order_id, "FAILED");

    assert_eq!(notify(&app, form_encode(&payload)).await, StatusCode::OK);
    assert_eq!(load(&app, order_id).await.status, OrderStatus::Cancelled);
    assert_eq!(app.stock_of(product_id).await, 5);

    assert_eq!(notify(&app, form_encode(&payload)).await, StatusCode::OK);
    assert_eq!(app.stock_of(product_id).await, 5);

    // A late success cannot revive a cancelled order, but is still recorded
    let late = signed_notification(order_id, "COMPLETE");
    assert_eq!(notify(&app, form_encode(&late)).await, StatusCode::OK);
    let order = load(&app, order_id).await;
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(
        order.payment_result.and_then(|r| r.status).as_deref(),
        Some("COMPLETE")
    );
    assert_eq!(app.stock_of(product_id).await, 5);
}

#[tokio::test]
async fn tampered_notification_is_rejected_without_side_effects() {
    let app = TestApp::new().await;
    let (order_id, _) = payfast_order(&app, 5, 1).await;
    let mut payload = signed_notification(order_id, "COMPLETE");
    payload.insert("amount_gross".to_string(), "1.00".to_string());

    assert_eq!(notify(&app, form_encode(&payload)).await, StatusCode::BAD_REQUEST);
    let order = load(&app, order_id).await;
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(
        order.payment_result.and_then(|r| r.status).as_deref(),
        Some("pending")
    );

    payload.remove("signature");
    assert_eq!(notify(&app, form_encode(&payload)).await, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn signature_must_match_exactly() {
    let app = TestApp::new().await;
    let (order_id, _) = payfast_order(&app, 5, 1).await;
    let mut payload = signed_notification(order_id, "COMPLETE");
    let exact = payload["signature"].clone();

    for altered in [exact.to_uppercase(), format!(" {} ", exact)] {
        payload.insert("signature".to_string(), altered);
        assert_eq!(notify(&app, form_encode(&payload)).await, StatusCode::BAD_REQUEST);
        assert_eq!(load(&app, order_id).await.status, OrderStatus::Pending);
    }

    payload.insert("signature".to_string(), exact);
    assert_eq!(notify(&app, form_encode(&payload)).await, StatusCode::OK);
    assert_eq!(load(&app, order_id).await.status, OrderStatus::Processing);
}

#[tokio::test]
async fn signed_notification_for_unknown_order_is_not_found() {
    let app = TestApp::new().await;
    let payload = signed_notification(Uuid::new_v4(), "COMPLETE");
    assert_eq!(notify(&app, form_encode(&payload)).await, StatusCode::NOT_FOUND);
}
