mod common;

use axum::http::{Method, StatusCode};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use serde_json::json;

use common::{body_json, kirtipur_destination, TestApp};
use kinmel_api::entities::product;

/// Money fields serialize as decimal strings; compare values, not scale.
fn money(value: &serde_json::Value) -> rust_decimal::Decimal {
    value
        .as_str()
        .expect("money field is a string")
        .parse()
        .expect("money field parses as a decimal")
}

fn order_body(app: &TestApp, product_id: uuid::Uuid, quantity: i32) -> serde_json::Value {
    json!({
        "order_id": null,
        "seller_id": app.seller_id,
        "product_id": product_id,
        "quantity": quantity,
        "delivery": kirtipur_destination(),
    })
}

#[tokio::test]
async fn creating_an_order_computes_totals_server_side() {
    let app = TestApp::new().await;
    let product = app.seed_product("Dhaka topi", dec!(450.00), 5).await;

    let response = app
        .as_buyer(
            Method::POST,
            "/api/v1/orders",
            Some(order_body(&app, product.id, 2)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let order = &body["data"];
    assert_eq!(order["status"], "processing");
    assert_eq!(order["quantity"], 2);
    assert_eq!(money(&order["subtotal"]), dec!(900));
    // Same district, different municipality.
    assert_eq!(money(&order["delivery_charge"]), dec!(80));
    assert_eq!(money(&order["total_amount"]), dec!(980));
    assert!(order["order_number"].as_str().unwrap().starts_with("KIN-"));
    assert_eq!(order["payment"]["status"], "pending");
}

#[tokio::test]
async fn order_exceeding_stock_reports_available_quantity() {
    let app = TestApp::new().await;
    let product = app.seed_product("Singing bowl", dec!(850.00), 3).await;

    let response = app
        .as_buyer(
            Method::POST,
            "/api/v1/orders",
            Some(order_body(&app, product.id, 7)),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body = body_json(response).await;
    assert_eq!(body["available_stock"], 3);
}

#[tokio::test]
async fn updating_an_order_keeps_its_number_and_recomputes_totals() {
    let app = TestApp::new().await;
    let product = app.seed_product("Nettle shawl", dec!(1200.00), 10).await;

    let created = body_json(
        app.as_buyer(
            Method::POST,
            "/api/v1/orders",
            Some(order_body(&app, product.id, 2)),
        )
        .await,
    )
    .await;
    let order_id = created["data"]["id"].as_str().unwrap().to_string();
    let order_number = created["data"]["order_number"].as_str().unwrap().to_string();

    // Same order, new quantity and a cross-country destination.
    let response = app
        .as_buyer(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "order_id": order_id,
                "seller_id": app.seller_id,
                "product_id": product.id,
                "quantity": 3,
                "delivery": {
                    "province": "Gandaki",
                    "district": "Kaski",
                    "municipality": "Pokhara",
                    "ward": 11,
                    "label": null
                },
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let order = &body["data"];
    assert_eq!(order["id"], order_id.as_str());
    assert_eq!(order["order_number"], order_number.as_str());
    assert_eq!(money(&order["subtotal"]), dec!(3600));
    assert_eq!(money(&order["delivery_charge"]), dec!(180));
    assert_eq!(money(&order["total_amount"]), dec!(3780));
}

#[tokio::test]
async fn orders_are_hidden_from_other_accounts() {
    let app = TestApp::new().await;
    let product = app.seed_product("Khukuri", dec!(2500.00), 2).await;

    let created = body_json(
        app.as_buyer(
            Method::POST,
            "/api/v1/orders",
            Some(order_body(&app, product.id, 1)),
        )
        .await,
    )
    .await;
    let order_id = created["data"]["id"].as_str().unwrap().to_string();

    // A third account sees 404, not 403.
    let stranger = app.state.auth_service.issue_token(uuid::Uuid::new_v4()).unwrap();
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{order_id}"),
            None,
            Some(&stranger),
        )
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // No credential at all is a 401.
    let response = app
        .request(Method::GET, &format!("/api/v1/orders/{order_id}"), None, None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn shipping_requires_an_acknowledged_payment() {
    let app = TestApp::new().await;
    let product = app.seed_product("Lokta paper set", dec!(300.00), 5).await;

    let created = body_json(
        app.as_buyer(
            Method::POST,
            "/api/v1/orders",
            Some(order_body(&app, product.id, 1)),
        )
        .await,
    )
    .await;
    let order_id = created["data"]["id"].as_str().unwrap().to_string();

    let response = app
        .as_seller(Method::POST, &format!("/api/v1/orders/{order_id}/ship"), None)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn full_lifecycle_with_cash_on_delivery() {
    let app = TestApp::new().await;
    let product = app.seed_product("Thangka print", dec!(1500.00), 4).await;

    let created = body_json(
        app.as_buyer(
            Method::POST,
            "/api/v1/orders",
            Some(order_body(&app, product.id, 2)),
        )
        .await,
    )
    .await;
    let order_id = created["data"]["id"].as_str().unwrap().to_string();

    // Cash on delivery settles synchronously and takes the stock.
    let response = app
        .as_buyer(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/payment"),
            Some(json!({"method": "cod"})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let paid = body_json(response).await;
    assert_eq!(paid["data"]["payment"]["method"], "cod");

    let remaining = product::Entity::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap()
        .stock;
    assert_eq!(remaining, 2);

    // Seller ships, then records the handoff.
    let response = app
        .as_seller(Method::POST, &format!("/api/v1/orders/{order_id}/ship"), None)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .as_seller(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/delivered"),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let delivered = body_json(response).await;
    assert_eq!(delivered["data"]["status"], "delivered_pending");

    // Buyer confirms receipt from their session.
    let response = app
        .as_buyer(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/confirmation"),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let confirmed = body_json(response).await;
    assert_eq!(confirmed["data"]["status"], "success");
    assert_eq!(confirmed["data"]["auth_method"], "session");

    // A repeat confirmation is acknowledged, not an error.
    let repeat = body_json(
        app.as_buyer(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/confirmation"),
            None,
        )
        .await,
    )
    .await;
    assert_eq!(repeat["data"]["status"], "already_done");

    let order = body_json(
        app.as_buyer(Method::GET, &format!("/api/v1/orders/{order_id}"), None)
            .await,
    )
    .await;
    assert_eq!(order["data"]["status"], "completed");
}

#[tokio::test]
async fn cancelling_a_paid_order_restores_stock() {
    let app = TestApp::new().await;
    let product = app.seed_product("Pashmina scarf", dec!(2200.00), 5).await;

    let created = body_json(
        app.as_buyer(
            Method::POST,
            "/api/v1/orders",
            Some(order_body(&app, product.id, 3)),
        )
        .await,
    )
    .await;
    let order_id = created["data"]["id"].as_str().unwrap().to_string();

    app.as_buyer(
        Method::POST,
        &format!("/api/v1/orders/{order_id}/payment"),
        Some(json!({"method": "cod"})),
    )
    .await;

    let response = app
        .as_buyer(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/cancel"),
            Some(json!({"reason": "changed_mind", "description": null})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let cancelled = body_json(response).await;
    assert_eq!(cancelled["data"]["status"], "cancelled");
    assert_eq!(cancelled["data"]["cancellation"]["cancelled_by"], "buyer");

    let remaining = product::Entity::find_by_id(product.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap()
        .stock;
    assert_eq!(remaining, 5);

    // Terminal state: a second cancel is refused.
    let response = app
        .as_buyer(
            Method::POST,
            &format!("/api/v1/orders/{order_id}/cancel"),
            Some(json!({"reason": "again", "description": null})),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn listing_returns_only_the_callers_orders() {
    let app = TestApp::new().await;
    let product = app.seed_product("Tea sampler", dec!(600.00), 10).await;

    for quantity in [1, 2] {
        let response = app
            .as_buyer(
                Method::POST,
                "/api/v1/orders",
                Some(json!({
                    "order_id": null,
                    "seller_id": app.seller_id,
                    "product_id": product.id,
                    "quantity": quantity,
                    "delivery": kirtipur_destination(),
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let body = body_json(
        app.as_buyer(Method::GET, "/api/v1/orders?page=1&per_page=10", None)
            .await,
    )
    .await;
    assert_eq!(body["data"]["total"], 2);

    let other = app.state.auth_service.issue_token(uuid::Uuid::new_v4()).unwrap();
    let body = body_json(
        app.request(Method::GET, "/api/v1/orders", None, Some(&other))
            .await,
    )
    .await;
    assert_eq!(body["data"]["total"], 0);
}
