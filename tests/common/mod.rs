#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use kinmel_api::{
    app_router,
    config::AppConfig,
    db,
    entities::product,
    events::{process_events, EventSender},
    AppState,
};

/// Test harness: application state over a throwaway SQLite database, with a
/// seeded buyer and seller session.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    buyer_token: String,
    seller_token: String,
    db_file: String,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let db_file = format!("kinmel_test_{}.db", Uuid::new_v4().simple());
        let _ = std::fs::remove_file(&db_file);

        let mut cfg = AppConfig::new(
            format!("sqlite://{db_file}?mode=rwc"),
            "test_secret_key_for_testing_purposes_only",
            3600,
            "127.0.0.1",
            18_080,
            "test",
        );
        cfg.db_max_connections = 5;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::ensure_schema(&pool).await.expect("failed to create schema");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_task = tokio::spawn(process_events(event_rx));

        let state = AppState::new(
            Arc::new(pool),
            Arc::new(cfg),
            Some(Arc::new(EventSender::new(event_tx))),
        );

        let buyer_id = Uuid::new_v4();
        let seller_id = Uuid::new_v4();
        let buyer_token = state
            .auth_service
            .issue_token(buyer_id)
            .expect("issue buyer token");
        let seller_token = state
            .auth_service
            .issue_token(seller_id)
            .expect("issue seller token");

        let router = app_router(state.clone());

        Self {
            router,
            state,
            buyer_id,
            seller_id,
            buyer_token,
            seller_token,
            db_file,
            _event_task: event_task,
        }
    }

    pub fn buyer_token(&self) -> &str {
        &self.buyer_token
    }

    pub fn seller_token(&self) -> &str {
        &self.seller_token
    }

    /// Seeds a product owned by the harness seller, located in Kathmandu.
    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        self.seed_product_at(name, price, stock, "Bagmati", "Kathmandu", "Kathmandu")
            .await
    }

    pub async fn seed_product_at(
        &self,
        name: &str,
        price: Decimal,
        stock: i32,
        province: &str,
        district: &str,
        municipality: &str,
    ) -> product::Model {
        let active = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            seller_id: Set(self.seller_id),
            name: Set(name.to_string()),
            unit_price: Set(price),
            stock: Set(stock),
            seller_province: Set(province.to_string()),
            seller_district: Set(district.to_string()),
            seller_municipality: Set(municipality.to_string()),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };
        active
            .insert(&*self.state.db)
            .await
            .expect("seed product for tests")
    }

    /// Sends a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn as_buyer(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(self.buyer_token()))
            .await
    }

    pub async fn as_seller(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request(method, uri, body, Some(self.seller_token()))
            .await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
        let _ = std::fs::remove_file(&self.db_file);
    }
}

/// Reads a response body as JSON.
pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}

/// Reads a response body as text.
pub async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    String::from_utf8(bytes.to_vec()).expect("response body is utf-8")
}

/// Standard delivery destination used by the integration tests: same
/// district as the seeded seller, different municipality.
pub fn kirtipur_destination() -> Value {
    serde_json::json!({
        "province": "Bagmati",
        "district": "Kathmandu",
        "municipality": "Kirtipur",
        "ward": 4,
        "label": "Home"
    })
}
