#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde_json::{json, Value};
use settle_api::{
    config::{AppConfig, EsewaConfig, KhaltiConfig},
    db::{self, DbConfig},
    entities::{
        commerce::{
            cart, product, product_variant, promotion_campaign, promotion_item, Cart, CartModel,
            DiscountType, ProductVariantModel,
        },
        order, payment_attempt, payment_log, AttemptStatus, Order, OrderModel, PaymentAttempt,
        PaymentAttemptModel, PaymentLog, PaymentLogModel, Provider,
    },
    events::{Event, EventSender},
    gateways::{esewa::EsewaGateway, GatewayRegistry},
    services::commerce::AddItemInput,
    AppState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::{
    matchers::{body_partial_json, header as header_eq, method, path, query_param},
    Mock, MockServer, Request as MockRequest, ResponseTemplate,
};

pub const ESEWA_SECRET: &str = "8gBm/:&EnhH.1/q";
pub const KHALTI_SECRET: &str = "test-key";
pub const FRONTEND: &str = "https://shop.test";
pub const ESEWA_STATUS_PATH: &str = "/api/epay/transaction/status/";

/// Application wired against a file-backed SQLite database and mock providers.
pub struct TestApp {
    pub state: AppState,
    router: Router,
    pub khalti: MockServer,
    pub esewa: MockServer,
    events: mpsc::Receiver<Event>,
    _db_dir: TempDir,
}

/// Khalti `pidx` the mock hands out for a payment attempt.
pub fn khalti_pidx(payment_id: Uuid) -> String {
    format!("pidx-{}", payment_id)
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir");
        let db_path = db_dir.path().join("settle_test.db");
        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());

        let pool = db::establish_connection_with_config(&DbConfig {
            url: db_url.clone(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .expect("failed to create test database");
        db::run_migrations(&pool).await.expect("migrations");

        let khalti = MockServer::start().await;
        let esewa = MockServer::start().await;

        let mut cfg = AppConfig::new(
            db_url,
            "test_secret_key_for_testing_purposes_only_with_enough_length_for_hs256_0123".into(),
            "127.0.0.1".into(),
            18_080,
            "test".into(),
        );
        cfg.gateway_timeout_secs = 2;
        cfg.frontend_base_url = FRONTEND.into();
        cfg.khalti = KhaltiConfig {
            base_url: khalti.uri(),
            secret_key: KHALTI_SECRET.into(),
            return_url: format!("{}/api/v1/payments/khalti/return", FRONTEND),
            website_url: FRONTEND.into(),
        };
        cfg.esewa = EsewaConfig {
            form_url: format!("{}/api/epay/main/v2/form", esewa.uri()),
            status_url: format!("{}{}", esewa.uri(), ESEWA_STATUS_PATH),
            product_code: "EPAYTEST".into(),
            secret_key: ESEWA_SECRET.into(),
            success_url: format!("{}/api/v1/payments/esewa/return", FRONTEND),
            failure_url: format!("{}/api/v1/payments/esewa/failure", FRONTEND),
        };
        customize(&mut cfg);

        let gateways = GatewayRegistry::from_config(&cfg).expect("gateways");
        let (tx, events) = mpsc::channel(256);
        let state = AppState::build(Arc::new(pool), cfg, gateways, EventSender::new(tx))
            .expect("app state");
        let router = settle_api::app_router(state.clone());

        let app = Self {
            state,
            router,
            khalti,
            esewa,
            events,
            _db_dir: db_dir,
        };
        app.mount_khalti_initiate().await;
        app
    }

    pub fn token_for(&self, owner: Uuid) -> String {
        self.state.auth.issue_token(owner).expect("token")
    }

    // ---------- HTTP ----------

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        owner: Option<Uuid>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(owner) = owner {
            builder = builder.header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.token_for(owner)),
            );
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }

    // ---------- Seeding ----------

    /// Active product with one active variant at `price` minor units.
    pub async fn seed_variant(&self, sku: &str, price: i64) -> ProductVariantModel {
        let now = Utc::now();
        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(format!("Product {}", sku)),
            description: Set(None),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("insert product");

        product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product.id),
            sku: Set(sku.to_string()),
            name: Set("Default".into()),
            attributes: Set(Some(json!({ "size": "M" }))),
            price: Set(price),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("insert variant")
    }

    pub async fn deactivate_variant(&self, variant_id: Uuid) {
        product_variant::ActiveModel {
            id: Set(variant_id),
            is_active: Set(false),
            ..Default::default()
        }
        .update(&*self.state.db)
        .await
        .expect("deactivate variant");
    }

    pub async fn add_to_cart(&self, owner: Uuid, variant_id: Uuid, quantity: i32) {
        self.state
            .carts
            .add_item(
                owner,
                AddItemInput {
                    variant_id,
                    quantity,
                },
            )
            .await
            .expect("add item");
    }

    /// Live campaign with a single item targeting `variant_id`.
    pub async fn seed_promotion(
        &self,
        variant_id: Uuid,
        discount_type: DiscountType,
        fixed_price: Option<i64>,
        percentage_bps: Option<i32>,
    ) -> Uuid {
        let now = Utc::now();
        let campaign = promotion_campaign::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Festival sale".into()),
            is_active: Set(true),
            starts_at: Set(Some(now - chrono::Duration::days(1))),
            ends_at: Set(Some(now + chrono::Duration::days(1))),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("insert campaign");

        promotion_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            campaign_id: Set(campaign.id),
            product_id: Set(None),
            variant_id: Set(Some(variant_id)),
            discount_type: Set(discount_type),
            fixed_price: Set(fixed_price),
            percentage_bps: Set(percentage_bps),
            is_active: Set(true),
            starts_at: Set(None),
            ends_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("insert promotion item")
        .id
    }

    /// Moves an attempt's creation time into the past so the sweep picks it up.
    pub async fn backdate_attempt(&self, payment_id: Uuid, created_at: DateTime<Utc>) {
        payment_attempt::ActiveModel {
            id: Set(payment_id),
            created_at: Set(created_at),
            ..Default::default()
        }
        .update(&*self.state.db)
        .await
        .expect("backdate attempt");
    }

    /// Inserts a pending attempt directly, bypassing initiation.
    pub async fn insert_pending_attempt(
        &self,
        order: &OrderModel,
        provider: Provider,
        reference: &str,
        created_at: DateTime<Utc>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        payment_attempt::ActiveModel {
            id: Set(id),
            order_id: Set(order.id),
            provider: Set(provider),
            provider_reference: Set(Some(reference.to_string())),
            amount: Set(order.total),
            currency: Set(order.currency.clone()),
            status: Set(AttemptStatus::Pending),
            raw_response: Set(None),
            created_at: Set(created_at),
            updated_at: Set(created_at),
        }
        .insert(&*self.state.db)
        .await
        .expect("insert attempt");
        id
    }

    // ---------- Reads ----------

    pub async fn carts_of(&self, owner: Uuid) -> Vec<CartModel> {
        Cart::find()
            .filter(cart::Column::OwnerId.eq(owner))
            .order_by_asc(cart::Column::CreatedAt)
            .all(&*self.state.db)
            .await
            .expect("carts")
    }

    pub async fn order(&self, order_id: Uuid) -> OrderModel {
        Order::find_by_id(order_id)
            .one(&*self.state.db)
            .await
            .expect("order query")
            .expect("order exists")
    }

    pub async fn orders_of(&self, owner: Uuid) -> Vec<OrderModel> {
        Order::find()
            .filter(order::Column::OwnerId.eq(owner))
            .all(&*self.state.db)
            .await
            .expect("orders")
    }

    pub async fn order_count(&self) -> usize {
        Order::find()
            .all(&*self.state.db)
            .await
            .expect("orders")
            .len()
    }

    pub async fn attempt(&self, payment_id: Uuid) -> PaymentAttemptModel {
        PaymentAttempt::find_by_id(payment_id)
            .one(&*self.state.db)
            .await
            .expect("attempt query")
            .expect("attempt exists")
    }

    pub async fn attempts_for(&self, order_id: Uuid) -> Vec<PaymentAttemptModel> {
        PaymentAttempt::find()
            .filter(payment_attempt::Column::OrderId.eq(order_id))
            .all(&*self.state.db)
            .await
            .expect("attempts")
    }

    pub async fn logs_for(&self, payment_id: Uuid) -> Vec<PaymentLogModel> {
        PaymentLog::find()
            .filter(payment_log::Column::PaymentId.eq(payment_id))
            .order_by_asc(payment_log::Column::CreatedAt)
            .all(&*self.state.db)
            .await
            .expect("payment logs")
    }

    /// Events emitted so far, in order.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    // ---------- Provider mocks ----------

    /// Khalti initiate answers `pidx-<purchase_order_id>` so references are unique
    /// and predictable.
    async fn mount_khalti_initiate(&self) {
        Mock::given(method("POST"))
            .and(path("/epayment/initiate/"))
            .and(header_eq("Authorization", format!("Key {}", KHALTI_SECRET).as_str()))
            .respond_with(|req: &MockRequest| {
                let body: Value = serde_json::from_slice(&req.body).unwrap_or_default();
                let payment_id = body["purchase_order_id"].as_str().unwrap_or_default();
                ResponseTemplate::new(200).set_body_json(json!({
                    "pidx": format!("pidx-{}", payment_id),
                    "payment_url": format!("https://pay.khalti.test/?pidx=pidx-{}", payment_id),
                    "expires_at": "2030-01-01T00:00:00+05:45",
                    "expires_in": 1800
                }))
            })
            .mount(&self.khalti)
            .await;
    }

    /// Khalti lookup for `pidx`, answering at most `times` requests when given.
    pub async fn mock_khalti_lookup(
        &self,
        pidx: &str,
        status: &str,
        total_amount: i64,
        times: Option<u64>,
    ) {
        let mock = Mock::given(method("POST"))
            .and(path("/epayment/lookup/"))
            .and(body_partial_json(json!({ "pidx": pidx })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "pidx": pidx,
                "total_amount": total_amount,
                "status": status,
                "transaction_id": "GFq9PFS7b2iYvL8Lir9oXe",
                "fee": 0,
                "refunded": false
            })));
        match times {
            Some(n) => mock.up_to_n_times(n).mount(&self.khalti).await,
            None => mock.mount(&self.khalti).await,
        }
    }

    pub async fn mock_khalti_lookup_response(&self, pidx: &str, response: ResponseTemplate) {
        Mock::given(method("POST"))
            .and(path("/epayment/lookup/"))
            .and(body_partial_json(json!({ "pidx": pidx })))
            .respond_with(response)
            .mount(&self.khalti)
            .await;
    }

    /// eSewa status lookup for `transaction_uuid`; `total_amount` is in rupees.
    pub async fn mock_esewa_status(&self, transaction_uuid: &str, status: &str, total_amount: &str) {
        Mock::given(method("GET"))
            .and(path(ESEWA_STATUS_PATH))
            .and(query_param("transaction_uuid", transaction_uuid))
            .and(query_param("product_code", "EPAYTEST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "product_code": "EPAYTEST",
                "transaction_uuid": transaction_uuid,
                "total_amount": total_amount,
                "status": status,
                "ref_id": "0001TS9"
            })))
            .mount(&self.esewa)
            .await;
    }

    /// Answers every eSewa status check with `status`.
    pub async fn mock_esewa_status_for_all(&self, status: &str) {
        Mock::given(method("GET"))
            .and(path(ESEWA_STATUS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "product_code": "EPAYTEST",
                "status": status
            })))
            .mount(&self.esewa)
            .await;
    }

    /// Base64 `data` parameter as eSewa appends it to the success URL.
    pub fn esewa_callback_data(&self, transaction_uuid: &str, total_amount: &str) -> String {
        use base64::{engine::general_purpose::STANDARD, Engine as _};

        let gateway = EsewaGateway::new(self.state.config.esewa.clone(), reqwest::Client::new());
        let names = "transaction_code,status,total_amount,transaction_uuid,product_code,signed_field_names";
        let message = format!(
            "transaction_code=000AWEO,status=COMPLETE,total_amount={},transaction_uuid={},product_code=EPAYTEST,signed_field_names={}",
            total_amount, transaction_uuid, names
        );
        let payload = json!({
            "transaction_code": "000AWEO",
            "status": "COMPLETE",
            "total_amount": total_amount,
            "transaction_uuid": transaction_uuid,
            "product_code": "EPAYTEST",
            "signed_field_names": names,
            "signature": gateway.sign(&message).expect("sign"),
        });
        STANDARD.encode(payload.to_string())
    }
}

pub fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

pub fn location(response: &Response) -> String {
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("location header")
        .to_string()
}
