//! Settle API
//!
//! Checkout-to-payment backend: prices carts into immutable order snapshots,
//! hands off to redirect payment gateways and reconciles their outcomes.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateways;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;

use axum::{
    extract::FromRef,
    http::{header, HeaderValue, Method},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;
use utoipa::ToSchema;

use crate::{
    auth::AuthService,
    config::AppConfig,
    errors::ServiceError,
    events::EventSender,
    gateways::GatewayRegistry,
    services::{
        commerce::{CartService, CheckoutService},
        outcome::OutcomeResponder,
        payments::PaymentService,
        reconciliation::ReconciliationEngine,
    },
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub auth: Arc<AuthService>,
    pub carts: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub payments: Arc<PaymentService>,
    pub reconciliation: Arc<ReconciliationEngine>,
    pub outcomes: Arc<OutcomeResponder>,
}

impl AppState {
    /// Wires every service from one connection, one registry and one event channel.
    pub fn build(
        db: Arc<DatabaseConnection>,
        config: AppConfig,
        gateways: GatewayRegistry,
        event_sender: EventSender,
    ) -> Result<Self, ServiceError> {
        let gateways = Arc::new(gateways);
        let event_sender = Arc::new(event_sender);

        let payments = Arc::new(PaymentService::new(
            db.clone(),
            gateways.clone(),
            event_sender.clone(),
        ));
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            event_sender.clone(),
            payments.clone(),
            config.default_currency.clone(),
        ));
        let reconciliation = Arc::new(ReconciliationEngine::new(
            db.clone(),
            gateways,
            event_sender,
            config.gateway_timeout(),
        ));

        Ok(Self {
            auth: Arc::new(AuthService::new(
                config.jwt_secret.clone(),
                config.jwt_expiration,
            )),
            carts: Arc::new(CartService::new(db.clone())),
            outcomes: Arc::new(OutcomeResponder::from_config(&config)?),
            checkout,
            payments,
            reconciliation,
            config: Arc::new(config),
            db,
        })
    }
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

// Common response wrappers
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ServiceError>;

pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/cart",
            get(handlers::cart::get_cart).delete(handlers::cart::abandon_cart),
        )
        .route("/cart/items", post(handlers::cart::add_item))
        .route("/checkout", post(handlers::checkout::checkout))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route("/payments/initiate", post(handlers::payments::initiate_payment))
        .route("/payments/verify", post(handlers::payments::verify_payment))
        .route(
            "/payments/khalti/return",
            get(handlers::payment_returns::khalti_return),
        )
        .route(
            "/payments/esewa/return",
            get(handlers::payment_returns::esewa_return),
        )
        .route(
            "/payments/esewa/failure",
            get(handlers::payment_returns::esewa_failure),
        )
        .route("/payments/:id", get(handlers::payments::get_payment))
}

/// Full application router with tracing and CORS layers.
pub fn app_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if config.has_cors_allowed_origins() {
        let origins: Vec<HeaderValue> = config
            .cors_allowed_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(%origin, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        base.allow_origin(origins)
    } else if config.should_allow_permissive_cors() {
        base.allow_origin(tower_http::cors::Any)
    } else {
        base
    }
}
