use axum::response::Json;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Settle API",
        version = "0.1.0",
        description = r#"
# Settle API

Checkout and payment settlement for carts paid through redirect gateways.

## Authentication

Shopper endpoints take a JWT whose `sub` is the owner id:

```
Authorization: Bearer <your-jwt-token>
```

Provider return URLs are unauthenticated and always answer `303 See Other`.

## Amounts

All money fields are integers in minor currency units (paisa).
        "#
    ),
    tags(
        (name = "Cart", description = "Active cart"),
        (name = "Checkout", description = "Order snapshot creation"),
        (name = "Orders", description = "Order lookup"),
        (name = "Payments", description = "Payment initiation, verification and provider returns"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        crate::handlers::cart::get_cart,
        crate::handlers::cart::add_item,
        crate::handlers::cart::abandon_cart,
        crate::handlers::checkout::checkout,
        crate::handlers::orders::get_order,
        crate::handlers::payments::initiate_payment,
        crate::handlers::payments::verify_payment,
        crate::handlers::payments::get_payment,
        crate::handlers::payment_returns::khalti_return,
        crate::handlers::payment_returns::esewa_return,
        crate::handlers::payment_returns::esewa_failure,
        crate::handlers::health::health,
    ),
    components(
        schemas(
            crate::errors::ErrorResponse,
            crate::services::commerce::AddItemInput,
            crate::services::commerce::CartView,
            crate::services::commerce::cart_service::CartItemView,
            crate::services::commerce::CheckoutInput,
            crate::services::commerce::ShippingInfo,
            crate::handlers::checkout::CheckoutResponse,
            crate::handlers::checkout::PaymentHandleResponse,
            crate::handlers::checkout::FormHandle,
            crate::handlers::orders::OrderResponse,
            crate::handlers::orders::OrderItemResponse,
            crate::handlers::payments::InitiatePaymentRequest,
            crate::handlers::payments::VerifyPaymentRequest,
            crate::handlers::payments::VerifyPaymentResponse,
            crate::services::payments::PaymentView,
            crate::services::reconciliation::Reason,
            crate::entities::PaymentMethod,
            crate::entities::Provider,
            crate::entities::AttemptStatus,
            crate::entities::FulfillmentStatus,
            crate::entities::PaymentStatus,
            crate::entities::commerce::CartStatus,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDocV1::openapi())
}
