use axum::extract::{Json, State};
use serde::Serialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::{PaymentMethod, Provider},
    gateways::PaymentHandle,
    services::{commerce::CheckoutInput, payments::InitiatedPayment},
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct FormHandle {
    pub action: String,
    pub fields: BTreeMap<String, String>,
}

/// Where to send the shopper: a redirect URL or an auto-submitting form.
#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentHandleResponse {
    pub payment_id: Uuid,
    pub provider: Provider,
    pub amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form: Option<FormHandle>,
}

impl From<InitiatedPayment> for PaymentHandleResponse {
    fn from(payment: InitiatedPayment) -> Self {
        let (redirect_url, form) = match payment.handle {
            PaymentHandle::Redirect { url } => (Some(url), None),
            PaymentHandle::Form { action, fields } => (None, Some(FormHandle { action, fields })),
        };
        Self {
            payment_id: payment.payment_id,
            provider: payment.provider,
            amount: payment.amount,
            redirect_url,
            form,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub order_id: Uuid,
    pub order_number: String,
    pub subtotal: i64,
    pub discount: i64,
    pub total: i64,
    pub currency: String,
    pub payment_method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentHandleResponse>,
}

/// Turns the caller's active cart into an order
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    summary = "Checkout",
    description = "Prices the active cart into an order. Online methods also open a payment session.",
    request_body = CheckoutInput,
    responses(
        (status = 200, description = "Order created", body = ApiResponse<CheckoutResponse>),
        (status = 400, description = "Empty cart or invalid input", body = crate::errors::ErrorResponse),
        (status = 404, description = "No active cart", body = crate::errors::ErrorResponse),
        (status = 409, description = "Cart changed concurrently", body = crate::errors::ErrorResponse),
        (status = 422, description = "Pricing invariant violated", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Checkout"
)]
pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<CheckoutInput>,
) -> ApiResult<CheckoutResponse> {
    let payment_method = input.payment_method;
    let result = state.checkout.checkout(user.user_id, input).await?;

    Ok(Json(ApiResponse::success(CheckoutResponse {
        order_id: result.order.id,
        order_number: result.order.order_number,
        subtotal: result.order.subtotal,
        discount: result.order.discount,
        total: result.order.total,
        currency: result.order.currency,
        payment_method,
        payment: result.payment.map(Into::into),
    })))
}
