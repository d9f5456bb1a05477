use axum::extract::{Json, Path, State};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    entities::Provider,
    errors::ServiceError,
    handlers::checkout::PaymentHandleResponse,
    services::{
        payments::PaymentView,
        reconciliation::{OutcomeKind, Reason, VerifyHint},
    },
    ApiResponse, ApiResult, AppState,
};

#[derive(Debug, Deserialize, ToSchema)]
pub struct InitiatePaymentRequest {
    pub order_id: Uuid,
    pub provider: Provider,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyPaymentRequest {
    pub payment_id: Uuid,
    pub provider: Provider,
    /// Provider reference (Khalti `pidx`)
    pub reference: Option<String>,
    /// Encoded callback payload (eSewa `data`)
    pub data: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyPaymentResponse {
    pub success: bool,
    pub terminal: bool,
    pub state: String,
    pub reason: Reason,
    pub payment_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
}

/// Opens a new payment attempt for an unpaid order
#[utoipa::path(
    post,
    path = "/api/v1/payments/initiate",
    summary = "Initiate payment",
    request_body = InitiatePaymentRequest,
    responses(
        (status = 200, description = "Payment session opened", body = ApiResponse<PaymentHandleResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order is not awaiting payment", body = crate::errors::ErrorResponse),
        (status = 502, description = "Provider unavailable", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn initiate_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<InitiatePaymentRequest>,
) -> ApiResult<PaymentHandleResponse> {
    let payment = state
        .payments
        .initiate(Some(user.user_id), request.order_id, request.provider)
        .await?;
    Ok(Json(ApiResponse::success(payment.into())))
}

/// Asks the provider for the payment's current state and settles it if final.
/// Safe to poll.
#[utoipa::path(
    post,
    path = "/api/v1/payments/verify",
    summary = "Verify payment",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Normalized payment state", body = ApiResponse<VerifyPaymentResponse>),
        (status = 400, description = "Malformed reference data", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown payment reference", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(request): Json<VerifyPaymentRequest>,
) -> ApiResult<VerifyPaymentResponse> {
    let outcome = state
        .reconciliation
        .verify(
            request.payment_id,
            request.provider,
            VerifyHint {
                reference: request.reference,
                data: request.data,
            },
        )
        .await?;

    match outcome.kind {
        OutcomeKind::NotFound => {
            return Err(ServiceError::NotFound(format!(
                "payment {}",
                request.payment_id
            )))
        }
        OutcomeKind::Invalid => {
            return Err(ServiceError::ValidationError(outcome.reason.to_string()))
        }
        _ => {}
    }

    Ok(Json(ApiResponse::success(VerifyPaymentResponse {
        success: outcome.success(),
        terminal: outcome.terminal,
        state: outcome.state,
        reason: outcome.reason,
        payment_id: outcome.payment_id,
        order_id: outcome.order_id,
    })))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/{id}",
    summary = "Get payment",
    params(("id" = Uuid, Path, description = "Payment attempt id")),
    responses(
        (status = 200, description = "Payment attempt", body = ApiResponse<PaymentView>),
        (status = 404, description = "Payment not found", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> ApiResult<PaymentView> {
    let payment = state.payments.get_payment(user.user_id, id).await?;
    Ok(Json(ApiResponse::success(payment)))
}
