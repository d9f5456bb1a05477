//! Browser returns from payment providers.
//!
//! Callers are browsers, so every request ends in `303 See Other` to a landing
//! page, including malformed or unknown ones.

use axum::{
    extract::{Query, State},
    response::Redirect,
};
use std::collections::HashMap;
use tracing::info;

use crate::{entities::Provider, AppState};

const APP_FLAG: &str = "app";

fn wants_app(params: &HashMap<String, String>) -> bool {
    matches!(params.get(APP_FLAG).map(String::as_str), Some("1" | "true"))
}

/// Undecodable query strings become an empty map, which resolves to `invalid`.
fn query_params(params: Option<Query<HashMap<String, String>>>) -> HashMap<String, String> {
    params.map(|Query(params)| params).unwrap_or_default()
}

async fn settle_and_redirect(
    state: AppState,
    provider: Provider,
    params: HashMap<String, String>,
) -> Redirect {
    let outcome = state.reconciliation.handle_callback(provider, &params).await;
    let destination = state.outcomes.destination(&outcome, wants_app(&params));
    info!(
        %provider,
        outcome = %outcome.kind,
        reason = %outcome.reason,
        "payment return handled"
    );
    Redirect::to(&destination)
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/khalti/return",
    summary = "Khalti return",
    params(
        ("pidx" = Option<String>, Query, description = "Khalti payment identifier"),
        ("app" = Option<String>, Query, description = "`1` to land in the mobile app"),
    ),
    responses((status = 303, description = "Redirect to the outcome page")),
    tag = "Payments"
)]
pub async fn khalti_return(
    State(state): State<AppState>,
    params: Option<Query<HashMap<String, String>>>,
) -> Redirect {
    settle_and_redirect(state, Provider::Khalti, query_params(params)).await
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/esewa/return",
    summary = "eSewa success return",
    params(
        ("data" = Option<String>, Query, description = "Signed base64 payload"),
        ("app" = Option<String>, Query, description = "`1` to land in the mobile app"),
    ),
    responses((status = 303, description = "Redirect to the outcome page")),
    tag = "Payments"
)]
pub async fn esewa_return(
    State(state): State<AppState>,
    params: Option<Query<HashMap<String, String>>>,
) -> Redirect {
    settle_and_redirect(state, Provider::Esewa, query_params(params)).await
}

/// eSewa's failure URL carries no signed data, only the transaction id we appended.
/// It is still verified against the provider before anything changes.
#[utoipa::path(
    get,
    path = "/api/v1/payments/esewa/failure",
    summary = "eSewa failure return",
    params(
        ("transaction_uuid" = Option<String>, Query, description = "Payment attempt id"),
        ("app" = Option<String>, Query, description = "`1` to land in the mobile app"),
    ),
    responses((status = 303, description = "Redirect to the outcome page")),
    tag = "Payments"
)]
pub async fn esewa_failure(
    State(state): State<AppState>,
    params: Option<Query<HashMap<String, String>>>,
) -> Redirect {
    settle_and_redirect(state, Provider::Esewa, query_params(params)).await
}
