use axum::extract::{Json, State};

use crate::{
    auth::AuthUser,
    services::commerce::{AddItemInput, CartView},
    ApiResponse, ApiResult, AppState,
};

/// The caller's active cart
#[utoipa::path(
    get,
    path = "/api/v1/cart",
    summary = "Get active cart",
    responses(
        (status = 200, description = "Active cart", body = ApiResponse<CartView>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn get_cart(State(state): State<AppState>, user: AuthUser) -> ApiResult<CartView> {
    let cart = state.carts.get_cart(user.user_id).await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    post,
    path = "/api/v1/cart/items",
    summary = "Add item to cart",
    request_body = AddItemInput,
    responses(
        (status = 200, description = "Updated cart", body = ApiResponse<CartView>),
        (status = 400, description = "Invalid quantity or unavailable variant", body = crate::errors::ErrorResponse),
        (status = 404, description = "Variant not found", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(input): Json<AddItemInput>,
) -> ApiResult<CartView> {
    let cart = state.carts.add_item(user.user_id, input).await?;
    Ok(Json(ApiResponse::success(cart)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/cart",
    summary = "Abandon active cart",
    responses(
        (status = 200, description = "Abandoned cart", body = ApiResponse<CartView>),
        (status = 404, description = "No active cart", body = crate::errors::ErrorResponse),
        (status = 409, description = "Cart changed concurrently", body = crate::errors::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
    tag = "Cart"
)]
pub async fn abandon_cart(State(state): State<AppState>, user: AuthUser) -> ApiResult<CartView> {
    let cart = state.carts.abandon_cart(user.user_id).await?;
    Ok(Json(ApiResponse::success(cart)))
}
