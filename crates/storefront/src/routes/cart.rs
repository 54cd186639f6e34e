//! Cart API handlers.
//!
//! The cart lives in the client's session. Every response carries the full
//! priced cart so the client never computes totals itself.

use axum::{Json, extract::State};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;
use tracing::instrument;

use kelp_core::{LineItem, ProductId, VariantId};

use crate::error::{AppError, Result};
use crate::models::ApiResponse;
use crate::services::{CartStore, CartView};
use crate::state::AppState;

/// Body of `POST /api/cart/items`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddItemRequest {
    pub product_id: ProductId,
    #[serde(default)]
    pub variant_id: Option<VariantId>,
    #[serde(default)]
    pub variant_name: Option<String>,
    pub name: String,
    pub slug: String,
    pub price: Decimal,
    #[serde(default)]
    pub image: Option<String>,
    pub max_quantity: u32,
    #[serde(default)]
    pub quantity: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateItemRequest {
    pub product_id: ProductId,
    #[serde(default)]
    pub variant_id: Option<VariantId>,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveItemRequest {
    pub product_id: ProductId,
    #[serde(default)]
    pub variant_id: Option<VariantId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CouponRequest {
    pub code: String,
    pub discount_amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct AddItemResponse {
    #[serde(flatten)]
    pub cart: CartView,
    /// `false` when the increase would exceed the line's max quantity.
    pub added: bool,
}

#[derive(Debug, Serialize)]
pub struct CartCount {
    pub count: u64,
}

fn view(state: &AppState, cart: &kelp_core::CartState) -> CartView {
    CartView::new(cart, state.pricing(), state.config().shop.currency)
}

/// `GET /api/cart`
#[instrument(skip_all)]
pub async fn show(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<ApiResponse<CartView>>> {
    let cart = CartStore::new(session).load().await?;
    Ok(Json(ApiResponse::ok(view(&state, &cart))))
}

/// `GET /api/cart/count`
#[instrument(skip_all)]
pub async fn count(session: Session) -> Result<Json<ApiResponse<CartCount>>> {
    let cart = CartStore::new(session).load().await?;
    Ok(Json(ApiResponse::ok(CartCount {
        count: cart.item_count(),
    })))
}

/// `POST /api/cart/items`
#[instrument(skip(state, session, body), fields(product_id = %body.product_id))]
pub async fn add_item(
    State(state): State<AppState>,
    session: Session,
    Json(body): Json<AddItemRequest>,
) -> Result<Json<ApiResponse<AddItemResponse>>> {
    let quantity = body.quantity.unwrap_or(1);
    let item = LineItem {
        product_id: body.product_id,
        variant_id: body.variant_id,
        variant_name: body.variant_name,
        name: body.name,
        slug: body.slug,
        unit_price: body.price,
        image: body.image,
        quantity,
        max_quantity: body.max_quantity,
    };
    item.check(quantity)
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let (cart, outcome) = CartStore::new(session)
        .update(|cart| cart.add_item(item, quantity))
        .await?;
    if !outcome.is_added() {
        tracing::debug!("add rejected, max quantity reached");
    }

    Ok(Json(ApiResponse::ok(AddItemResponse {
        cart: view(&state, &cart),
        added: outcome.is_added(),
    })))
}

/// `PATCH /api/cart/items`
#[instrument(skip(state, session, body), fields(product_id = %body.product_id, quantity = body.quantity))]
pub async fn update_item(
    State(state): State<AppState>,
    session: Session,
    Json(body): Json<UpdateItemRequest>,
) -> Result<Json<ApiResponse<CartView>>> {
    let (cart, ()) = CartStore::new(session)
        .update(|cart| cart.update_quantity(body.product_id, body.quantity, body.variant_id))
        .await?;
    Ok(Json(ApiResponse::ok(view(&state, &cart))))
}

/// `DELETE /api/cart/items`
#[instrument(skip(state, session, body), fields(product_id = %body.product_id))]
pub async fn remove_item(
    State(state): State<AppState>,
    session: Session,
    Json(body): Json<RemoveItemRequest>,
) -> Result<Json<ApiResponse<CartView>>> {
    let (cart, ()) = CartStore::new(session)
        .update(|cart| cart.remove_item(body.product_id, body.variant_id))
        .await?;
    Ok(Json(ApiResponse::ok(view(&state, &cart))))
}

/// `DELETE /api/cart`
#[instrument(skip_all)]
pub async fn clear(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<ApiResponse<CartView>>> {
    let (cart, ()) = CartStore::new(session).update(kelp_core::CartState::clear).await?;
    Ok(Json(ApiResponse::ok(view(&state, &cart))))
}

/// `POST /api/cart/coupon`
#[instrument(skip(state, session, body), fields(code = %body.code))]
pub async fn apply_coupon(
    State(state): State<AppState>,
    session: Session,
    Json(body): Json<CouponRequest>,
) -> Result<Json<ApiResponse<CartView>>> {
    let code = body.code.trim().to_uppercase();
    if code.is_empty() {
        return Err(AppError::BadRequest("Coupon code is required".to_owned()));
    }
    if body.discount_amount.is_sign_negative() {
        return Err(AppError::BadRequest(
            "Discount amount cannot be negative".to_owned(),
        ));
    }

    let (cart, ()) = CartStore::new(session)
        .update(|cart| cart.apply_coupon(code, body.discount_amount))
        .await?;
    Ok(Json(ApiResponse::ok(view(&state, &cart))))
}

/// `DELETE /api/cart/coupon`
#[instrument(skip_all)]
pub async fn remove_coupon(
    State(state): State<AppState>,
    session: Session,
) -> Result<Json<ApiResponse<CartView>>> {
    let (cart, ()) = CartStore::new(session)
        .update(kelp_core::CartState::remove_coupon)
        .await?;
    Ok(Json(ApiResponse::ok(view(&state, &cart))))
}
