//! JSON HTTP surface.

pub mod dto;
pub mod error;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{CombinationPatch, Order, Product, ProductAddon, VariantCombination};
use crate::inventory::StockTarget;
use crate::services::{
    CartQuote, CartView, CheckoutRequest, CouponPreview, NewProduct, PaymentEvent, PaymentEventAck, PaymentIntentCreated,
    Services,
};
use crate::shipping::ShippingRates;
use crate::{MarketplaceError, StoreSummary};

use dto::*;
pub use error::ApiError;

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Clone)]
pub struct AppState {
    pub services: Services,
}

impl AppState {
    pub fn new(services: Services) -> Self { Self { services } }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "opensase-marketplace"})) }))
        .route("/api/v1/stores", post(create_store))
        .route("/api/v1/products", post(create_product))
        .route("/api/v1/products/:id", get(get_product))
        .route("/api/v1/products/:id/publish", post(publish_product))
        .route("/api/v1/products/:id/archive", post(archive_product))
        .route("/api/v1/products/:id/axes", post(define_axis))
        .route("/api/v1/products/:id/combinations", get(list_combinations))
        .route("/api/v1/products/:id/addons", get(list_addons).post(add_addon))
        .route("/api/v1/combinations/:id", patch(update_combination))
        .route("/api/v1/coupons", post(create_coupon))
        .route("/api/v1/inventory/:kind/:id/restock", post(restock))
        .route("/api/v1/cart/:session", get(get_cart).post(add_to_cart).delete(clear_cart))
        .route("/api/v1/cart/:session/items/:line", put(update_cart_item).delete(remove_cart_item))
        .route("/api/v1/cart/:session/coupon", post(apply_coupon).delete(remove_coupon))
        .route("/api/v1/cart/:session/quote", post(quote_cart))
        .route("/api/v1/shipping/methods", get(shipping_methods))
        .route("/api/v1/shipping/quote", get(shipping_quote))
        .route("/api/v1/checkout/cash", post(checkout_cash))
        .route("/api/v1/checkout/payment-intent", post(create_payment_intent))
        .route("/api/v1/checkout/card/confirm", post(confirm_card_payment))
        .route("/api/v1/payments/webhook", post(payment_webhook))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn validated<T: Validate>(body: T) -> ApiResult<T> {
    body.validate()?;
    Ok(body)
}

// =============================================================================
// Catalog
// =============================================================================

async fn create_store(State(s): State<AppState>, Json(r): Json<CreateStoreRequest>) -> ApiResult<(StatusCode, Json<StoreSummary>)> {
    let r = validated(r)?;
    let store = s.services.catalog.create_store(&r.slug, &r.name).await?;
    Ok((StatusCode::CREATED, Json(store)))
}

async fn create_product(State(s): State<AppState>, Json(r): Json<NewProduct>) -> ApiResult<(StatusCode, Json<Product>)> {
    let product = s.services.catalog.create_product(r).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

async fn get_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Product>> {
    Ok(Json(s.services.catalog.product(id).await?))
}

async fn publish_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Product>> {
    Ok(Json(s.services.catalog.publish_product(id).await?))
}

async fn archive_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Product>> {
    Ok(Json(s.services.catalog.archive_product(id).await?))
}

async fn define_axis(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<DefineAxisRequest>) -> ApiResult<Json<Value>> {
    let r = validated(r)?;
    let (report, matrix) = s.services.catalog.define_axis(id, r.axis, r.values).await?;
    Ok(Json(json!({ "report": report, "options": matrix.options, "combinations": matrix.combinations })))
}

async fn list_combinations(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Vec<VariantCombination>>> {
    Ok(Json(s.services.catalog.combinations(id).await?))
}

async fn list_addons(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Vec<ProductAddon>>> {
    Ok(Json(s.services.catalog.addons(id).await?))
}

async fn add_addon(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<CreateAddonRequest>) -> ApiResult<(StatusCode, Json<ProductAddon>)> {
    let addon = validated(r)?.into_addon(id);
    Ok((StatusCode::CREATED, Json(s.services.catalog.add_addon(addon).await?)))
}

async fn update_combination(State(s): State<AppState>, Path(id): Path<Uuid>, Json(patch): Json<CombinationPatch>) -> ApiResult<Json<VariantCombination>> {
    Ok(Json(s.services.catalog.update_combination(id, &patch).await?))
}

async fn create_coupon(State(s): State<AppState>, Json(r): Json<CreateCouponRequest>) -> ApiResult<(StatusCode, Json<Value>)> {
    let coupon = validated(r)?.into_coupon()?;
    let coupon = s.services.catalog.create_coupon(coupon).await?;
    Ok((StatusCode::CREATED, Json(json!({ "id": coupon.id, "code": coupon.code, "store_id": coupon.store_id }))))
}

async fn restock(State(s): State<AppState>, Path((kind, id)): Path<(String, Uuid)>, Json(r): Json<RestockRequest>) -> ApiResult<Json<Value>> {
    let r = validated(r)?;
    let target = StockTarget::from_parts(&kind, id)
        .ok_or_else(|| MarketplaceError::invalid_field("kind", "Expected product or combination"))?;
    let on_hand = s.services.catalog.restock(target, r.quantity).await?;
    Ok(Json(json!({ "target": target, "on_hand": on_hand })))
}

// =============================================================================
// Cart
// =============================================================================

async fn get_cart(State(s): State<AppState>, Path(session): Path<String>) -> ApiResult<Json<CartView>> {
    Ok(Json(s.services.carts.get_cart(&session).await?))
}

async fn add_to_cart(State(s): State<AppState>, Path(session): Path<String>, Json(r): Json<AddToCartRequest>) -> ApiResult<(StatusCode, Json<CartView>)> {
    let r = validated(r)?;
    Ok((StatusCode::CREATED, Json(s.services.carts.add_item(&session, r.into()).await?)))
}

async fn clear_cart(State(s): State<AppState>, Path(session): Path<String>) -> ApiResult<Json<CartView>> {
    Ok(Json(s.services.carts.clear(&session).await?))
}

async fn update_cart_item(
    State(s): State<AppState>,
    Path((session, line)): Path<(String, Uuid)>,
    Json(r): Json<UpdateQuantityRequest>,
) -> ApiResult<Json<CartView>> {
    let r = validated(r)?;
    Ok(Json(s.services.carts.update_quantity(&session, line, r.quantity).await?))
}

async fn remove_cart_item(State(s): State<AppState>, Path((session, line)): Path<(String, Uuid)>) -> ApiResult<Json<CartView>> {
    Ok(Json(s.services.carts.remove_item(&session, line).await?))
}

async fn apply_coupon(State(s): State<AppState>, Path(session): Path<String>, Json(r): Json<ApplyCouponRequest>) -> ApiResult<Json<CouponPreview>> {
    let r = validated(r)?;
    Ok(Json(s.services.carts.apply_coupon(&session, &r.code, r.customer_email.as_deref()).await?))
}

async fn remove_coupon(State(s): State<AppState>, Path(session): Path<String>) -> ApiResult<Json<CartView>> {
    Ok(Json(s.services.carts.remove_coupon(&session).await?))
}

async fn quote_cart(State(s): State<AppState>, Path(session): Path<String>, Json(r): Json<QuoteRequest>) -> ApiResult<Json<CartQuote>> {
    let r = validated(r)?;
    Ok(Json(s.services.carts.quote(&session, &r.shipping_method_id, r.customer_email.as_deref()).await?))
}

// =============================================================================
// Shipping
// =============================================================================

async fn shipping_methods(State(s): State<AppState>) -> ApiResult<Json<Vec<ShippingMethodView>>> {
    let methods = s.services.shipping.methods().await?;
    Ok(Json(methods.into_iter().map(ShippingMethodView::from).collect()))
}

async fn shipping_quote(State(s): State<AppState>, Query(q): Query<ZipQuery>) -> ApiResult<Json<Value>> {
    let methods: Vec<ShippingMethodView> = s.services.shipping.quote(&q.zip).await?.into_iter().map(ShippingMethodView::from).collect();
    Ok(Json(json!({ "zip": q.zip.trim(), "methods": methods })))
}

// =============================================================================
// Checkout & orders
// =============================================================================

async fn checkout_cash(State(s): State<AppState>, Json(r): Json<CheckoutBody>) -> ApiResult<(StatusCode, Json<Order>)> {
    let request: CheckoutRequest = validated(r)?.into();
    Ok((StatusCode::CREATED, Json(s.services.checkout.place_cash_order(&request).await?)))
}

async fn create_payment_intent(State(s): State<AppState>, Json(r): Json<CheckoutBody>) -> ApiResult<(StatusCode, Json<PaymentIntentCreated>)> {
    let request: CheckoutRequest = validated(r)?.into();
    Ok((StatusCode::CREATED, Json(s.services.checkout.create_payment_intent(&request).await?)))
}

async fn confirm_card_payment(State(s): State<AppState>, Json(r): Json<ConfirmCardRequest>) -> ApiResult<Json<Order>> {
    Ok(Json(s.services.checkout.confirm_card_payment(r.order_id).await?))
}

async fn payment_webhook(State(s): State<AppState>, Json(r): Json<PaymentWebhook>) -> ApiResult<Json<PaymentEventAck>> {
    let event = PaymentEvent::try_from(validated(r)?)?;
    Ok(Json(s.services.checkout.handle_payment_event(&event).await?))
}

async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Order>> {
    Ok(Json(s.services.checkout.order(id).await?))
}

async fn cancel_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Order>> {
    Ok(Json(s.services.checkout.cancel_order(id).await?))
}
