//! Postgres store.
//!
//! Stock and coupon counters only move through conditional updates, and every
//! multi-row order write runs in one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{MarketplaceStore, SettleOutcome};
use crate::domain::aggregates::{
    Address, AddonField, AddonPricing, AppliedCoupon, AxisType, CartItem, CartSession, CombinationKey, Coupon, Customer,
    DiscountType, Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus, Product, ProductAddon, ProductStatus,
    Selection, StoreSummary, VariantCombination, VariantMatrix, VariantMode, VariantOption,
};
use crate::domain::value_objects::{CouponCode, Sku};
use crate::inventory::{StockMovement, StockTarget};
use crate::pricing::{AddonCharge, CustomerHistory, OrderTotals};
use crate::shipping::ShippingMethod;
use crate::{CouponRejection, MarketplaceError, Result};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
    pub fn pool(&self) -> &PgPool { &self.pool }
}

fn corrupt(column: &str, value: &str) -> MarketplaceError {
    MarketplaceError::Storage(format!("unexpected {column} value {value:?}"))
}

// =============================================================================
// Rows
// =============================================================================

#[derive(sqlx::FromRow)]
struct StoreRow { id: Uuid, slug: String, name: String }

#[derive(sqlx::FromRow)]
struct ProductRow {
    id: Uuid, store_id: Uuid, slug: String, name: String, sku: Option<String>, category_id: Option<Uuid>,
    base_price: Decimal, compare_at_price: Option<Decimal>, track_inventory: bool, quantity: i32,
    status: String, variant_mode: String, created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

impl TryFrom<ProductRow> for Product {
    type Error = MarketplaceError;
    fn try_from(r: ProductRow) -> Result<Self> {
        Ok(Product {
            id: r.id,
            store_id: r.store_id,
            slug: r.slug,
            name: r.name,
            sku: r.sku.map(Sku::new).transpose()?,
            category_id: r.category_id,
            base_price: r.base_price,
            compare_at_price: r.compare_at_price,
            track_inventory: r.track_inventory,
            quantity: r.quantity,
            status: ProductStatus::parse(&r.status).ok_or_else(|| corrupt("products.status", &r.status))?,
            variant_mode: VariantMode::parse(&r.variant_mode).ok_or_else(|| corrupt("products.variant_mode", &r.variant_mode))?,
            created_at: r.created_at,
            updated_at: r.updated_at,
            events: vec![],
        })
    }
}

#[derive(sqlx::FromRow)]
struct OptionRow {
    id: Uuid, product_id: Uuid, axis: String, value: String, display_name: String,
    color_hex: Option<String>, sort_order: i32, active: bool,
}

impl TryFrom<OptionRow> for VariantOption {
    type Error = MarketplaceError;
    fn try_from(r: OptionRow) -> Result<Self> {
        Ok(VariantOption {
            id: r.id,
            product_id: r.product_id,
            axis: AxisType::parse(&r.axis).ok_or_else(|| corrupt("variant_options.axis", &r.axis))?,
            value: r.value,
            display_name: r.display_name,
            color_hex: r.color_hex,
            sort_order: r.sort_order,
            active: r.active,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CombinationRow {
    id: Uuid, product_id: Uuid, combination_key: String, selection: Json<Selection>, sku: Option<String>,
    price: Option<Decimal>, compare_at_price: Option<Decimal>, quantity: i32, available: bool,
    retired: bool, image_url: Option<String>, sort_order: i32,
}

impl From<CombinationRow> for VariantCombination {
    fn from(r: CombinationRow) -> Self {
        VariantCombination {
            id: r.id,
            product_id: r.product_id,
            key: CombinationKey::from_raw(r.combination_key),
            selection: r.selection.0,
            sku: r.sku,
            price: r.price,
            compare_at_price: r.compare_at_price,
            quantity: r.quantity,
            available: r.available,
            retired: r.retired,
            image_url: r.image_url,
            sort_order: r.sort_order,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AddonRow {
    id: Uuid, product_id: Uuid, name: String, description: Option<String>, field: Json<AddonField>,
    pricing: Json<AddonPricing>, required: bool, allow_multiple: bool, max_quantity: Option<i32>, sort_order: i32,
}

impl From<AddonRow> for ProductAddon {
    fn from(r: AddonRow) -> Self {
        ProductAddon {
            id: r.id,
            product_id: r.product_id,
            name: r.name,
            description: r.description,
            field: r.field.0,
            pricing: r.pricing.0,
            required: r.required,
            allow_multiple: r.allow_multiple,
            max_quantity: r.max_quantity.map(|q| q.max(0) as u32),
            sort_order: r.sort_order,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CouponRow {
    id: Uuid, store_id: Uuid, code: String, discount_type: String, value: Decimal,
    min_purchase: Option<Decimal>, max_discount: Option<Decimal>, usage_limit: Option<i32>, times_used: i32,
    per_customer_limit: Option<i32>, starts_at: Option<DateTime<Utc>>, ends_at: Option<DateTime<Utc>>, active: bool,
    applicable_products: Vec<Uuid>, applicable_categories: Vec<Uuid>, excluded_products: Vec<Uuid>, first_time_only: bool,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = MarketplaceError;
    fn try_from(r: CouponRow) -> Result<Self> {
        Ok(Coupon {
            id: r.id,
            store_id: r.store_id,
            code: CouponCode::parse(&r.code)?,
            discount_type: DiscountType::parse(&r.discount_type).ok_or_else(|| corrupt("coupons.discount_type", &r.discount_type))?,
            value: r.value,
            min_purchase: r.min_purchase,
            max_discount: r.max_discount,
            usage_limit: r.usage_limit.map(|l| l.max(0) as u32),
            times_used: r.times_used.max(0) as u32,
            per_customer_limit: r.per_customer_limit.map(|l| l.max(0) as u32),
            starts_at: r.starts_at,
            ends_at: r.ends_at,
            active: r.active,
            applicable_products: r.applicable_products,
            applicable_categories: r.applicable_categories,
            excluded_products: r.excluded_products,
            first_time_only: r.first_time_only,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CartRow {
    id: String, store: Option<Json<StoreSummary>>, items: Json<Vec<CartItem>>, coupon_code: Option<String>,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>, expires_at: DateTime<Utc>,
}

impl TryFrom<CartRow> for CartSession {
    type Error = MarketplaceError;
    fn try_from(r: CartRow) -> Result<Self> {
        Ok(CartSession {
            id: r.id,
            store: r.store.map(|s| s.0),
            items: r.items.0,
            coupon_code: r.coupon_code.as_deref().map(CouponCode::parse).transpose()?,
            created_at: r.created_at,
            updated_at: r.updated_at,
            expires_at: r.expires_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid, order_number: String, store_id: Uuid, customer_email: String, customer_name: Option<String>,
    customer_id: Option<Uuid>, status: String, payment_status: String, payment_method: String,
    payment_reference: Option<String>, shipping_method: Json<ShippingMethod>, shipping_address: Option<Json<Address>>,
    currency: String, subtotal: Decimal, shipping: Decimal, discount: Decimal, shipping_discount: Decimal,
    taxable_base: Decimal, tax_rate: Decimal, tax: Decimal, total: Decimal, coupon_id: Option<Uuid>,
    coupon_code: Option<String>, coupon_discount_type: Option<String>, cart_session: Option<String>,
    created_at: DateTime<Utc>, updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid, product_id: Uuid, product_name: String, combination_id: Option<Uuid>, combination_key: Option<String>,
    sku: Option<String>, selection: Json<Selection>, addons: Json<Vec<AddonCharge>>, unit_price: Decimal,
    quantity: i32, line_total: Decimal, stock_kind: Option<String>, stock_id: Option<Uuid>,
}

impl From<OrderItemRow> for OrderItem {
    fn from(r: OrderItemRow) -> Self {
        let stock_target = match (r.stock_kind.as_deref(), r.stock_id) {
            (Some(kind), Some(id)) => StockTarget::from_parts(kind, id),
            _ => None,
        };
        OrderItem {
            id: r.id,
            product_id: r.product_id,
            product_name: r.product_name,
            combination_id: r.combination_id,
            combination_key: r.combination_key.map(CombinationKey::from_raw),
            sku: r.sku,
            selection: r.selection.0,
            addons: r.addons.0,
            unit_price: r.unit_price,
            quantity: r.quantity.max(0) as u32,
            line_total: r.line_total,
            stock_target,
        }
    }
}

fn assemble_order(r: OrderRow, items: Vec<OrderItemRow>) -> Result<Order> {
    let coupon = match (r.coupon_id, r.coupon_code, r.coupon_discount_type) {
        (Some(coupon_id), Some(code), Some(kind)) => Some(AppliedCoupon {
            coupon_id,
            code: CouponCode::parse(&code)?,
            discount_type: DiscountType::parse(&kind).ok_or_else(|| corrupt("orders.coupon_discount_type", &kind))?,
        }),
        _ => None,
    };
    Ok(Order {
        id: r.id,
        order_number: r.order_number,
        store_id: r.store_id,
        customer: Customer { email: r.customer_email, name: r.customer_name, customer_id: r.customer_id },
        status: OrderStatus::parse(&r.status).ok_or_else(|| corrupt("orders.status", &r.status))?,
        payment_status: PaymentStatus::parse(&r.payment_status).ok_or_else(|| corrupt("orders.payment_status", &r.payment_status))?,
        payment_method: PaymentMethod::parse(&r.payment_method).ok_or_else(|| corrupt("orders.payment_method", &r.payment_method))?,
        payment_reference: r.payment_reference,
        shipping_method: r.shipping_method.0,
        shipping_address: r.shipping_address.map(|a| a.0),
        items: items.into_iter().map(OrderItem::from).collect(),
        totals: OrderTotals {
            currency: r.currency,
            subtotal: r.subtotal,
            shipping: r.shipping,
            discount: r.discount,
            shipping_discount: r.shipping_discount,
            taxable_base: r.taxable_base,
            tax_rate: r.tax_rate,
            tax: r.tax,
            total: r.total,
        },
        coupon,
        cart_session: r.cart_session,
        created_at: r.created_at,
        updated_at: r.updated_at,
        events: vec![],
    })
}

// =============================================================================
// Statements shared by transactional paths
// =============================================================================

async fn reserve_in(conn: &mut PgConnection, target: StockTarget, quantity: u32) -> Result<i32> {
    let sql = match target {
        StockTarget::Product(_) => "UPDATE products SET quantity = quantity - $2, updated_at = NOW() WHERE id = $1 AND quantity >= $2 RETURNING quantity",
        StockTarget::Combination(_) => "UPDATE variant_combinations SET quantity = quantity - $2 WHERE id = $1 AND quantity >= $2 RETURNING quantity",
    };
    let row: Option<(i32,)> = sqlx::query_as(sql).bind(target.id()).bind(i64::from(quantity)).fetch_optional(&mut *conn).await?;
    match row {
        Some((remaining,)) => Ok(remaining),
        None => {
            ensure_target_exists(conn, target).await?;
            Err(MarketplaceError::InsufficientStock { target: target.to_string(), requested: quantity })
        }
    }
}

async fn release_in(conn: &mut PgConnection, target: StockTarget, quantity: u32) -> Result<i32> {
    let sql = match target {
        StockTarget::Product(_) => "UPDATE products SET quantity = quantity + $2, updated_at = NOW() WHERE id = $1 RETURNING quantity",
        StockTarget::Combination(_) => "UPDATE variant_combinations SET quantity = quantity + $2 WHERE id = $1 RETURNING quantity",
    };
    let row: Option<(i32,)> = sqlx::query_as(sql).bind(target.id()).bind(i64::from(quantity)).fetch_optional(&mut *conn).await?;
    row.map(|(q,)| q).ok_or_else(|| MarketplaceError::not_found(target.kind(), target.id()))
}

async fn ensure_target_exists(conn: &mut PgConnection, target: StockTarget) -> Result<()> {
    let sql = match target {
        StockTarget::Product(_) => "SELECT EXISTS(SELECT 1 FROM products WHERE id = $1)",
        StockTarget::Combination(_) => "SELECT EXISTS(SELECT 1 FROM variant_combinations WHERE id = $1)",
    };
    let (exists,): (bool,) = sqlx::query_as(sql).bind(target.id()).fetch_one(&mut *conn).await?;
    if exists { Ok(()) } else { Err(MarketplaceError::not_found(target.kind(), target.id())) }
}

/// Bounded counter plus per-customer count. The row lock serializes redemptions of one coupon.
async fn redeem_in(conn: &mut PgConnection, order: &Order) -> Result<()> {
    let Some(applied) = &order.coupon else { return Ok(()) };
    let customer_key = order.customer.key();
    let limit: Option<(Option<i32>,)> = sqlx::query_as("SELECT per_customer_limit FROM coupons WHERE id = $1 FOR UPDATE")
        .bind(applied.coupon_id).fetch_optional(&mut *conn).await?;
    let Some((per_customer_limit,)) = limit else {
        return Err(MarketplaceError::CouponIneligible(CouponRejection::InvalidCode));
    };
    if let Some(limit) = per_customer_limit {
        let (used,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM coupon_redemptions WHERE coupon_id = $1 AND customer_key = $2")
            .bind(applied.coupon_id).bind(&customer_key).fetch_one(&mut *conn).await?;
        if used >= limit as i64 {
            return Err(MarketplaceError::CouponIneligible(CouponRejection::CustomerLimitReached));
        }
    }
    let updated = sqlx::query("UPDATE coupons SET times_used = times_used + 1 WHERE id = $1 AND (usage_limit IS NULL OR times_used < usage_limit)")
        .bind(applied.coupon_id).execute(&mut *conn).await?.rows_affected();
    if updated == 0 {
        return Err(MarketplaceError::CouponIneligible(CouponRejection::UsageLimitReached));
    }
    sqlx::query("INSERT INTO coupon_redemptions (id, coupon_id, order_id, customer_key) VALUES ($1, $2, $3, $4)")
        .bind(Uuid::now_v7()).bind(applied.coupon_id).bind(order.id).bind(&customer_key)
        .execute(&mut *conn).await?;
    Ok(())
}

async fn take_stock_in(conn: &mut PgConnection, order: &Order) -> Result<()> {
    for m in order.stock_movements() {
        reserve_in(conn, m.target, m.quantity).await?;
    }
    Ok(())
}

async fn insert_order_in(conn: &mut PgConnection, order: &Order) -> Result<()> {
    let t = &order.totals;
    sqlx::query(
        "INSERT INTO orders (id, order_number, store_id, customer_email, customer_key, customer_name, customer_id, status, payment_status, \
         payment_method, payment_reference, shipping_method, shipping_address, currency, subtotal, shipping, discount, shipping_discount, \
         taxable_base, tax_rate, tax, total, coupon_id, coupon_code, coupon_discount_type, cart_session, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28)",
    )
    .bind(order.id).bind(&order.order_number).bind(order.store_id).bind(&order.customer.email).bind(order.customer.key())
    .bind(&order.customer.name).bind(order.customer.customer_id).bind(order.status.as_str()).bind(order.payment_status.as_str())
    .bind(order.payment_method.as_str()).bind(&order.payment_reference).bind(Json(&order.shipping_method))
    .bind(order.shipping_address.as_ref().map(Json)).bind(&t.currency).bind(t.subtotal).bind(t.shipping).bind(t.discount)
    .bind(t.shipping_discount).bind(t.taxable_base).bind(t.tax_rate).bind(t.tax).bind(t.total)
    .bind(order.coupon.as_ref().map(|c| c.coupon_id)).bind(order.coupon.as_ref().map(|c| c.code.as_str().to_string()))
    .bind(order.coupon.as_ref().map(|c| c.discount_type.as_str())).bind(&order.cart_session)
    .bind(order.created_at).bind(order.updated_at)
    .execute(&mut *conn).await?;

    for (position, item) in order.items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO order_items (id, order_id, product_id, product_name, combination_id, combination_key, sku, selection, addons, \
             unit_price, quantity, line_total, stock_kind, stock_id, position) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(item.id).bind(order.id).bind(item.product_id).bind(&item.product_name).bind(item.combination_id)
        .bind(item.combination_key.as_ref().map(|k| k.as_str().to_string())).bind(&item.sku).bind(Json(&item.selection))
        .bind(Json(&item.addons)).bind(item.unit_price).bind(item.quantity as i32).bind(item.line_total)
        .bind(item.stock_target.map(|t| t.kind())).bind(item.stock_target.map(|t| t.id())).bind(position as i32)
        .execute(&mut *conn).await?;
    }
    Ok(())
}

async fn delete_cart_in(conn: &mut PgConnection, order: &Order) -> Result<()> {
    if let Some(session) = &order.cart_session {
        sqlx::query("DELETE FROM cart_sessions WHERE id = $1").bind(session).execute(&mut *conn).await?;
    }
    Ok(())
}

/// Record a webhook event id. `false` when it was already recorded.
async fn record_event_in(conn: &mut PgConnection, event_id: &str, order_id: Uuid) -> Result<bool> {
    let inserted = sqlx::query("INSERT INTO payment_events (event_id, order_id) VALUES ($1, $2) ON CONFLICT (event_id) DO NOTHING")
        .bind(event_id).bind(order_id).execute(&mut *conn).await?.rows_affected();
    Ok(inserted == 1)
}

/// Move a PENDING_PAYMENT order to its new state. `false` if it had already moved.
async fn transition_pending_in(conn: &mut PgConnection, order: &Order) -> Result<bool> {
    let updated = sqlx::query(
        "UPDATE orders SET status = $2, payment_status = $3, updated_at = $4 WHERE id = $1 AND status = 'PENDING_PAYMENT'",
    )
    .bind(order.id).bind(order.status.as_str()).bind(order.payment_status.as_str()).bind(order.updated_at)
    .execute(&mut *conn).await?.rows_affected();
    Ok(updated == 1)
}

// =============================================================================
// MarketplaceStore
// =============================================================================

#[async_trait]
impl MarketplaceStore for PgStore {
    async fn insert_store(&self, store: &StoreSummary) -> Result<()> {
        sqlx::query("INSERT INTO stores (id, slug, name) VALUES ($1, $2, $3)")
            .bind(store.id).bind(&store.slug).bind(&store.name)
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn store_summary(&self, id: Uuid) -> Result<StoreSummary> {
        let row = sqlx::query_as::<_, StoreRow>("SELECT id, slug, name FROM stores WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?
            .ok_or_else(|| MarketplaceError::not_found("store", id))?;
        Ok(StoreSummary { id: row.id, slug: row.slug, name: row.name })
    }

    async fn insert_product(&self, p: &Product) -> Result<()> {
        sqlx::query(
            "INSERT INTO products (id, store_id, slug, name, sku, category_id, base_price, compare_at_price, track_inventory, quantity, status, variant_mode, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(p.id).bind(p.store_id).bind(&p.slug).bind(&p.name).bind(p.sku.as_ref().map(|s| s.as_str().to_string()))
        .bind(p.category_id).bind(p.base_price).bind(p.compare_at_price).bind(p.track_inventory).bind(p.quantity)
        .bind(p.status.as_str()).bind(p.variant_mode.as_str()).bind(p.created_at).bind(p.updated_at)
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn update_product(&self, p: &Product) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE products SET slug = $2, name = $3, sku = $4, category_id = $5, base_price = $6, compare_at_price = $7, \
             track_inventory = $8, status = $9, variant_mode = $10, updated_at = $11 WHERE id = $1",
        )
        .bind(p.id).bind(&p.slug).bind(&p.name).bind(p.sku.as_ref().map(|s| s.as_str().to_string())).bind(p.category_id)
        .bind(p.base_price).bind(p.compare_at_price).bind(p.track_inventory).bind(p.status.as_str())
        .bind(p.variant_mode.as_str()).bind(p.updated_at)
        .execute(&self.pool).await?.rows_affected();
        if updated == 0 { return Err(MarketplaceError::not_found("product", p.id)); }
        Ok(())
    }

    async fn product(&self, id: Uuid) -> Result<Product> {
        sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?
            .ok_or_else(|| MarketplaceError::not_found("product", id))?
            .try_into()
    }

    async fn variant_matrix(&self, product_id: Uuid) -> Result<VariantMatrix> {
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM products WHERE id = $1)")
            .bind(product_id).fetch_one(&self.pool).await?;
        if !exists { return Err(MarketplaceError::not_found("product", product_id)); }

        let options = sqlx::query_as::<_, OptionRow>("SELECT * FROM variant_options WHERE product_id = $1 ORDER BY axis, sort_order")
            .bind(product_id).fetch_all(&self.pool).await?
            .into_iter().map(VariantOption::try_from).collect::<Result<Vec<_>>>()?;
        let combinations = sqlx::query_as::<_, CombinationRow>("SELECT * FROM variant_combinations WHERE product_id = $1 ORDER BY retired, sort_order")
            .bind(product_id).fetch_all(&self.pool).await?
            .into_iter().map(VariantCombination::from).collect();
        Ok(VariantMatrix { product_id, options, combinations })
    }

    async fn save_variant_matrix(&self, matrix: &VariantMatrix) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let ids: Vec<Uuid> = matrix.options.iter().map(|o| o.id).collect();
        sqlx::query("DELETE FROM variant_options WHERE product_id = $1 AND NOT (id = ANY($2))")
            .bind(matrix.product_id).bind(&ids).execute(&mut *tx).await?;
        for o in &matrix.options {
            sqlx::query(
                "INSERT INTO variant_options (id, product_id, axis, value, display_name, color_hex, sort_order, active) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT (id) DO UPDATE SET value = $4, display_name = $5, color_hex = $6, sort_order = $7, active = $8",
            )
            .bind(o.id).bind(o.product_id).bind(o.axis.as_str()).bind(&o.value).bind(&o.display_name)
            .bind(&o.color_hex).bind(o.sort_order).bind(o.active)
            .execute(&mut *tx).await?;
        }
        for c in &matrix.combinations {
            // Quantity is owned by the reservation statements once a row exists.
            sqlx::query(
                "INSERT INTO variant_combinations (id, product_id, combination_key, selection, sku, price, compare_at_price, quantity, available, image_url, sort_order, retired) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
                 ON CONFLICT (id) DO UPDATE SET sort_order = $11, retired = $12",
            )
            .bind(c.id).bind(c.product_id).bind(c.key.as_str()).bind(Json(&c.selection)).bind(&c.sku).bind(c.price)
            .bind(c.compare_at_price).bind(c.quantity).bind(c.available).bind(&c.image_url).bind(c.sort_order).bind(c.retired)
            .execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn combination(&self, id: Uuid) -> Result<VariantCombination> {
        Ok(sqlx::query_as::<_, CombinationRow>("SELECT * FROM variant_combinations WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?
            .ok_or_else(|| MarketplaceError::not_found("variant combination", id))?
            .into())
    }

    async fn update_combination(&self, c: &VariantCombination) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE variant_combinations SET sku = $2, price = $3, compare_at_price = $4, quantity = $5, available = $6, image_url = $7 WHERE id = $1",
        )
        .bind(c.id).bind(&c.sku).bind(c.price).bind(c.compare_at_price).bind(c.quantity).bind(c.available).bind(&c.image_url)
        .execute(&self.pool).await?.rows_affected();
        if updated == 0 { return Err(MarketplaceError::not_found("variant combination", c.id)); }
        Ok(())
    }

    async fn addons(&self, product_id: Uuid) -> Result<Vec<ProductAddon>> {
        Ok(sqlx::query_as::<_, AddonRow>("SELECT * FROM product_addons WHERE product_id = $1 ORDER BY sort_order, name")
            .bind(product_id).fetch_all(&self.pool).await?
            .into_iter().map(ProductAddon::from).collect())
    }

    async fn insert_addon(&self, a: &ProductAddon) -> Result<()> {
        sqlx::query(
            "INSERT INTO product_addons (id, product_id, name, description, field, pricing, required, allow_multiple, max_quantity, sort_order) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(a.id).bind(a.product_id).bind(&a.name).bind(&a.description).bind(Json(&a.field)).bind(Json(&a.pricing))
        .bind(a.required).bind(a.allow_multiple).bind(a.max_quantity.map(|q| q as i32)).bind(a.sort_order)
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_coupon(&self, c: &Coupon) -> Result<()> {
        sqlx::query(
            "INSERT INTO coupons (id, store_id, code, discount_type, value, min_purchase, max_discount, usage_limit, times_used, per_customer_limit, \
             starts_at, ends_at, active, applicable_products, applicable_categories, excluded_products, first_time_only) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(c.id).bind(c.store_id).bind(c.code.as_str()).bind(c.discount_type.as_str()).bind(c.value).bind(c.min_purchase)
        .bind(c.max_discount).bind(c.usage_limit.map(|l| l as i32)).bind(c.times_used as i32).bind(c.per_customer_limit.map(|l| l as i32))
        .bind(c.starts_at).bind(c.ends_at).bind(c.active).bind(&c.applicable_products).bind(&c.applicable_categories)
        .bind(&c.excluded_products).bind(c.first_time_only)
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn coupon_by_code(&self, store_id: Uuid, code: &CouponCode) -> Result<Option<Coupon>> {
        sqlx::query_as::<_, CouponRow>("SELECT * FROM coupons WHERE store_id = $1 AND code = $2")
            .bind(store_id).bind(code.as_str()).fetch_optional(&self.pool).await?
            .map(Coupon::try_from)
            .transpose()
    }

    async fn customer_history(&self, store_id: Uuid, coupon_id: Uuid, customer_key: &str) -> Result<CustomerHistory> {
        let (redemptions,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM coupon_redemptions WHERE coupon_id = $1 AND customer_key = $2")
            .bind(coupon_id).bind(customer_key).fetch_one(&self.pool).await?;
        let (prior_orders,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM orders WHERE store_id = $1 AND customer_key = $2 AND status IN ('CONFIRMED', 'PROCESSING', 'SHIPPED', 'DELIVERED')",
        )
        .bind(store_id).bind(customer_key).fetch_one(&self.pool).await?;
        Ok(CustomerHistory { redemptions: redemptions as u32, prior_orders: prior_orders as u32 })
    }

    async fn cart(&self, session_id: &str) -> Result<Option<CartSession>> {
        sqlx::query_as::<_, CartRow>("SELECT * FROM cart_sessions WHERE id = $1")
            .bind(session_id).fetch_optional(&self.pool).await?
            .map(CartSession::try_from)
            .transpose()
    }

    async fn save_cart(&self, cart: &CartSession) -> Result<()> {
        sqlx::query(
            "INSERT INTO cart_sessions (id, store, items, coupon_code, created_at, updated_at, expires_at) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (id) DO UPDATE SET store = $2, items = $3, coupon_code = $4, updated_at = $6, expires_at = $7",
        )
        .bind(&cart.id).bind(cart.store.as_ref().map(Json)).bind(Json(&cart.items))
        .bind(cart.coupon_code.as_ref().map(|c| c.as_str().to_string()))
        .bind(cart.created_at).bind(cart.updated_at).bind(cart.expires_at)
        .execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_cart(&self, session_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM cart_sessions WHERE id = $1").bind(session_id).execute(&self.pool).await?;
        Ok(())
    }

    async fn reserve_stock(&self, target: StockTarget, quantity: u32) -> Result<i32> {
        let mut conn = self.pool.acquire().await?;
        reserve_in(&mut conn, target, quantity).await
    }

    async fn release_stock(&self, target: StockTarget, quantity: u32) -> Result<i32> {
        let mut conn = self.pool.acquire().await?;
        release_in(&mut conn, target, quantity).await
    }

    async fn place_confirmed_order(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_order_in(&mut tx, order).await?;
        take_stock_in(&mut tx, order).await?;
        redeem_in(&mut tx, order).await?;
        delete_cart_in(&mut tx, order).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_pending_order(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        insert_order_in(&mut tx, order).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn order(&self, id: Uuid) -> Result<Order> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?
            .ok_or_else(|| MarketplaceError::not_found("order", id))?;
        let items = sqlx::query_as::<_, OrderItemRow>("SELECT * FROM order_items WHERE order_id = $1 ORDER BY position")
            .bind(id).fetch_all(&self.pool).await?;
        assemble_order(row, items)
    }

    async fn order_by_payment_reference(&self, reference: &str) -> Result<Order> {
        let (id,): (Uuid,) = sqlx::query_as("SELECT id FROM orders WHERE payment_reference = $1")
            .bind(reference).fetch_optional(&self.pool).await?
            .ok_or_else(|| MarketplaceError::not_found("order", reference))?;
        self.order(id).await
    }

    async fn settle_payment(&self, order: &Order, event_id: Option<&str>) -> Result<SettleOutcome> {
        let mut tx = self.pool.begin().await?;
        if let Some(id) = event_id {
            if !record_event_in(&mut tx, id, order.id).await? {
                return Ok(SettleOutcome::DuplicateEvent);
            }
        }
        if !transition_pending_in(&mut tx, order).await? {
            tx.commit().await?;
            return Ok(SettleOutcome::AlreadySettled);
        }
        take_stock_in(&mut tx, order).await?;
        redeem_in(&mut tx, order).await?;
        delete_cart_in(&mut tx, order).await?;
        tx.commit().await?;
        Ok(SettleOutcome::Applied)
    }

    async fn record_payment_failure(&self, order: &Order, event_id: Option<&str>) -> Result<SettleOutcome> {
        let mut tx = self.pool.begin().await?;
        if let Some(id) = event_id {
            if !record_event_in(&mut tx, id, order.id).await? {
                return Ok(SettleOutcome::DuplicateEvent);
            }
        }
        let outcome = if transition_pending_in(&mut tx, order).await? { SettleOutcome::Applied } else { SettleOutcome::AlreadySettled };
        tx.commit().await?;
        Ok(outcome)
    }

    async fn cancel_order(&self, order: &Order, previous: OrderStatus, release: &[StockMovement]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            "UPDATE orders SET status = $2, payment_status = $3, updated_at = $4 WHERE id = $1 AND status = $5",
        )
        .bind(order.id).bind(order.status.as_str()).bind(order.payment_status.as_str()).bind(order.updated_at)
        .bind(previous.as_str())
        .execute(&mut *tx).await?.rows_affected();
        if updated == 0 {
            return Err(MarketplaceError::invalid_field("status", "Order status changed while cancelling; reload and retry"));
        }
        for m in release {
            release_in(&mut tx, m.target, m.quantity).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
