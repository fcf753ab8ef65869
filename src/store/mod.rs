//! Persistence seam.
//!
//! Every atomicity guarantee the checkout relies on lives behind this trait:
//! conditional stock decrements, the bounded coupon counter, and multi-row
//! order writes that commit together or not at all.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::aggregates::{
    CartSession, Coupon, Order, OrderStatus, Product, ProductAddon, StoreSummary, VariantCombination, VariantMatrix,
};
use crate::domain::value_objects::CouponCode;
use crate::inventory::{StockMovement, StockTarget};
use crate::pricing::CustomerHistory;
use crate::Result;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

/// Result of applying a payment verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettleOutcome {
    /// State changed (and stock was taken, for a successful payment).
    Applied,
    /// This event id was seen before; nothing changed.
    DuplicateEvent,
    /// The order had already left PENDING_PAYMENT; nothing changed.
    AlreadySettled,
}

#[async_trait]
pub trait MarketplaceStore: Send + Sync {
    // Tenants
    async fn insert_store(&self, store: &StoreSummary) -> Result<()>;
    async fn store_summary(&self, id: Uuid) -> Result<StoreSummary>;

    // Catalog
    async fn insert_product(&self, product: &Product) -> Result<()>;
    async fn update_product(&self, product: &Product) -> Result<()>;
    async fn product(&self, id: Uuid) -> Result<Product>;
    async fn variant_matrix(&self, product_id: Uuid) -> Result<VariantMatrix>;
    /// Upsert options and combinations. Combinations are never deleted.
    async fn save_variant_matrix(&self, matrix: &VariantMatrix) -> Result<()>;
    async fn combination(&self, id: Uuid) -> Result<VariantCombination>;
    async fn update_combination(&self, combination: &VariantCombination) -> Result<()>;
    async fn addons(&self, product_id: Uuid) -> Result<Vec<ProductAddon>>;
    async fn insert_addon(&self, addon: &ProductAddon) -> Result<()>;

    // Coupons
    async fn insert_coupon(&self, coupon: &Coupon) -> Result<()>;
    async fn coupon_by_code(&self, store_id: Uuid, code: &CouponCode) -> Result<Option<Coupon>>;
    async fn customer_history(&self, store_id: Uuid, coupon_id: Uuid, customer_key: &str) -> Result<CustomerHistory>;

    // Carts
    async fn cart(&self, session_id: &str) -> Result<Option<CartSession>>;
    async fn save_cart(&self, cart: &CartSession) -> Result<()>;
    async fn delete_cart(&self, session_id: &str) -> Result<()>;

    // Inventory
    /// Take units only if enough remain. Returns the quantity left.
    async fn reserve_stock(&self, target: StockTarget, quantity: u32) -> Result<i32>;
    /// Unconditional increment. Returns the quantity on hand.
    async fn release_stock(&self, target: StockTarget, quantity: u32) -> Result<i32>;

    // Orders
    /// Persist a confirmed order in one transaction: rows, stock, coupon redemption, cart removal.
    async fn place_confirmed_order(&self, order: &Order) -> Result<()>;
    /// Persist an order awaiting card payment, intent reference included. No stock changes.
    async fn insert_pending_order(&self, order: &Order) -> Result<()>;
    async fn order(&self, id: Uuid) -> Result<Order>;
    async fn order_by_payment_reference(&self, reference: &str) -> Result<Order>;
    /// Confirm a paid order (already transitioned in memory) exactly once.
    async fn settle_payment(&self, order: &Order, event_id: Option<&str>) -> Result<SettleOutcome>;
    /// Record a declined payment exactly once.
    async fn record_payment_failure(&self, order: &Order, event_id: Option<&str>) -> Result<SettleOutcome>;
    /// Persist a cancellation and give back `release`, only if the stored order is still in
    /// `previous`. Any concurrent transition makes this fail with nothing written.
    async fn cancel_order(&self, order: &Order, previous: OrderStatus, release: &[StockMovement]) -> Result<()>;
}
