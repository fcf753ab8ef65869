//! In-memory store for development and tests.
//!
//! A single lock guards all state, so every check-and-set below is atomic.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{MarketplaceStore, SettleOutcome};
use crate::domain::aggregates::{
    CartSession, Coupon, Order, OrderStatus, Product, ProductAddon, StoreSummary, VariantCombination, VariantMatrix,
};
use crate::domain::value_objects::CouponCode;
use crate::inventory::{StockMovement, StockTarget};
use crate::pricing::CustomerHistory;
use crate::{CouponRejection, MarketplaceError, Result};

struct Redemption {
    coupon_id: Uuid,
    customer_key: String,
}

#[derive(Default)]
struct State {
    stores: HashMap<Uuid, StoreSummary>,
    products: HashMap<Uuid, Product>,
    matrices: HashMap<Uuid, VariantMatrix>,
    addons: HashMap<Uuid, Vec<ProductAddon>>,
    coupons: HashMap<Uuid, Coupon>,
    redemptions: Vec<Redemption>,
    carts: HashMap<String, CartSession>,
    orders: HashMap<Uuid, Order>,
    payment_events: HashSet<String>,
}

impl State {
    fn quantity_mut(&mut self, target: StockTarget) -> Result<&mut i32> {
        match target {
            StockTarget::Product(id) => self.products.get_mut(&id)
                .map(|p| &mut p.quantity)
                .ok_or_else(|| MarketplaceError::not_found("product", id)),
            StockTarget::Combination(id) => self.matrices.values_mut()
                .flat_map(|m| m.combinations.iter_mut())
                .find(|c| c.id == id)
                .map(|c| &mut c.quantity)
                .ok_or_else(|| MarketplaceError::not_found("variant combination", id)),
        }
    }

    fn check_stock(&mut self, movements: &[StockMovement]) -> Result<()> {
        for m in movements {
            let on_hand = *self.quantity_mut(m.target)?;
            if i64::from(on_hand) < i64::from(m.quantity) {
                return Err(MarketplaceError::InsufficientStock { target: m.target.to_string(), requested: m.quantity });
            }
        }
        Ok(())
    }

    fn check_redemption(&self, order: &Order) -> Result<()> {
        let Some(applied) = &order.coupon else { return Ok(()) };
        let coupon = self.coupons.get(&applied.coupon_id)
            .ok_or(MarketplaceError::CouponIneligible(CouponRejection::InvalidCode))?;
        if coupon.usage_limit.is_some_and(|limit| coupon.times_used >= limit) {
            return Err(MarketplaceError::CouponIneligible(CouponRejection::UsageLimitReached));
        }
        if let Some(limit) = coupon.per_customer_limit {
            let key = order.customer.key();
            let used = self.redemptions.iter().filter(|r| r.coupon_id == coupon.id && r.customer_key == key).count();
            if used as u32 >= limit {
                return Err(MarketplaceError::CouponIneligible(CouponRejection::CustomerLimitReached));
            }
        }
        Ok(())
    }

    /// Take stock and redeem the coupon for an order. Callers check first.
    fn apply_confirmation(&mut self, order: &Order) -> Result<()> {
        for m in order.stock_movements() {
            take_units(self.quantity_mut(m.target)?, m.target, m.quantity)?;
        }
        if let Some(applied) = &order.coupon {
            if let Some(coupon) = self.coupons.get_mut(&applied.coupon_id) {
                coupon.times_used += 1;
            }
            self.redemptions.push(Redemption { coupon_id: applied.coupon_id, customer_key: order.customer.key() });
        }
        if let Some(session) = &order.cart_session {
            self.carts.remove(session);
        }
        Ok(())
    }

    fn existing_order(&self, id: Uuid) -> Result<&Order> {
        self.orders.get(&id).ok_or_else(|| MarketplaceError::not_found("order", id))
    }
}

fn take_units(on_hand: &mut i32, target: StockTarget, quantity: u32) -> Result<i32> {
    let remaining = i64::from(*on_hand) - i64::from(quantity);
    *on_hand = i32::try_from(remaining)
        .ok()
        .filter(|r| *r >= 0)
        .ok_or_else(|| MarketplaceError::InsufficientStock { target: target.to_string(), requested: quantity })?;
    Ok(*on_hand)
}

fn give_units(on_hand: &mut i32, target: StockTarget, quantity: u32) -> Result<i32> {
    *on_hand = i32::try_from(i64::from(*on_hand) + i64::from(quantity))
        .map_err(|_| MarketplaceError::invalid_field("quantity", format!("Stock for {target} would overflow")))?;
    Ok(*on_hand)
}

fn status_changed() -> MarketplaceError {
    MarketplaceError::invalid_field("status", "Order status changed while cancelling; reload and retry")
}

fn snapshot(order: &Order) -> Order {
    let mut copy = order.clone();
    copy.events.clear();
    copy
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl MarketplaceStore for InMemoryStore {
    async fn insert_store(&self, store: &StoreSummary) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.stores.values().any(|s| s.slug == store.slug) {
            return Err(MarketplaceError::invalid_field("slug", format!("Store slug {} is taken", store.slug)));
        }
        state.stores.insert(store.id, store.clone());
        Ok(())
    }

    async fn store_summary(&self, id: Uuid) -> Result<StoreSummary> {
        self.state.lock().await.stores.get(&id).cloned().ok_or_else(|| MarketplaceError::not_found("store", id))
    }

    async fn insert_product(&self, product: &Product) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.stores.contains_key(&product.store_id) {
            return Err(MarketplaceError::not_found("store", product.store_id));
        }
        if state.products.values().any(|p| p.store_id == product.store_id && p.slug == product.slug) {
            return Err(MarketplaceError::invalid_field("slug", format!("Product slug {} is taken in this store", product.slug)));
        }
        let mut stored = product.clone();
        stored.events.clear();
        state.matrices.insert(product.id, VariantMatrix::new(product.id));
        state.products.insert(product.id, stored);
        Ok(())
    }

    async fn update_product(&self, product: &Product) -> Result<()> {
        let mut state = self.state.lock().await;
        let existing = state.products.get_mut(&product.id).ok_or_else(|| MarketplaceError::not_found("product", product.id))?;
        *existing = product.clone();
        existing.events.clear();
        Ok(())
    }

    async fn product(&self, id: Uuid) -> Result<Product> {
        self.state.lock().await.products.get(&id).cloned().ok_or_else(|| MarketplaceError::not_found("product", id))
    }

    async fn variant_matrix(&self, product_id: Uuid) -> Result<VariantMatrix> {
        self.state.lock().await.matrices.get(&product_id).cloned().ok_or_else(|| MarketplaceError::not_found("product", product_id))
    }

    async fn save_variant_matrix(&self, matrix: &VariantMatrix) -> Result<()> {
        let mut state = self.state.lock().await;
        let existing = state.matrices.get_mut(&matrix.product_id).ok_or_else(|| MarketplaceError::not_found("product", matrix.product_id))?;
        let dropped = existing.combinations.iter().any(|c| matrix.combination_by_id(c.id).is_none());
        if dropped {
            return Err(MarketplaceError::Storage("variant combinations cannot be deleted".into()));
        }
        *existing = matrix.clone();
        Ok(())
    }

    async fn combination(&self, id: Uuid) -> Result<VariantCombination> {
        self.state.lock().await.matrices.values()
            .find_map(|m| m.combination_by_id(id).cloned())
            .ok_or_else(|| MarketplaceError::not_found("variant combination", id))
    }

    async fn update_combination(&self, combination: &VariantCombination) -> Result<()> {
        let mut state = self.state.lock().await;
        let existing = state.matrices.get_mut(&combination.product_id)
            .and_then(|m| m.combinations.iter_mut().find(|c| c.id == combination.id))
            .ok_or_else(|| MarketplaceError::not_found("variant combination", combination.id))?;
        *existing = combination.clone();
        Ok(())
    }

    async fn addons(&self, product_id: Uuid) -> Result<Vec<ProductAddon>> {
        let mut addons = self.state.lock().await.addons.get(&product_id).cloned().unwrap_or_default();
        addons.sort_by_key(|a| a.sort_order);
        Ok(addons)
    }

    async fn insert_addon(&self, addon: &ProductAddon) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.products.contains_key(&addon.product_id) {
            return Err(MarketplaceError::not_found("product", addon.product_id));
        }
        state.addons.entry(addon.product_id).or_default().push(addon.clone());
        Ok(())
    }

    async fn insert_coupon(&self, coupon: &Coupon) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.coupons.values().any(|c| c.store_id == coupon.store_id && c.code == coupon.code) {
            return Err(MarketplaceError::invalid_field("code", format!("Coupon {} already exists in this store", coupon.code)));
        }
        state.coupons.insert(coupon.id, coupon.clone());
        Ok(())
    }

    async fn coupon_by_code(&self, store_id: Uuid, code: &CouponCode) -> Result<Option<Coupon>> {
        Ok(self.state.lock().await.coupons.values().find(|c| c.store_id == store_id && &c.code == code).cloned())
    }

    async fn customer_history(&self, store_id: Uuid, coupon_id: Uuid, customer_key: &str) -> Result<CustomerHistory> {
        let state = self.state.lock().await;
        let redemptions = state.redemptions.iter().filter(|r| r.coupon_id == coupon_id && r.customer_key == customer_key).count();
        let prior_orders = state.orders.values()
            .filter(|o| o.store_id == store_id && o.customer.key() == customer_key && o.status.holds_stock())
            .count();
        Ok(CustomerHistory { redemptions: redemptions as u32, prior_orders: prior_orders as u32 })
    }

    async fn cart(&self, session_id: &str) -> Result<Option<CartSession>> {
        Ok(self.state.lock().await.carts.get(session_id).cloned())
    }

    async fn save_cart(&self, cart: &CartSession) -> Result<()> {
        self.state.lock().await.carts.insert(cart.id.clone(), cart.clone());
        Ok(())
    }

    async fn delete_cart(&self, session_id: &str) -> Result<()> {
        self.state.lock().await.carts.remove(session_id);
        Ok(())
    }

    async fn reserve_stock(&self, target: StockTarget, quantity: u32) -> Result<i32> {
        let mut state = self.state.lock().await;
        take_units(state.quantity_mut(target)?, target, quantity)
    }

    async fn release_stock(&self, target: StockTarget, quantity: u32) -> Result<i32> {
        let mut state = self.state.lock().await;
        give_units(state.quantity_mut(target)?, target, quantity)
    }

    async fn place_confirmed_order(&self, order: &Order) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.orders.contains_key(&order.id) {
            return Err(MarketplaceError::Storage(format!("order {} already exists", order.id)));
        }
        state.check_stock(&order.stock_movements())?;
        state.check_redemption(order)?;
        state.apply_confirmation(order)?;
        state.orders.insert(order.id, snapshot(order));
        Ok(())
    }

    async fn insert_pending_order(&self, order: &Order) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.orders.contains_key(&order.id) {
            return Err(MarketplaceError::Storage(format!("order {} already exists", order.id)));
        }
        state.orders.insert(order.id, snapshot(order));
        Ok(())
    }

    async fn order(&self, id: Uuid) -> Result<Order> {
        self.state.lock().await.existing_order(id).cloned()
    }

    async fn order_by_payment_reference(&self, reference: &str) -> Result<Order> {
        self.state.lock().await.orders.values()
            .find(|o| o.payment_reference.as_deref() == Some(reference))
            .cloned()
            .ok_or_else(|| MarketplaceError::not_found("order", reference))
    }

    async fn settle_payment(&self, order: &Order, event_id: Option<&str>) -> Result<SettleOutcome> {
        let mut state = self.state.lock().await;
        if event_id.is_some_and(|id| state.payment_events.contains(id)) {
            return Ok(SettleOutcome::DuplicateEvent);
        }
        if state.existing_order(order.id)?.status != OrderStatus::PendingPayment {
            if let Some(id) = event_id { state.payment_events.insert(id.to_string()); }
            return Ok(SettleOutcome::AlreadySettled);
        }
        state.check_stock(&order.stock_movements())?;
        state.check_redemption(order)?;
        state.apply_confirmation(order)?;
        state.orders.insert(order.id, snapshot(order));
        if let Some(id) = event_id { state.payment_events.insert(id.to_string()); }
        Ok(SettleOutcome::Applied)
    }

    async fn record_payment_failure(&self, order: &Order, event_id: Option<&str>) -> Result<SettleOutcome> {
        let mut state = self.state.lock().await;
        if event_id.is_some_and(|id| state.payment_events.contains(id)) {
            return Ok(SettleOutcome::DuplicateEvent);
        }
        if let Some(id) = event_id { state.payment_events.insert(id.to_string()); }
        if state.existing_order(order.id)?.status != OrderStatus::PendingPayment {
            return Ok(SettleOutcome::AlreadySettled);
        }
        state.orders.insert(order.id, snapshot(order));
        Ok(SettleOutcome::Applied)
    }

    async fn cancel_order(&self, order: &Order, previous: OrderStatus, release: &[StockMovement]) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.existing_order(order.id)?.status != previous {
            return Err(status_changed());
        }
        for m in release {
            give_units(state.quantity_mut(m.target)?, m.target, m.quantity)?;
        }
        state.orders.insert(order.id, snapshot(order));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn seeded(quantity: i32) -> (Arc<InMemoryStore>, Product) {
        let store = Arc::new(InMemoryStore::new());
        let tenant = StoreSummary { id: Uuid::now_v7(), slug: "alpha".into(), name: "Alpha".into() };
        store.insert_store(&tenant).await.unwrap();
        let mut product = Product::create(tenant.id, "mug", "Mug", dec!(12)).unwrap();
        product.quantity = quantity;
        store.insert_product(&product).await.unwrap();
        (store, product)
    }

    #[tokio::test]
    async fn test_reserve_is_conditional() {
        let (store, product) = seeded(2).await;
        let target = StockTarget::Product(product.id);
        assert_eq!(store.reserve_stock(target, 2).await.unwrap(), 0);
        assert!(matches!(store.reserve_stock(target, 1).await, Err(MarketplaceError::InsufficientStock { .. })));
        assert_eq!(store.release_stock(target, 3).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_oversized_reservation_takes_nothing() {
        let (store, product) = seeded(5).await;
        let target = StockTarget::Product(product.id);
        assert!(matches!(store.reserve_stock(target, u32::MAX).await, Err(MarketplaceError::InsufficientStock { .. })));
        assert_eq!(store.product(product.id).await.unwrap().quantity, 5);
        assert!(store.release_stock(target, u32::MAX).await.is_err());
        assert_eq!(store.product(product.id).await.unwrap().quantity, 5);
    }

    #[tokio::test]
    async fn test_duplicate_slug_rejected() {
        let (store, product) = seeded(0).await;
        let twin = Product::create(product.store_id, "mug", "Other mug", dec!(9)).unwrap();
        assert!(store.insert_product(&twin).await.is_err());
    }

    #[tokio::test]
    async fn test_combinations_are_never_deleted() {
        let (store, product) = seeded(0).await;
        let mut matrix = store.variant_matrix(product.id).await.unwrap();
        matrix.define_axis(product.variant_mode, crate::domain::aggregates::AxisType::Size, vec![
            crate::domain::aggregates::OptionInput::new("S"),
        ]).unwrap();
        store.save_variant_matrix(&matrix).await.unwrap();
        matrix.combinations.clear();
        assert!(store.save_variant_matrix(&matrix).await.is_err());
    }
}
