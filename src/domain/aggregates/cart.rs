//! Cart Aggregate
//!
//! A cart session belongs to one store at a time. Lines carry no prices; they
//! are repriced from the live catalog every time the cart is quoted.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::addon::AddonSelection;
use super::variant::Selection;
use crate::domain::value_objects::CouponCode;
use crate::{MarketplaceError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSummary {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub line_id: Uuid,
    pub product_id: Uuid,
    #[serde(default)]
    pub selection: Selection,
    #[serde(default)]
    pub addons: Vec<AddonSelection>,
    pub quantity: u32,
}

impl CartItem {
    pub fn new(product_id: Uuid, selection: Selection, mut addons: Vec<AddonSelection>, quantity: u32) -> Self {
        addons.sort();
        Self { line_id: Uuid::now_v7(), product_id, selection, addons, quantity }
    }

    /// Same product, same variant, same customizations.
    fn same_configuration(&self, other: &CartItem) -> bool {
        self.product_id == other.product_id && self.selection == other.selection && self.addons == other.addons
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CartSession {
    pub id: String,
    pub store: Option<StoreSummary>,
    pub items: Vec<CartItem>,
    pub coupon_code: Option<CouponCode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CartSession {
    pub fn new(id: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self { id: id.into(), store: None, items: vec![], coupon_code: None, created_at: now, updated_at: now, expires_at: now + ttl }
    }

    pub fn store_slug(&self) -> Option<&str> { self.store.as_ref().map(|s| s.slug.as_str()) }
    pub fn item_count(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool { now >= self.expires_at }

    pub fn item(&self, line_id: Uuid) -> Result<&CartItem> {
        self.items.iter().find(|i| i.line_id == line_id).ok_or_else(|| MarketplaceError::not_found("cart line", line_id))
    }

    /// Add a line, merging with an identical one. Returns the line id holding the item.
    pub fn add_item(&mut self, store: StoreSummary, item: CartItem) -> Result<Uuid> {
        if item.quantity == 0 {
            return Err(MarketplaceError::invalid_field("quantity", "Quantity must be at least 1"));
        }
        match &self.store {
            Some(current) if current.id != store.id && !self.items.is_empty() => {
                return Err(MarketplaceError::DifferentStore { current: current.clone(), requested: store });
            }
            _ => {}
        }
        if self.items.is_empty() {
            self.coupon_code = None;
        }
        self.store = Some(store);
        let line_id = if let Some(existing) = self.items.iter_mut().find(|i| i.same_configuration(&item)) {
            existing.quantity = existing.quantity.saturating_add(item.quantity);
            existing.line_id
        } else {
            let id = item.line_id;
            self.items.push(item);
            id
        };
        Ok(line_id)
    }

    pub fn update_quantity(&mut self, line_id: Uuid, quantity: u32) -> Result<()> {
        if quantity == 0 { return self.remove_item(line_id); }
        let item = self.items.iter_mut().find(|i| i.line_id == line_id).ok_or_else(|| MarketplaceError::not_found("cart line", line_id))?;
        item.quantity = quantity;
        Ok(())
    }

    pub fn remove_item(&mut self, line_id: Uuid) -> Result<()> {
        let before = self.items.len();
        self.items.retain(|i| i.line_id != line_id);
        if self.items.len() == before { return Err(MarketplaceError::not_found("cart line", line_id)); }
        if self.items.is_empty() { self.reset(); }
        Ok(())
    }

    pub fn clear(&mut self) { self.items.clear(); self.reset(); }

    pub fn apply_coupon(&mut self, code: CouponCode) { self.coupon_code = Some(code); }
    pub fn remove_coupon(&mut self) { self.coupon_code = None; }

    /// Extend the session's lifetime after activity.
    pub fn touch(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.updated_at = now;
        self.expires_at = now + ttl;
    }

    fn reset(&mut self) {
        self.store = None;
        self.coupon_code = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(slug: &str) -> StoreSummary {
        StoreSummary { id: Uuid::now_v7(), slug: slug.into(), name: slug.to_uppercase() }
    }

    fn cart() -> CartSession { CartSession::new("sess-1", Utc::now(), Duration::hours(1)) }

    #[test]
    fn test_cart_operations() {
        let a = store("alpha");
        let product = Uuid::now_v7();
        let mut cart = cart();
        let first = cart.add_item(a.clone(), CartItem::new(product, Selection::new(), vec![], 2)).unwrap();
        assert_eq!(cart.item_count(), 1);
        let merged = cart.add_item(a.clone(), CartItem::new(product, Selection::new(), vec![], 1)).unwrap();
        assert_eq!(first, merged);
        assert_eq!(cart.items[0].quantity, 3); // Merged
        assert_eq!(cart.store_slug(), Some("alpha"));

        cart.update_quantity(first, 5).unwrap();
        assert_eq!(cart.items[0].quantity, 5);
        cart.update_quantity(first, 0).unwrap();
        assert!(cart.is_empty());
        assert_eq!(cart.store_slug(), None);
    }

    #[test]
    fn test_different_addons_are_separate_lines() {
        let a = store("alpha");
        let product = Uuid::now_v7();
        let addon = Uuid::now_v7();
        let mut cart = cart();
        cart.add_item(a.clone(), CartItem::new(product, Selection::new(), vec![], 1)).unwrap();
        cart.add_item(a, CartItem::new(product, Selection::new(), vec![AddonSelection::single(addon, "HI")], 1)).unwrap();
        assert_eq!(cart.item_count(), 2);
    }

    #[test]
    fn test_single_store_invariant() {
        let a = store("alpha");
        let b = store("bravo");
        let mut cart = cart();
        cart.add_item(a.clone(), CartItem::new(Uuid::now_v7(), Selection::new(), vec![], 1)).unwrap();

        match cart.add_item(b.clone(), CartItem::new(Uuid::now_v7(), Selection::new(), vec![], 1)) {
            Err(MarketplaceError::DifferentStore { current, requested }) => {
                assert_eq!(current, a);
                assert_eq!(requested, b);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(cart.item_count(), 1);

        cart.clear();
        cart.add_item(b, CartItem::new(Uuid::now_v7(), Selection::new(), vec![], 1)).unwrap();
        assert_eq!(cart.store_slug(), Some("bravo"));
    }

    #[test]
    fn test_missing_line() {
        let mut cart = cart();
        assert!(matches!(cart.remove_item(Uuid::now_v7()), Err(MarketplaceError::NotFound { .. })));
        assert!(cart.add_item(store("a"), CartItem::new(Uuid::now_v7(), Selection::new(), vec![], 0)).is_err());
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let mut cart = CartSession::new("s", now, Duration::minutes(30));
        assert!(!cart.is_expired(now + Duration::minutes(29)));
        assert!(cart.is_expired(now + Duration::minutes(30)));
        cart.touch(now + Duration::minutes(20), Duration::minutes(30));
        assert!(!cart.is_expired(now + Duration::minutes(45)));
    }
}
