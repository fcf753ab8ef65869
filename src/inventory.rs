//! Inventory reservation.
//!
//! Stock is decremented only when an order is confirmed and only through a
//! conditional update in the store (`quantity >= requested`), so two checkouts
//! racing for the last unit cannot both succeed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::events::{DomainEvent, InventoryEvent};
use crate::store::MarketplaceStore;
use crate::{MarketplaceError, Result};

/// The row whose quantity a reservation touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum StockTarget {
    /// A product without variant axes.
    Product(Uuid),
    Combination(Uuid),
}

impl StockTarget {
    pub fn kind(&self) -> &'static str {
        match self { Self::Product(_) => "product", Self::Combination(_) => "combination" }
    }
    pub fn id(&self) -> Uuid {
        match self { Self::Product(id) | Self::Combination(id) => *id }
    }
    pub fn from_parts(kind: &str, id: Uuid) -> Option<Self> {
        match kind { "product" => Some(Self::Product(id)), "combination" => Some(Self::Combination(id)), _ => None }
    }
}

impl fmt::Display for StockTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}:{}", self.kind(), self.id()) }
}

/// One quantity change against one target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub target: StockTarget,
    pub quantity: u32,
}

/// Merge movements on the same target so each row is updated once.
pub fn consolidate(movements: impl IntoIterator<Item = StockMovement>) -> Vec<StockMovement> {
    let mut merged: std::collections::BTreeMap<StockTarget, u32> = std::collections::BTreeMap::new();
    for m in movements {
        *merged.entry(m.target).or_default() += m.quantity;
    }
    merged.into_iter().map(|(target, quantity)| StockMovement { target, quantity }).collect()
}

#[derive(Clone)]
pub struct Inventory {
    store: Arc<dyn MarketplaceStore>,
}

impl Inventory {
    pub fn new(store: Arc<dyn MarketplaceStore>) -> Self { Self { store } }

    /// Atomically take `quantity` units; fails without side effects if fewer remain.
    pub async fn reserve_on_order_confirm(&self, target: StockTarget, quantity: u32) -> Result<i32> {
        if quantity == 0 { return Err(MarketplaceError::invalid_field("quantity", "Quantity must be at least 1")); }
        let remaining = self.store.reserve_stock(target, quantity).await?;
        tracing::info!(target = %target, quantity, remaining, "Reserved stock");
        Ok(remaining)
    }

    /// Put units back after a cancellation or refund. Never fails on bounds.
    pub async fn release_on_cancel_or_refund(&self, target: StockTarget, quantity: u32) -> Result<i32> {
        let on_hand = self.store.release_stock(target, quantity).await?;
        tracing::info!(target = %target, quantity, on_hand, "Released stock");
        Ok(on_hand)
    }

    /// Vendor restock; same increment as a release, reported as its own event.
    pub async fn restock(&self, target: StockTarget, quantity: u32) -> Result<(i32, DomainEvent)> {
        if quantity == 0 { return Err(MarketplaceError::invalid_field("quantity", "Quantity must be at least 1")); }
        let on_hand = self.store.release_stock(target, quantity).await?;
        tracing::info!(target = %target, quantity, on_hand, "Restocked");
        Ok((on_hand, DomainEvent::Inventory(InventoryEvent::Restocked { target, quantity, on_hand })))
    }
}
