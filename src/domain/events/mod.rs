//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::inventory::StockTarget;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "entity", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Product(ProductEvent),
    Order(OrderEvent),
    Inventory(InventoryEvent),
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProductEvent {
    Created { product_id: Uuid, store_id: Uuid },
    Published { product_id: Uuid },
    Archived { product_id: Uuid },
    CombinationsRegenerated { product_id: Uuid, created: usize, retired: usize },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: Uuid, store_id: Uuid, total: Decimal },
    Confirmed { order_id: Uuid, total: Decimal },
    PaymentFailed { order_id: Uuid },
    Cancelled { order_id: Uuid },
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InventoryEvent {
    Restocked { target: StockTarget, quantity: u32, on_hand: i32 },
}

impl DomainEvent {
    /// NATS subject the event is published on.
    pub fn subject(&self) -> String {
        let (entity, name) = match self {
            DomainEvent::Product(e) => ("product", match e {
                ProductEvent::Created { .. } => "created",
                ProductEvent::Published { .. } => "published",
                ProductEvent::Archived { .. } => "archived",
                ProductEvent::CombinationsRegenerated { .. } => "combinations_regenerated",
            }),
            DomainEvent::Order(e) => ("order", match e {
                OrderEvent::Placed { .. } => "placed",
                OrderEvent::Confirmed { .. } => "confirmed",
                OrderEvent::PaymentFailed { .. } => "payment_failed",
                OrderEvent::Cancelled { .. } => "cancelled",
            }),
            DomainEvent::Inventory(e) => ("inventory", match e {
                InventoryEvent::Restocked { .. } => "restocked",
            }),
        };
        format!("marketplace.{entity}.{name}")
    }
}
