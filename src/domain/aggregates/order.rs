//! Order Aggregate
//!
//! Order items freeze everything that priced them, so later catalog edits never
//! change a historical total.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::coupon::DiscountType;
use super::variant::{CombinationKey, Selection};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::value_objects::CouponCode;
use crate::inventory::{consolidate, StockMovement, StockTarget};
use crate::pricing::{AddonCharge, OrderTotals, PricedLine};
use crate::shipping::ShippingMethod;
use crate::{MarketplaceError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus { #[default] PendingPayment, Confirmed, Processing, Shipped, Delivered, Cancelled, PaymentFailed }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus { #[default] Pending, Paid, Failed, Refunded, Voided }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod { Cash, Card }

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self { $(Self::$variant => $text),+ }
            }
            pub fn parse(s: &str) -> Option<Self> {
                match s { $($text => Some(Self::$variant),)+ _ => None }
            }
        }
    };
}

text_enum!(OrderStatus {
    PendingPayment => "PENDING_PAYMENT", Confirmed => "CONFIRMED", Processing => "PROCESSING", Shipped => "SHIPPED",
    Delivered => "DELIVERED", Cancelled => "CANCELLED", PaymentFailed => "PAYMENT_FAILED",
});
text_enum!(PaymentStatus { Pending => "PENDING", Paid => "PAID", Failed => "FAILED", Refunded => "REFUNDED", Voided => "VOIDED" });
text_enum!(PaymentMethod { Cash => "CASH", Card => "CARD" });

impl OrderStatus {
    /// Whether stock has been taken for an order in this state.
    pub fn holds_stock(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Processing | Self::Shipped | Self::Delivered)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Address { pub name: String, pub street1: String, pub street2: Option<String>, pub city: String, pub state: Option<String>, pub zip: String, pub country: String }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub customer_id: Option<Uuid>,
}

impl Customer {
    /// Identity used for per-customer coupon limits and first-order checks.
    pub fn key(&self) -> String { customer_key(&self.email) }
}

pub fn customer_key(email: &str) -> String { email.trim().to_lowercase() }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub combination_id: Option<Uuid>,
    pub combination_key: Option<CombinationKey>,
    pub sku: Option<String>,
    pub selection: Selection,
    pub addons: Vec<AddonCharge>,
    pub unit_price: Decimal,
    pub quantity: u32,
    pub line_total: Decimal,
    /// Present when the product tracks inventory.
    pub stock_target: Option<StockTarget>,
}

impl OrderItem {
    pub fn from_line(line: &PricedLine) -> Self {
        let stock_target = line.track_inventory.then(|| match line.combination_id {
            Some(id) => StockTarget::Combination(id),
            None => StockTarget::Product(line.product_id),
        });
        Self {
            id: Uuid::now_v7(),
            product_id: line.product_id,
            product_name: line.product_name.clone(),
            combination_id: line.combination_id,
            combination_key: line.combination_key.clone(),
            sku: line.sku.clone(),
            selection: line.selection.clone(),
            addons: line.addons.clone(),
            unit_price: line.unit_price,
            quantity: line.quantity,
            line_total: line.line_total,
            stock_target,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppliedCoupon { pub coupon_id: Uuid, pub code: CouponCode, pub discount_type: DiscountType }

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub store_id: Uuid,
    pub customer: Customer,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    /// Gateway intent id for card orders.
    pub payment_reference: Option<String>,
    pub shipping_method: ShippingMethod,
    pub shipping_address: Option<Address>,
    pub items: Vec<OrderItem>,
    pub totals: OrderTotals,
    pub coupon: Option<AppliedCoupon>,
    /// Cart the order was placed from; destroyed once the order is confirmed.
    #[serde(skip_serializing)]
    pub cart_session: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) events: Vec<DomainEvent>,
}

/// Everything an order is built from once the cart has been quoted.
pub struct OrderDraft {
    pub store_id: Uuid,
    pub customer: Customer,
    pub payment_method: PaymentMethod,
    pub shipping_method: ShippingMethod,
    pub shipping_address: Option<Address>,
    pub lines: Vec<PricedLine>,
    pub totals: OrderTotals,
    pub coupon: Option<AppliedCoupon>,
    pub cart_session: Option<String>,
}

impl Order {
    pub fn create(draft: OrderDraft, now: DateTime<Utc>) -> Result<Self> {
        if draft.lines.is_empty() { return Err(MarketplaceError::invalid_field("items", "No items")); }
        let id = Uuid::now_v7();
        let status = match draft.payment_method {
            // Cash skips the gateway: confirmed now, collected by hand later.
            PaymentMethod::Cash => OrderStatus::Confirmed,
            PaymentMethod::Card => OrderStatus::PendingPayment,
        };
        let mut order = Self {
            id,
            order_number: format!("ORD-{:08}", rand::random::<u32>() % 100_000_000),
            store_id: draft.store_id,
            customer: draft.customer,
            status,
            payment_status: PaymentStatus::Pending,
            payment_method: draft.payment_method,
            payment_reference: None,
            shipping_method: draft.shipping_method,
            shipping_address: draft.shipping_address,
            items: draft.lines.iter().map(OrderItem::from_line).collect(),
            totals: draft.totals,
            coupon: draft.coupon,
            cart_session: draft.cart_session,
            created_at: now,
            updated_at: now,
            events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Placed { order_id: id, store_id: order.store_id, total: order.totals.total }));
        if order.status == OrderStatus::Confirmed {
            order.raise_event(DomainEvent::Order(OrderEvent::Confirmed { order_id: id, total: order.totals.total }));
        }
        Ok(order)
    }

    /// Stock to take on confirmation (or give back on cancellation), one entry per row.
    pub fn stock_movements(&self) -> Vec<StockMovement> {
        consolidate(self.items.iter().filter_map(|i| i.stock_target.map(|target| StockMovement { target, quantity: i.quantity })))
    }

    pub fn mark_paid(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != OrderStatus::PendingPayment {
            return Err(MarketplaceError::invalid_field("status", format!("Order {} is not awaiting payment", self.order_number)));
        }
        self.status = OrderStatus::Confirmed;
        self.payment_status = PaymentStatus::Paid;
        self.touch(now);
        self.raise_event(DomainEvent::Order(OrderEvent::Confirmed { order_id: self.id, total: self.totals.total }));
        Ok(())
    }

    pub fn mark_payment_failed(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != OrderStatus::PendingPayment {
            return Err(MarketplaceError::invalid_field("status", format!("Order {} is not awaiting payment", self.order_number)));
        }
        self.status = OrderStatus::PaymentFailed;
        self.payment_status = PaymentStatus::Failed;
        self.touch(now);
        self.raise_event(DomainEvent::Order(OrderEvent::PaymentFailed { order_id: self.id }));
        Ok(())
    }

    /// Cancel the order; returns the stock to give back (empty if none was taken).
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<Vec<StockMovement>> {
        let release = match self.status {
            OrderStatus::Shipped | OrderStatus::Delivered => {
                return Err(MarketplaceError::invalid_field("status", "Cannot cancel an order that has shipped"));
            }
            OrderStatus::Cancelled => {
                return Err(MarketplaceError::invalid_field("status", "Order is already cancelled"));
            }
            OrderStatus::Confirmed | OrderStatus::Processing => self.stock_movements(),
            OrderStatus::PendingPayment | OrderStatus::PaymentFailed => vec![],
        };
        self.status = OrderStatus::Cancelled;
        self.payment_status = match self.payment_status {
            PaymentStatus::Paid => PaymentStatus::Refunded,
            _ => PaymentStatus::Voided,
        };
        self.touch(now);
        self.raise_event(DomainEvent::Order(OrderEvent::Cancelled { order_id: self.id }));
        Ok(release)
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self, now: DateTime<Utc>) { self.updated_at = now; }
}
