//! Checkout and payment settlement.
//!
//! Cash orders confirm immediately. Card orders are stored as
//! PENDING_PAYMENT and confirmed later, either by the shopper's client
//! calling back after the gateway succeeds or by a gateway webhook. Both
//! paths end in the same conditional settlement, so a payment is applied
//! at most once.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::cart::{CartQuote, CartService};
use crate::domain::aggregates::{Address, Customer, Order, OrderDraft, OrderStatus, PaymentMethod};
use crate::payment::{IntentStatus, PaymentGateway};
use crate::publisher::EventPublisher;
use crate::shipping::is_valid_zip;
use crate::store::{MarketplaceStore, SettleOutcome};
use crate::{MarketplaceError, Result};

#[derive(Clone, Debug, Deserialize)]
pub struct CheckoutRequest {
    pub session_id: String,
    pub shipping_method_id: String,
    pub customer: Customer,
    #[serde(default)]
    pub shipping_address: Option<Address>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PaymentIntentCreated {
    pub order: Order,
    pub intent_id: String,
    pub client_secret: String,
}

/// A verdict pushed by the payment gateway.
#[derive(Clone, Debug, Deserialize)]
pub struct PaymentEvent {
    pub event_id: String,
    pub intent_id: String,
    pub status: IntentStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventDisposition {
    Applied,
    Duplicate,
    AlreadySettled,
    /// Still pending at the gateway; nothing to do yet.
    Ignored,
}

impl From<SettleOutcome> for EventDisposition {
    fn from(outcome: SettleOutcome) -> Self {
        match outcome {
            SettleOutcome::Applied => Self::Applied,
            SettleOutcome::DuplicateEvent => Self::Duplicate,
            SettleOutcome::AlreadySettled => Self::AlreadySettled,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PaymentEventAck {
    pub received: bool,
    pub event_id: String,
    pub order_id: Uuid,
    pub disposition: EventDisposition,
    pub order_status: OrderStatus,
}

#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn MarketplaceStore>,
    gateway: Arc<dyn PaymentGateway>,
    carts: CartService,
    publisher: EventPublisher,
}

impl CheckoutService {
    pub fn new(store: Arc<dyn MarketplaceStore>, gateway: Arc<dyn PaymentGateway>, carts: CartService, publisher: EventPublisher) -> Self {
        Self { store, gateway, carts, publisher }
    }

    async fn draft(&self, request: &CheckoutRequest, payment_method: PaymentMethod) -> Result<OrderDraft> {
        let mut invalid = Vec::new();
        let email = request.customer.email.trim();
        if email.is_empty() || !email.contains('@') { invalid.push("customer.email".to_string()); }
        if let Some(address) = &request.shipping_address {
            if !is_valid_zip(address.zip.trim()) { invalid.push("shipping_address.zip".to_string()); }
            if address.street1.trim().is_empty() { invalid.push("shipping_address.street1".to_string()); }
            if address.city.trim().is_empty() { invalid.push("shipping_address.city".to_string()); }
        }
        if !invalid.is_empty() {
            return Err(MarketplaceError::validation(format!("Invalid checkout: {}", invalid.join(", ")), invalid));
        }

        let CartQuote { cart_id, store, lines, shipping_method, discount, totals } =
            self.carts.quote(&request.session_id, &request.shipping_method_id, Some(email)).await?;
        Ok(OrderDraft {
            store_id: store.id,
            customer: Customer { email: email.to_string(), ..request.customer.clone() },
            payment_method,
            shipping_method,
            shipping_address: request.shipping_address.clone(),
            lines,
            totals,
            coupon: discount.coupon,
            cart_session: Some(cart_id),
        })
    }

    /// Confirm a cash-on-delivery order: stock is taken now, payment collected later.
    pub async fn place_cash_order(&self, request: &CheckoutRequest) -> Result<Order> {
        let mut order = Order::create(self.draft(request, PaymentMethod::Cash).await?, Utc::now())?;
        self.store.place_confirmed_order(&order).await?;
        tracing::info!(
            order_id = %order.id, order_number = %order.order_number, store_id = %order.store_id,
            total = %order.totals.total, "Placed cash order"
        );
        self.publisher.publish(order.take_events()).await;
        Ok(order)
    }

    /// Open a card payment: the order is stored awaiting payment, stock untouched.
    pub async fn create_payment_intent(&self, request: &CheckoutRequest) -> Result<PaymentIntentCreated> {
        let mut order = Order::create(self.draft(request, PaymentMethod::Card).await?, Utc::now())?;
        let intent = self.gateway.create_intent(&order.totals.charge(), &order.id.to_string()).await?;
        order.payment_reference = Some(intent.id.clone());
        self.store.insert_pending_order(&order).await?;
        tracing::info!(
            order_id = %order.id, intent_id = %intent.id, gateway = self.gateway.name(),
            amount = intent.amount, "Created payment intent"
        );
        self.publisher.publish(order.take_events()).await;
        Ok(PaymentIntentCreated { order, intent_id: intent.id, client_secret: intent.client_secret })
    }

    /// Client-side confirmation after the gateway reports back. Safe to call repeatedly.
    pub async fn confirm_card_payment(&self, order_id: Uuid) -> Result<Order> {
        let order = self.store.order(order_id).await?;
        match order.status {
            OrderStatus::PendingPayment => {}
            OrderStatus::PaymentFailed => return Err(MarketplaceError::PaymentFailed("Payment was declined".into())),
            OrderStatus::Cancelled => return Err(MarketplaceError::invalid_field("status", "Order has been cancelled")),
            _ => return Ok(order),
        }
        let reference = order.payment_reference.clone()
            .ok_or_else(|| MarketplaceError::PaymentFailed("Order has no payment intent".into()))?;
        let intent = self.gateway.retrieve_intent(&reference).await?;
        match intent.status {
            IntentStatus::Succeeded => Ok(self.settle(order, None).await?.0),
            IntentStatus::Failed => {
                self.fail(order, None).await?;
                Err(MarketplaceError::PaymentFailed("Payment was declined".into()))
            }
            IntentStatus::Pending => Err(MarketplaceError::PaymentFailed("Payment is still pending".into())),
        }
    }

    /// Gateway webhook. Redelivery of the same event id changes nothing.
    pub async fn handle_payment_event(&self, event: &PaymentEvent) -> Result<PaymentEventAck> {
        let order = self.store.order_by_payment_reference(&event.intent_id).await?;
        let order_id = order.id;
        let (order, disposition) = if order.status != OrderStatus::PendingPayment {
            (order, EventDisposition::AlreadySettled)
        } else {
            match event.status {
                IntentStatus::Succeeded => {
                    let (order, outcome) = self.settle(order, Some(event.event_id.as_str())).await?;
                    (order, outcome.into())
                }
                IntentStatus::Failed => {
                    let (order, outcome) = self.fail(order, Some(event.event_id.as_str())).await?;
                    (order, outcome.into())
                }
                IntentStatus::Pending => (order, EventDisposition::Ignored),
            }
        };
        tracing::info!(event_id = %event.event_id, order_id = %order_id, disposition = ?disposition, "Handled payment event");
        Ok(PaymentEventAck {
            received: true,
            event_id: event.event_id.clone(),
            order_id,
            disposition,
            order_status: order.status,
        })
    }

    async fn settle(&self, mut order: Order, event_id: Option<&str>) -> Result<(Order, SettleOutcome)> {
        order.mark_paid(Utc::now())?;
        let outcome = self.store.settle_payment(&order, event_id).await?;
        if outcome == SettleOutcome::Applied {
            tracing::info!(order_id = %order.id, total = %order.totals.total, "Card payment settled");
            self.publisher.publish(order.take_events()).await;
            return Ok((order, outcome));
        }
        tracing::debug!(order_id = %order.id, outcome = ?outcome, "Payment already applied");
        Ok((self.store.order(order.id).await?, outcome))
    }

    async fn fail(&self, mut order: Order, event_id: Option<&str>) -> Result<(Order, SettleOutcome)> {
        order.mark_payment_failed(Utc::now())?;
        let outcome = self.store.record_payment_failure(&order, event_id).await?;
        if outcome == SettleOutcome::Applied {
            tracing::warn!(order_id = %order.id, "Card payment failed");
            self.publisher.publish(order.take_events()).await;
            return Ok((order, outcome));
        }
        Ok((self.store.order(order.id).await?, outcome))
    }

    /// Cancel an order, giving back any stock it holds exactly once.
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<Order> {
        let mut order = self.store.order(order_id).await?;
        let previous = order.status;
        let release = order.cancel(Utc::now())?;
        self.store.cancel_order(&order, previous, &release).await?;
        tracing::info!(order_id = %order.id, released = release.len(), payment_status = order.payment_status.as_str(), "Cancelled order");
        self.publisher.publish(order.take_events()).await;
        Ok(order)
    }

    pub async fn order(&self, order_id: Uuid) -> Result<Order> {
        self.store.order(order_id).await
    }
}
