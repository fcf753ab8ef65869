//! Application services: the orchestration between HTTP handlers and the
//! pricing, inventory and persistence layers.

pub mod cart;
pub mod catalog;
pub mod checkout;

use std::sync::Arc;

use crate::config::Config;
use crate::inventory::Inventory;
use crate::payment::PaymentGateway;
use crate::publisher::EventPublisher;
use crate::shipping::ShippingRates;
use crate::store::MarketplaceStore;

pub use cart::{CartQuote, CartService, CartView, CouponPreview, UnavailableLine};
pub use catalog::{CatalogService, NewProduct};
pub use checkout::{CheckoutRequest, CheckoutService, EventDisposition, PaymentEvent, PaymentEventAck, PaymentIntentCreated};

#[derive(Clone)]
pub struct Services {
    pub catalog: CatalogService,
    pub carts: CartService,
    pub checkout: CheckoutService,
    pub inventory: Inventory,
    pub shipping: Arc<dyn ShippingRates>,
}

impl Services {
    pub fn new(
        store: Arc<dyn MarketplaceStore>,
        gateway: Arc<dyn PaymentGateway>,
        shipping: Arc<dyn ShippingRates>,
        publisher: EventPublisher,
        config: &Config,
    ) -> Self {
        let inventory = Inventory::new(store.clone());
        let carts = CartService::new(store.clone(), shipping.clone(), config);
        Self {
            catalog: CatalogService::new(store.clone(), inventory.clone(), publisher.clone()),
            checkout: CheckoutService::new(store, gateway, carts.clone(), publisher),
            carts,
            inventory,
            shipping,
        }
    }
}
