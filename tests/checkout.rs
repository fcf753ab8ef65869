//! End-to-end checkout flows against the in-memory store.

use chrono::Utc;
use rust_decimal_macros::dec;
use std::sync::Arc;

use opensase_marketplace::config::Config;
use opensase_marketplace::domain::aggregates::{
    AxisType, Coupon, Customer, OptionInput, OrderStatus, PaymentStatus, Product, Selection, StoreSummary,
};
use opensase_marketplace::domain::value_objects::CouponCode;
use opensase_marketplace::inventory::{Inventory, StockTarget};
use opensase_marketplace::payment::{IntentStatus, SandboxGateway};
use opensase_marketplace::pricing::LineRequest;
use opensase_marketplace::publisher::EventPublisher;
use opensase_marketplace::services::{CheckoutRequest, EventDisposition, NewProduct, PaymentEvent, Services};
use opensase_marketplace::shipping::FlatRateTable;
use opensase_marketplace::store::{InMemoryStore, MarketplaceStore};
use opensase_marketplace::{CouponRejection, MarketplaceError};

struct Harness {
    services: Services,
    store: Arc<InMemoryStore>,
    gateway: Arc<SandboxGateway>,
    tenant: StoreSummary,
}

async fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let gateway = Arc::new(SandboxGateway::new());
    let services = Services::new(
        store.clone(),
        gateway.clone(),
        Arc::new(FlatRateTable::default()),
        EventPublisher::disabled(),
        &Config::default(),
    );
    let tenant = services.catalog.create_store("alpha", "Alpha Goods").await.unwrap();
    Harness { services, store, gateway, tenant }
}

async fn listed(h: &Harness, slug: &str, price: rust_decimal::Decimal, quantity: i32) -> Product {
    h.services.catalog.create_product(NewProduct {
        store_id: h.tenant.id,
        slug: slug.into(),
        name: slug.to_uppercase(),
        base_price: price,
        compare_at_price: None,
        sku: None,
        category_id: None,
        track_inventory: true,
        quantity,
        variant_mode: Default::default(),
        publish: true,
    }).await.unwrap()
}

fn line(product: &Product, quantity: u32) -> LineRequest {
    LineRequest { product_id: product.id, selection: Selection::new(), addons: vec![], quantity }
}

fn checkout(session: &str, email: &str) -> CheckoutRequest {
    CheckoutRequest {
        session_id: session.into(),
        shipping_method_id: "standard".into(),
        customer: Customer { email: email.into(), name: Some("Ada".into()), customer_id: None },
        shipping_address: None,
    }
}

#[tokio::test]
async fn test_cash_checkout_totals_and_stock() {
    let h = harness().await;
    let mug = listed(&h, "mug", dec!(50.00), 5).await;
    let coupon = Coupon::percentage(h.tenant.id, CouponCode::parse("STARTER5").unwrap(), dec!(5));
    h.services.catalog.create_coupon(coupon).await.unwrap();

    h.services.carts.add_item("sess-1", line(&mug, 2)).await.unwrap();
    h.services.carts.apply_coupon("sess-1", "starter5", None).await.unwrap();

    let order = h.services.checkout.place_cash_order(&checkout("sess-1", "ada@example.com")).await.unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.totals.subtotal, dec!(100.00));
    assert_eq!(order.totals.discount, dec!(5.00));
    assert_eq!(order.totals.shipping, dec!(8.99));
    assert_eq!(order.totals.tax, dec!(9.10));
    assert_eq!(order.totals.total, dec!(113.09));
    assert!(order.order_number.starts_with("ORD-"));

    assert_eq!(h.store.product(mug.id).await.unwrap().quantity, 3);
    // Cart is gone once the order is confirmed.
    assert!(h.store.cart("sess-1").await.unwrap().is_none());
    assert!(h.services.carts.get_cart("sess-1").await.unwrap().cart.items.is_empty());
}

#[tokio::test]
async fn test_checkout_resolves_combination_stock() {
    let h = harness().await;
    let tee = listed(&h, "tee", dec!(20), 0).await;
    let (_, matrix) = h.services.catalog
        .define_axis(tee.id, AxisType::Size, vec![OptionInput::new("S"), OptionInput::new("M")])
        .await.unwrap();
    let medium = matrix.combinations.iter().find(|c| c.selection.get(&AxisType::Size).map(String::as_str) == Some("M")).unwrap();
    h.services.catalog.restock(StockTarget::Combination(medium.id), 2).await.unwrap();

    let mut selection = Selection::new();
    selection.insert(AxisType::Size, "m".into());
    let request = LineRequest { product_id: tee.id, selection, addons: vec![], quantity: 2 };
    h.services.carts.add_item("sess-2", request).await.unwrap();

    let order = h.services.checkout.place_cash_order(&checkout("sess-2", "bo@example.com")).await.unwrap();
    assert_eq!(order.items[0].combination_id, Some(medium.id));
    assert_eq!(h.store.combination(medium.id).await.unwrap().quantity, 0);
}

#[tokio::test]
async fn test_concurrent_reservations_for_last_unit() {
    let h = harness().await;
    let lamp = listed(&h, "lamp", dec!(30), 1).await;
    let store: Arc<dyn MarketplaceStore> = h.store.clone();
    let inventory = Inventory::new(store);
    let target = StockTarget::Product(lamp.id);

    let (a, b) = tokio::join!(
        inventory.reserve_on_order_confirm(target, 1),
        inventory.reserve_on_order_confirm(target, 1),
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(results.iter().filter(|r| matches!(r, Err(MarketplaceError::InsufficientStock { .. }))).count(), 1);
    assert_eq!(h.store.product(lamp.id).await.unwrap().quantity, 0);

    assert_eq!(inventory.release_on_cancel_or_refund(target, 1).await.unwrap(), 1);
}

#[tokio::test]
async fn test_card_payment_webhook_is_idempotent() {
    let h = harness().await;
    let mug = listed(&h, "mug", dec!(12.50), 4).await;
    h.services.carts.add_item("sess-3", line(&mug, 2)).await.unwrap();

    let created = h.services.checkout.create_payment_intent(&checkout("sess-3", "cy@example.com")).await.unwrap();
    assert_eq!(created.order.status, OrderStatus::PendingPayment);
    // Nothing is taken until the payment succeeds.
    assert_eq!(h.store.product(mug.id).await.unwrap().quantity, 4);

    let event = PaymentEvent { event_id: "evt_1".into(), intent_id: created.intent_id.clone(), status: IntentStatus::Succeeded };
    let first = h.services.checkout.handle_payment_event(&event).await.unwrap();
    assert_eq!(first.disposition, EventDisposition::Applied);
    assert_eq!(first.order_status, OrderStatus::Confirmed);

    let replay = h.services.checkout.handle_payment_event(&event).await.unwrap();
    assert_ne!(replay.disposition, EventDisposition::Applied);
    assert_eq!(h.store.product(mug.id).await.unwrap().quantity, 2);

    // The client-side confirmation arriving late is a no-op too.
    h.gateway.set_status(&created.intent_id, IntentStatus::Succeeded).await.unwrap();
    let order = h.services.checkout.confirm_card_payment(created.order.id).await.unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Paid);
    assert_eq!(h.store.product(mug.id).await.unwrap().quantity, 2);
    assert!(h.store.cart("sess-3").await.unwrap().is_none());
}

#[tokio::test]
async fn test_card_confirmation_pending_and_declined() {
    let h = harness().await;
    let mug = listed(&h, "mug", dec!(10), 4).await;
    h.services.carts.add_item("sess-4", line(&mug, 1)).await.unwrap();
    let created = h.services.checkout.create_payment_intent(&checkout("sess-4", "di@example.com")).await.unwrap();

    let pending = h.services.checkout.confirm_card_payment(created.order.id).await.unwrap_err();
    assert!(matches!(pending, MarketplaceError::PaymentFailed(_)));

    h.gateway.set_status(&created.intent_id, IntentStatus::Failed).await.unwrap();
    let declined = h.services.checkout.confirm_card_payment(created.order.id).await.unwrap_err();
    assert!(matches!(declined, MarketplaceError::PaymentFailed(_)));

    let order = h.services.checkout.order(created.order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::PaymentFailed);
    assert_eq!(order.payment_status, PaymentStatus::Failed);
    assert_eq!(h.store.product(mug.id).await.unwrap().quantity, 4);
}

#[tokio::test]
async fn test_cancel_releases_stock_once() {
    let h = harness().await;
    let mug = listed(&h, "mug", dec!(10), 3).await;
    h.services.carts.add_item("sess-5", line(&mug, 2)).await.unwrap();
    let order = h.services.checkout.place_cash_order(&checkout("sess-5", "ed@example.com")).await.unwrap();
    assert_eq!(h.store.product(mug.id).await.unwrap().quantity, 1);

    let cancelled = h.services.checkout.cancel_order(order.id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(cancelled.payment_status, PaymentStatus::Voided);
    assert_eq!(h.store.product(mug.id).await.unwrap().quantity, 3);

    assert!(h.services.checkout.cancel_order(order.id).await.is_err());
    assert_eq!(h.store.product(mug.id).await.unwrap().quantity, 3);
}

#[tokio::test]
async fn test_cancel_loses_to_settlement_that_lands_first() {
    let h = harness().await;
    let mug = listed(&h, "mug", dec!(10), 4).await;
    h.services.carts.add_item("sess-9", line(&mug, 2)).await.unwrap();
    let created = h.services.checkout.create_payment_intent(&checkout("sess-9", "gi@example.com")).await.unwrap();

    // Cancellation read the order while it was still awaiting payment.
    let mut stale = h.store.order(created.order.id).await.unwrap();
    let previous = stale.status;
    let release = stale.cancel(Utc::now()).unwrap();
    assert!(release.is_empty());

    let event = PaymentEvent { event_id: "evt_7".into(), intent_id: created.intent_id.clone(), status: IntentStatus::Succeeded };
    let ack = h.services.checkout.handle_payment_event(&event).await.unwrap();
    assert_eq!(ack.disposition, EventDisposition::Applied);
    assert_eq!(h.store.product(mug.id).await.unwrap().quantity, 2);

    let err = h.store.cancel_order(&stale, previous, &release).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::Validation { .. }));
    assert_eq!(h.store.order(created.order.id).await.unwrap().status, OrderStatus::Confirmed);

    // A fresh cancellation sees the confirmed order and gives the units back.
    let cancelled = h.services.checkout.cancel_order(created.order.id).await.unwrap();
    assert_eq!(cancelled.payment_status, PaymentStatus::Refunded);
    assert_eq!(h.store.product(mug.id).await.unwrap().quantity, 4);
}

#[tokio::test]
async fn test_per_customer_coupon_limit_enforced_at_placement() {
    let h = harness().await;
    let mug = listed(&h, "mug", dec!(10), 10).await;
    let mut coupon = Coupon::fixed_amount(h.tenant.id, CouponCode::parse("ONCE").unwrap(), dec!(2));
    coupon.per_customer_limit = Some(1);
    h.services.catalog.create_coupon(coupon).await.unwrap();

    h.services.carts.add_item("sess-6", line(&mug, 1)).await.unwrap();
    h.services.carts.apply_coupon("sess-6", "ONCE", None).await.unwrap();
    h.services.checkout.place_cash_order(&checkout("sess-6", "Fay@Example.com")).await.unwrap();

    // Anonymous cart quotes skip customer checks; placement does not.
    h.services.carts.add_item("sess-7", line(&mug, 1)).await.unwrap();
    h.services.carts.apply_coupon("sess-7", "ONCE", None).await.unwrap();
    let err = h.services.checkout.place_cash_order(&checkout("sess-7", "fay@example.com")).await.unwrap_err();
    assert!(matches!(err, MarketplaceError::CouponIneligible(CouponRejection::CustomerLimitReached)));
    assert_eq!(h.store.product(mug.id).await.unwrap().quantity, 9);
}

#[tokio::test]
async fn test_single_store_cart() {
    let h = harness().await;
    let mug = listed(&h, "mug", dec!(10), 10).await;
    let beta = h.services.catalog.create_store("beta", "Beta").await.unwrap();
    let other = h.services.catalog.create_product(NewProduct {
        store_id: beta.id, slug: "cap".into(), name: "Cap".into(), base_price: dec!(15), compare_at_price: None,
        sku: None, category_id: None, track_inventory: false, quantity: 0, variant_mode: Default::default(), publish: true,
    }).await.unwrap();

    h.services.carts.add_item("sess-8", line(&mug, 1)).await.unwrap();
    match h.services.carts.add_item("sess-8", line(&other, 1)).await {
        Err(MarketplaceError::DifferentStore { current, requested }) => {
            assert_eq!(current.id, h.tenant.id);
            assert_eq!(requested.id, beta.id);
        }
        other => panic!("expected a store conflict, got {:?}", other.map(|v| v.cart.items.len())),
    }

    h.services.carts.clear("sess-8").await.unwrap();
    let view = h.services.carts.add_item("sess-8", line(&other, 1)).await.unwrap();
    assert_eq!(view.cart.store.map(|s| s.id), Some(beta.id));
}
