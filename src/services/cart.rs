//! Cart sessions.
//!
//! Carts hold configuration only. Every read reprices the lines against the
//! live catalog, so a price change or a sold-out combination shows up the
//! next time the cart is viewed.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::Config;
use crate::domain::aggregates::order::customer_key;
use crate::domain::aggregates::{CartItem, CartSession, DiscountType, Product, ProductAddon, StoreSummary, VariantMatrix};
use crate::domain::value_objects::{CouponCode, TaxRate};
use crate::pricing::{self, CouponContext, DiscountOutcome, LineRequest, OrderTotals, PricedLine};
use crate::shipping::{ShippingMethod, ShippingRates};
use crate::store::MarketplaceStore;
use crate::{MarketplaceError, Result};

/// A cart line that can no longer be bought as configured.
#[derive(Clone, Debug, Serialize)]
pub struct UnavailableLine {
    pub line_id: Uuid,
    pub product_id: Uuid,
    pub kind: &'static str,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct CartView {
    pub cart: CartSession,
    pub lines: Vec<PricedLine>,
    pub subtotal: Decimal,
    pub unavailable: Vec<UnavailableLine>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CouponPreview {
    pub code: CouponCode,
    /// Product discount only; no shipping method is known yet.
    pub discount: DiscountOutcome,
    /// The coupon waives shipping, priced once a method is quoted.
    pub shipping_discount_at_quote: bool,
    pub cart: CartView,
}

/// Everything a checkout needs, priced once.
#[derive(Clone, Debug, Serialize)]
pub struct CartQuote {
    pub cart_id: String,
    pub store: StoreSummary,
    pub lines: Vec<PricedLine>,
    pub shipping_method: ShippingMethod,
    pub discount: DiscountOutcome,
    pub totals: OrderTotals,
}

type CatalogEntry = (Product, VariantMatrix, Vec<ProductAddon>);

fn line_request(item: &CartItem) -> LineRequest {
    LineRequest {
        product_id: item.product_id,
        selection: item.selection.clone(),
        addons: item.addons.clone(),
        quantity: item.quantity,
    }
}

#[derive(Clone)]
pub struct CartService {
    store: Arc<dyn MarketplaceStore>,
    shipping: Arc<dyn ShippingRates>,
    tax_rate: TaxRate,
    currency: String,
    ttl: Duration,
}

impl CartService {
    pub fn new(store: Arc<dyn MarketplaceStore>, shipping: Arc<dyn ShippingRates>, config: &Config) -> Self {
        Self { store, shipping, tax_rate: config.tax_rate, currency: config.currency.clone(), ttl: config.cart_ttl }
    }

    /// The live cart for a session; expired carts are dropped and replaced.
    async fn load(&self, session_id: &str) -> Result<CartSession> {
        if session_id.trim().is_empty() || session_id.len() > 128 {
            return Err(MarketplaceError::invalid_field("session", "Session id must be 1-128 characters"));
        }
        let now = Utc::now();
        match self.store.cart(session_id).await? {
            Some(cart) if !cart.is_expired(now) => Ok(cart),
            Some(_) => {
                tracing::debug!(session = %session_id, "Cart expired, starting a new one");
                self.store.delete_cart(session_id).await?;
                Ok(CartSession::new(session_id, now, self.ttl))
            }
            None => Ok(CartSession::new(session_id, now, self.ttl)),
        }
    }

    async fn save(&self, cart: &mut CartSession) -> Result<()> {
        cart.touch(Utc::now(), self.ttl);
        self.store.save_cart(cart).await
    }

    async fn catalog_entry(&self, product_id: Uuid) -> Result<CatalogEntry> {
        let product = self.store.product(product_id).await?;
        let matrix = self.store.variant_matrix(product_id).await?;
        let addons = self.store.addons(product_id).await?;
        Ok((product, matrix, addons))
    }

    /// Price every line. Catalog problems stay per line; storage failures abort.
    async fn price_items<'a>(&self, items: &'a [CartItem]) -> Result<Vec<(&'a CartItem, Result<PricedLine>)>> {
        let mut catalog: HashMap<Uuid, CatalogEntry> = HashMap::new();
        let mut priced = Vec::with_capacity(items.len());
        for item in items {
            if !catalog.contains_key(&item.product_id) {
                match self.catalog_entry(item.product_id).await {
                    Ok(entry) => { catalog.insert(item.product_id, entry); }
                    Err(e @ MarketplaceError::NotFound { .. }) => { priced.push((item, Err(e))); continue; }
                    Err(e) => return Err(e),
                }
            }
            let Some((product, matrix, addons)) = catalog.get(&item.product_id) else { continue };
            priced.push((item, pricing::price_line(product, matrix, addons, &line_request(item))));
        }
        Ok(priced)
    }

    /// All lines or the first line's error.
    async fn price_strict(&self, cart: &CartSession) -> Result<Vec<PricedLine>> {
        self.price_items(&cart.items).await?.into_iter().map(|(_, line)| line).collect()
    }

    async fn view(&self, cart: CartSession) -> Result<CartView> {
        let mut lines = Vec::new();
        let mut unavailable = Vec::new();
        for (item, result) in self.price_items(&cart.items).await? {
            match result {
                Ok(line) => lines.push(line),
                Err(e) => unavailable.push(UnavailableLine {
                    line_id: item.line_id,
                    product_id: item.product_id,
                    kind: e.kind(),
                    message: e.to_string(),
                }),
            }
        }
        Ok(CartView { subtotal: pricing::subtotal(&lines), cart, lines, unavailable })
    }

    fn require_store(cart: &CartSession) -> Result<&StoreSummary> {
        match &cart.store {
            Some(store) if !cart.is_empty() => Ok(store),
            _ => Err(MarketplaceError::invalid_field("items", "Cart is empty")),
        }
    }

    pub async fn get_cart(&self, session_id: &str) -> Result<CartView> {
        let cart = self.load(session_id).await?;
        self.view(cart).await
    }

    pub async fn add_item(&self, session_id: &str, request: LineRequest) -> Result<CartView> {
        let mut cart = self.load(session_id).await?;
        let (product, matrix, addons) = self.catalog_entry(request.product_id).await?;
        let priced = pricing::price_line(&product, &matrix, &addons, &request)?;
        let store = self.store.store_summary(product.store_id).await?;

        // Lines are keyed by the catalog's spelling of each value so "m" and "M" merge.
        let item = CartItem::new(request.product_id, priced.selection, request.addons, request.quantity);
        let line_id = cart.add_item(store, item)?;
        let merged = cart.item(line_id)?;
        if merged.quantity != request.quantity {
            // Re-check stock against the combined quantity.
            pricing::price_line(&product, &matrix, &addons, &line_request(merged))?;
        }

        self.save(&mut cart).await?;
        tracing::info!(session = %session_id, product_id = %product.id, line_id = %line_id, "Added cart line");
        self.view(cart).await
    }

    pub async fn update_quantity(&self, session_id: &str, line_id: Uuid, quantity: u32) -> Result<CartView> {
        let mut cart = self.load(session_id).await?;
        cart.update_quantity(line_id, quantity)?;
        if quantity > 0 {
            let item = cart.item(line_id)?;
            let (product, matrix, addons) = self.catalog_entry(item.product_id).await?;
            pricing::price_line(&product, &matrix, &addons, &line_request(item))?;
        }
        self.save(&mut cart).await?;
        self.view(cart).await
    }

    pub async fn remove_item(&self, session_id: &str, line_id: Uuid) -> Result<CartView> {
        let mut cart = self.load(session_id).await?;
        cart.remove_item(line_id)?;
        self.save(&mut cart).await?;
        self.view(cart).await
    }

    pub async fn clear(&self, session_id: &str) -> Result<CartView> {
        let mut cart = self.load(session_id).await?;
        cart.clear();
        self.save(&mut cart).await?;
        self.view(cart).await
    }

    /// Check a code against the current cart and remember it if eligible.
    pub async fn apply_coupon(&self, session_id: &str, code: &str, customer_email: Option<&str>) -> Result<CouponPreview> {
        let code = CouponCode::parse(code)?;
        let mut cart = self.load(session_id).await?;
        let store_id = Self::require_store(&cart)?.id;
        let lines = self.price_strict(&cart).await?;
        let discount = self.discount_for(store_id, &code, &lines, Decimal::ZERO, customer_email).await?;
        let shipping_discount_at_quote = discount.coupon.as_ref().is_some_and(|c| c.discount_type == DiscountType::FreeShipping);

        cart.apply_coupon(code.clone());
        self.save(&mut cart).await?;
        tracing::info!(session = %session_id, code = %code, "Applied coupon");
        Ok(CouponPreview { code, discount, shipping_discount_at_quote, cart: self.view(cart).await? })
    }

    pub async fn remove_coupon(&self, session_id: &str) -> Result<CartView> {
        let mut cart = self.load(session_id).await?;
        cart.remove_coupon();
        self.save(&mut cart).await?;
        self.view(cart).await
    }

    async fn discount_for(
        &self,
        store_id: Uuid,
        code: &CouponCode,
        lines: &[PricedLine],
        shipping_cost: Decimal,
        customer_email: Option<&str>,
    ) -> Result<DiscountOutcome> {
        let coupon = self.store.coupon_by_code(store_id, code).await?;
        let customer = match (&coupon, customer_email) {
            (Some(c), Some(email)) => Some(self.store.customer_history(store_id, c.id, &customer_key(email)).await?),
            _ => None,
        };
        let ctx = CouponContext { store_id, now: Utc::now(), lines, shipping_cost, customer };
        pricing::evaluate(coupon.as_ref(), &ctx)
    }

    /// Price the cart for checkout: lines, shipping, coupon and tax.
    /// Every line must be purchasable; the first problem is returned.
    pub async fn quote(&self, session_id: &str, shipping_method_id: &str, customer_email: Option<&str>) -> Result<CartQuote> {
        let cart = self.load(session_id).await?;
        let store = Self::require_store(&cart)?.clone();
        let lines = self.price_strict(&cart).await?;
        let shipping_method = self.shipping.method(shipping_method_id).await?;

        let subtotal = pricing::subtotal(&lines);
        let discount = match &cart.coupon_code {
            Some(code) => self.discount_for(store.id, code, &lines, shipping_method.price, customer_email).await?,
            None => DiscountOutcome::none(),
        };
        let totals = pricing::assemble(subtotal, shipping_method.price, &discount, self.tax_rate, &self.currency);
        Ok(CartQuote { cart_id: cart.id, store, lines, shipping_method, discount, totals })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{AxisType, Coupon, OptionInput, Selection};
    use crate::shipping::FlatRateTable;
    use crate::store::InMemoryStore;
    use rust_decimal_macros::dec;

    async fn fixture(quantity: i32) -> (CartService, Arc<InMemoryStore>, StoreSummary, Product) {
        let store = Arc::new(InMemoryStore::new());
        let tenant = StoreSummary { id: Uuid::now_v7(), slug: "alpha".into(), name: "Alpha".into() };
        store.insert_store(&tenant).await.unwrap();
        let mut product = Product::create(tenant.id, "mug", "Mug", dec!(50)).unwrap();
        product.quantity = quantity;
        product.publish().unwrap();
        store.insert_product(&product).await.unwrap();
        let config = Config { tax_rate: TaxRate::new(dec!(0.1)).unwrap(), ..Config::default() };
        let service = CartService::new(store.clone(), Arc::new(FlatRateTable::default()), &config);
        (service, store, tenant, product)
    }

    fn request(product: &Product, quantity: u32) -> LineRequest {
        LineRequest { product_id: product.id, selection: Selection::new(), addons: vec![], quantity }
    }

    #[tokio::test]
    async fn test_add_merges_and_checks_combined_stock() {
        let (carts, _, _, product) = fixture(3).await;
        carts.add_item("s1", request(&product, 2)).await.unwrap();
        let view = carts.add_item("s1", request(&product, 1)).await.unwrap();
        assert_eq!(view.cart.items.len(), 1);
        assert_eq!(view.subtotal, dec!(150));

        let err = carts.add_item("s1", request(&product, 1)).await.unwrap_err();
        assert_eq!(err.kind(), "OUT_OF_STOCK");
        assert_eq!(carts.get_cart("s1").await.unwrap().cart.items[0].quantity, 3);
    }

    #[tokio::test]
    async fn test_selection_spelling_merges_lines() {
        let (carts, store, _, product) = fixture(0).await;
        let mut matrix = store.variant_matrix(product.id).await.unwrap();
        matrix.define_axis(product.variant_mode, AxisType::Size, vec![OptionInput::new("M")]).unwrap();
        matrix.combinations[0].quantity = 3;
        store.save_variant_matrix(&matrix).await.unwrap();

        let sized = |value: &str, quantity| LineRequest {
            product_id: product.id,
            selection: [(AxisType::Size, value.to_string())].into_iter().collect(),
            addons: vec![],
            quantity,
        };
        carts.add_item("s1", sized("m", 2)).await.unwrap();
        let view = carts.add_item("s1", sized("M", 1)).await.unwrap();
        assert_eq!(view.cart.items.len(), 1);
        assert_eq!(view.cart.items[0].quantity, 3);
        assert_eq!(view.cart.items[0].selection.get(&AxisType::Size).map(String::as_str), Some("M"));

        let err = carts.add_item("s1", sized("m", 1)).await.unwrap_err();
        assert_eq!(err.kind(), "OUT_OF_STOCK");
    }

    #[tokio::test]
    async fn test_free_shipping_preview_defers_to_quote() {
        let (carts, store, tenant, product) = fixture(5).await;
        store.insert_coupon(&Coupon::free_shipping(tenant.id, CouponCode::parse("SHIPFREE").unwrap())).await.unwrap();
        carts.add_item("s1", request(&product, 1)).await.unwrap();

        let preview = carts.apply_coupon("s1", "shipfree", None).await.unwrap();
        assert!(preview.shipping_discount_at_quote);
        assert_eq!(preview.discount.shipping_discount, Decimal::ZERO);

        let quote = carts.quote("s1", "standard", None).await.unwrap();
        assert_eq!(quote.discount.shipping_discount, dec!(8.99));
    }

    #[tokio::test]
    async fn test_archived_product_reported_unavailable() {
        let (carts, store, _, mut product) = fixture(3).await;
        carts.add_item("s1", request(&product, 1)).await.unwrap();
        product.archive();
        store.update_product(&product).await.unwrap();

        let view = carts.get_cart("s1").await.unwrap();
        assert!(view.lines.is_empty());
        assert_eq!(view.unavailable.len(), 1);
        assert_eq!(view.unavailable[0].kind, "NOT_FOUND");
        assert!(carts.quote("s1", "standard", None).await.is_err());
    }

    #[tokio::test]
    async fn test_quote_with_coupon() {
        let (carts, store, tenant, product) = fixture(5).await;
        store.insert_coupon(&Coupon::fixed_amount(tenant.id, CouponCode::parse("TEN").unwrap(), dec!(10))).await.unwrap();
        carts.add_item("s1", request(&product, 2)).await.unwrap();

        let preview = carts.apply_coupon("s1", " ten ", None).await.unwrap();
        assert_eq!(preview.discount.product_discount, dec!(10));

        let quote = carts.quote("s1", "standard", Some("shopper@example.com")).await.unwrap();
        assert_eq!(quote.totals.subtotal, dec!(100));
        assert_eq!(quote.totals.discount, dec!(10));
        assert_eq!(quote.totals.shipping, dec!(8.99));
        // (100 - 10 + 8.99) * 0.1 = 9.899
        assert_eq!(quote.totals.tax, dec!(9.90));
        assert_eq!(quote.totals.total, dec!(108.89));
    }

    #[tokio::test]
    async fn test_unknown_coupon_and_empty_cart() {
        let (carts, _, _, product) = fixture(5).await;
        assert_eq!(carts.apply_coupon("s1", "NOPE", None).await.unwrap_err().kind(), "VALIDATION");
        carts.add_item("s1", request(&product, 1)).await.unwrap();
        let err = carts.apply_coupon("s1", "NOPE", None).await.unwrap_err();
        assert!(matches!(err, MarketplaceError::CouponIneligible(crate::CouponRejection::InvalidCode)));
        assert_eq!(carts.quote("s1", "teleport", None).await.unwrap_err().kind(), "NOT_FOUND");
    }
}
