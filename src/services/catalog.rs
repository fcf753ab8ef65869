//! Vendor-side catalog operations: stores, products, variant axes, add-ons,
//! coupons and restocking.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::aggregates::product::is_valid_slug;
use crate::domain::aggregates::{
    AxisType, CombinationPatch, Coupon, OptionInput, Product, ProductAddon, RegenerationReport, StoreSummary,
    VariantCombination, VariantMatrix, VariantMode,
};
use crate::domain::events::{DomainEvent, ProductEvent};
use crate::domain::value_objects::{is_money_amount, Sku};
use crate::inventory::{Inventory, StockTarget};
use crate::publisher::EventPublisher;
use crate::store::MarketplaceStore;
use crate::{MarketplaceError, Result};

/// Everything needed to list a product.
#[derive(Clone, Debug, Deserialize)]
pub struct NewProduct {
    pub store_id: Uuid,
    pub slug: String,
    pub name: String,
    pub base_price: Decimal,
    #[serde(default)]
    pub compare_at_price: Option<Decimal>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub category_id: Option<Uuid>,
    #[serde(default = "default_track")]
    pub track_inventory: bool,
    #[serde(default)]
    pub quantity: i32,
    #[serde(default)]
    pub variant_mode: VariantMode,
    /// List immediately instead of starting as a draft.
    #[serde(default)]
    pub publish: bool,
}

fn default_track() -> bool { true }

#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn MarketplaceStore>,
    inventory: Inventory,
    publisher: EventPublisher,
}

impl CatalogService {
    pub fn new(store: Arc<dyn MarketplaceStore>, inventory: Inventory, publisher: EventPublisher) -> Self {
        Self { store, inventory, publisher }
    }

    pub async fn create_store(&self, slug: &str, name: &str) -> Result<StoreSummary> {
        let slug = slug.trim().to_lowercase();
        let mut invalid = Vec::new();
        if !is_valid_slug(&slug) { invalid.push("slug".to_string()); }
        if name.trim().is_empty() { invalid.push("name".to_string()); }
        if !invalid.is_empty() {
            return Err(MarketplaceError::validation(format!("Invalid store: {}", invalid.join(", ")), invalid));
        }
        let summary = StoreSummary { id: Uuid::now_v7(), slug, name: name.trim().to_string() };
        self.store.insert_store(&summary).await?;
        tracing::info!(store_id = %summary.id, slug = %summary.slug, "Created store");
        Ok(summary)
    }

    pub async fn create_product(&self, request: NewProduct) -> Result<Product> {
        self.store.store_summary(request.store_id).await?;
        let mut product = Product::create(request.store_id, request.slug.trim(), request.name.trim(), request.base_price)?;

        let mut invalid = Vec::new();
        if request.quantity < 0 { invalid.push("quantity".to_string()); }
        if request.compare_at_price.is_some_and(|p| !is_money_amount(p)) { invalid.push("compare_at_price".to_string()); }
        if !invalid.is_empty() {
            return Err(MarketplaceError::validation(format!("Invalid product: {}", invalid.join(", ")), invalid));
        }
        product.sku = request.sku.filter(|s| !s.trim().is_empty()).map(Sku::new).transpose()?;
        product.compare_at_price = request.compare_at_price;
        product.category_id = request.category_id;
        product.track_inventory = request.track_inventory;
        product.quantity = request.quantity;
        product.variant_mode = request.variant_mode;
        if request.publish {
            product.publish()?;
        }

        self.store.insert_product(&product).await?;
        tracing::info!(product_id = %product.id, store_id = %product.store_id, status = product.status.as_str(), "Created product");
        self.publisher.publish(product.take_events()).await;
        Ok(product)
    }

    pub async fn product(&self, id: Uuid) -> Result<Product> {
        self.store.product(id).await
    }

    pub async fn publish_product(&self, id: Uuid) -> Result<Product> {
        let mut product = self.store.product(id).await?;
        product.publish()?;
        self.store.update_product(&product).await?;
        self.publisher.publish(product.take_events()).await;
        Ok(product)
    }

    pub async fn archive_product(&self, id: Uuid) -> Result<Product> {
        let mut product = self.store.product(id).await?;
        product.archive();
        self.store.update_product(&product).await?;
        tracing::info!(product_id = %id, "Archived product");
        self.publisher.publish(product.take_events()).await;
        Ok(product)
    }

    /// Replace one axis' values and regenerate the combination matrix.
    pub async fn define_axis(&self, product_id: Uuid, axis: AxisType, values: Vec<OptionInput>) -> Result<(RegenerationReport, VariantMatrix)> {
        let product = self.store.product(product_id).await?;
        let mut matrix = self.store.variant_matrix(product_id).await?;
        let report = matrix.define_axis(product.variant_mode, axis, values)?;
        self.store.save_variant_matrix(&matrix).await?;
        tracing::info!(
            product_id = %product_id, axis = axis.as_str(),
            created = report.created, preserved = report.preserved, restored = report.restored, retired = report.retired,
            "Regenerated variant combinations"
        );
        self.publisher.publish(vec![DomainEvent::Product(ProductEvent::CombinationsRegenerated {
            product_id,
            created: report.created,
            retired: report.retired,
        })]).await;
        Ok((report, matrix))
    }

    /// Every combination ever generated, retired ones included.
    pub async fn combinations(&self, product_id: Uuid) -> Result<Vec<VariantCombination>> {
        let mut combinations = self.store.variant_matrix(product_id).await?.combinations;
        combinations.sort_by_key(|c| c.sort_order);
        Ok(combinations)
    }

    pub async fn update_combination(&self, id: Uuid, patch: &CombinationPatch) -> Result<VariantCombination> {
        let mut combination = self.store.combination(id).await?;
        combination.apply(patch)?;
        self.store.update_combination(&combination).await?;
        tracing::info!(combination_id = %id, key = %combination.key, "Updated combination");
        Ok(combination)
    }

    pub async fn addons(&self, product_id: Uuid) -> Result<Vec<ProductAddon>> {
        self.store.product(product_id).await?;
        self.store.addons(product_id).await
    }

    pub async fn add_addon(&self, addon: ProductAddon) -> Result<ProductAddon> {
        addon.validate()?;
        self.store.product(addon.product_id).await?;
        self.store.insert_addon(&addon).await?;
        tracing::info!(addon_id = %addon.id, product_id = %addon.product_id, field = addon.field.name(), "Added product add-on");
        Ok(addon)
    }

    pub async fn create_coupon(&self, coupon: Coupon) -> Result<Coupon> {
        coupon.validate()?;
        self.store.store_summary(coupon.store_id).await?;
        self.store.insert_coupon(&coupon).await?;
        tracing::info!(coupon_id = %coupon.id, code = %coupon.code, store_id = %coupon.store_id, "Created coupon");
        Ok(coupon)
    }

    pub async fn restock(&self, target: StockTarget, quantity: u32) -> Result<i32> {
        let (on_hand, event) = self.inventory.restock(target, quantity).await?;
        self.publisher.publish(vec![event]).await;
        Ok(on_hand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{AddonField, AddonPricing, ProductStatus};
    use crate::domain::value_objects::CouponCode;
    use crate::store::InMemoryStore;
    use rust_decimal_macros::dec;

    fn service() -> CatalogService {
        let store: Arc<dyn MarketplaceStore> = Arc::new(InMemoryStore::new());
        CatalogService::new(store.clone(), Inventory::new(store), EventPublisher::disabled())
    }

    fn new_product(store_id: Uuid) -> NewProduct {
        NewProduct {
            store_id, slug: "tee".into(), name: "Tee".into(), base_price: dec!(20), compare_at_price: None,
            sku: Some("tee-1".into()), category_id: None, track_inventory: true, quantity: 4,
            variant_mode: VariantMode::Combinations, publish: true,
        }
    }

    #[tokio::test]
    async fn test_product_lifecycle() {
        let catalog = service();
        let store = catalog.create_store("Alpha", "Alpha Goods").await.unwrap();
        assert_eq!(store.slug, "alpha");

        let product = catalog.create_product(new_product(store.id)).await.unwrap();
        assert_eq!(product.status, ProductStatus::Active);
        assert_eq!(product.sku.as_ref().map(|s| s.as_str()), Some("TEE-1"));

        let archived = catalog.archive_product(product.id).await.unwrap();
        assert_eq!(archived.status, ProductStatus::Archived);
        assert_eq!(catalog.product(product.id).await.unwrap().status, ProductStatus::Archived);
    }

    #[tokio::test]
    async fn test_product_for_unknown_store() {
        let catalog = service();
        let err = catalog.create_product(new_product(Uuid::now_v7())).await.unwrap_err();
        assert_eq!(err.kind(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_axes_and_combination_edits() {
        let catalog = service();
        let store = catalog.create_store("alpha", "Alpha").await.unwrap();
        let product = catalog.create_product(new_product(store.id)).await.unwrap();

        let (report, _) = catalog.define_axis(product.id, AxisType::Size, vec![OptionInput::new("S"), OptionInput::new("M")]).await.unwrap();
        assert_eq!(report.created, 2);
        let (report, _) = catalog.define_axis(product.id, AxisType::Color, vec![OptionInput::new("Red"), OptionInput::new("Blue")]).await.unwrap();
        assert_eq!(report.created, 4);

        let combinations = catalog.combinations(product.id).await.unwrap();
        assert_eq!(combinations.iter().filter(|c| c.is_live()).count(), 4);

        let target = combinations.iter().find(|c| c.is_live()).unwrap();
        let patch = CombinationPatch { price: Some(dec!(25)), quantity: Some(3), ..Default::default() };
        let updated = catalog.update_combination(target.id, &patch).await.unwrap();
        assert_eq!(updated.price, Some(dec!(25)));
        assert_eq!(catalog.restock(StockTarget::Combination(target.id), 2).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_invalid_addon_and_coupon_rejected() {
        let catalog = service();
        let store = catalog.create_store("alpha", "Alpha").await.unwrap();
        let product = catalog.create_product(new_product(store.id)).await.unwrap();

        let select = ProductAddon::new(product.id, "Wrap", AddonField::Select { options: vec![] }, AddonPricing::Fixed { amount: dec!(2) });
        assert_eq!(catalog.add_addon(select).await.unwrap_err().kind(), "VALIDATION");

        let coupon = Coupon::percentage(store.id, CouponCode::parse("HALF").unwrap(), dec!(150));
        assert_eq!(catalog.create_coupon(coupon).await.unwrap_err().kind(), "VALIDATION");
        let coupon = Coupon::percentage(store.id, CouponCode::parse("HALF").unwrap(), dec!(50));
        assert!(catalog.create_coupon(coupon).await.is_ok());
    }
}
