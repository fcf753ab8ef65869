//! Product Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::events::{DomainEvent, ProductEvent};
use crate::domain::value_objects::{is_money_amount, Sku};
use crate::{MarketplaceError, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub store_id: Uuid,
    pub slug: String,
    pub name: String,
    pub sku: Option<Sku>,
    pub category_id: Option<Uuid>,
    pub base_price: Decimal,
    pub compare_at_price: Option<Decimal>,
    pub track_inventory: bool,
    /// Stock for products without variant axes.
    pub quantity: i32,
    pub status: ProductStatus,
    pub variant_mode: VariantMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) events: Vec<DomainEvent>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductStatus { #[default] Draft, Active, OutOfStock, Archived }

/// Legacy products carry a single option axis; combination products any number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariantMode { Legacy, #[default] Combinations }

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Draft => "DRAFT", Self::Active => "ACTIVE", Self::OutOfStock => "OUT_OF_STOCK", Self::Archived => "ARCHIVED" }
    }
    pub fn parse(s: &str) -> Option<Self> {
        match s { "DRAFT" => Some(Self::Draft), "ACTIVE" => Some(Self::Active), "OUT_OF_STOCK" => Some(Self::OutOfStock), "ARCHIVED" => Some(Self::Archived), _ => None }
    }
}

impl VariantMode {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Legacy => "LEGACY", Self::Combinations => "COMBINATIONS" }
    }
    pub fn parse(s: &str) -> Option<Self> {
        match s { "LEGACY" => Some(Self::Legacy), "COMBINATIONS" => Some(Self::Combinations), _ => None }
    }
}

/// Lowercase ASCII letters, digits and single hyphens.
pub fn is_valid_slug(slug: &str) -> bool {
    !slug.is_empty()
        && slug.len() <= 120
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

impl Product {
    pub fn create(store_id: Uuid, slug: impl Into<String>, name: impl Into<String>, base_price: Decimal) -> Result<Self> {
        let slug = slug.into();
        let name = name.into();
        let mut invalid = Vec::new();
        if !is_valid_slug(&slug) { invalid.push("slug".to_string()); }
        if name.trim().is_empty() { invalid.push("name".to_string()); }
        if !is_money_amount(base_price) { invalid.push("base_price".to_string()); }
        if !invalid.is_empty() {
            return Err(MarketplaceError::validation(format!("Invalid product: {}", invalid.join(", ")), invalid));
        }
        let id = Uuid::now_v7();
        let now = Utc::now();
        let mut product = Self {
            id, store_id, slug, name, sku: None, category_id: None, base_price, compare_at_price: None,
            track_inventory: true, quantity: 0, status: ProductStatus::Draft, variant_mode: VariantMode::Combinations,
            created_at: now, updated_at: now, events: vec![],
        };
        product.raise_event(DomainEvent::Product(ProductEvent::Created { product_id: id, store_id }));
        Ok(product)
    }

    pub fn is_purchasable(&self) -> bool { self.status == ProductStatus::Active }

    /// Drafts and archived products are invisible to shoppers.
    pub fn ensure_purchasable(&self) -> Result<()> {
        match self.status {
            ProductStatus::Active => Ok(()),
            ProductStatus::OutOfStock => Err(MarketplaceError::OutOfStock { item: self.name.clone(), requested: 1, available: 0 }),
            ProductStatus::Draft | ProductStatus::Archived => Err(MarketplaceError::not_found("product", self.id)),
        }
    }

    pub fn publish(&mut self) -> Result<()> {
        if self.name.trim().is_empty() { return Err(MarketplaceError::invalid_field("name", "Missing name")); }
        self.status = ProductStatus::Active;
        self.touch();
        self.raise_event(DomainEvent::Product(ProductEvent::Published { product_id: self.id }));
        Ok(())
    }

    pub fn archive(&mut self) {
        self.status = ProductStatus::Archived;
        self.touch();
        self.raise_event(DomainEvent::Product(ProductEvent::Archived { product_id: self.id }));
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}
