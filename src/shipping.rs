//! Flat-rate shipping table.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{MarketplaceError, Result};

/// A shipping method option.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShippingMethod {
    pub id: String,
    pub name: String,
    pub price: Decimal,
    pub min_delivery_days: u32,
    pub max_delivery_days: u32,
}

impl ShippingMethod {
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: Decimal, min_days: u32, max_days: u32) -> Self {
        Self { id: id.into(), name: name.into(), price, min_delivery_days: min_days, max_delivery_days: max_days }
    }

    pub fn delivery_estimate(&self) -> String {
        match (self.min_delivery_days, self.max_delivery_days) {
            (1, 1) => "1 day".to_string(),
            (min, max) if min == max => format!("{} days", min),
            (min, max) => format!("{}-{} days", min, max),
        }
    }

    pub fn is_free(&self) -> bool { self.price.is_zero() }
}

/// Source of shipping rates.
#[async_trait]
pub trait ShippingRates: Send + Sync {
    async fn methods(&self) -> Result<Vec<ShippingMethod>>;

    async fn method(&self, id: &str) -> Result<ShippingMethod> {
        self.methods().await?
            .into_iter()
            .find(|m| m.id == id)
            .ok_or_else(|| MarketplaceError::not_found("shipping method", id))
    }

    /// Rates for a destination ZIP.
    async fn quote(&self, zip: &str) -> Result<Vec<ShippingMethod>>;
}

/// US ZIP: `12345` or `12345-6789`.
pub fn is_valid_zip(zip: &str) -> bool {
    let digits = |s: &str, n: usize| s.len() == n && s.chars().all(|c| c.is_ascii_digit());
    match zip.split_once('-') {
        Some((head, tail)) => digits(head, 5) && digits(tail, 4),
        None => digits(zip, 5),
    }
}

#[derive(Clone, Debug)]
pub struct FlatRateTable {
    methods: Vec<ShippingMethod>,
}

impl FlatRateTable {
    pub fn new(methods: Vec<ShippingMethod>) -> Self { Self { methods } }
}

impl Default for FlatRateTable {
    fn default() -> Self {
        Self::new(vec![
            ShippingMethod::new("standard", "Standard", Decimal::new(899, 2), 5, 7),
            ShippingMethod::new("express", "Express", Decimal::new(1599, 2), 2, 3),
            ShippingMethod::new("overnight", "Overnight", Decimal::new(2999, 2), 1, 1),
        ])
    }
}

#[async_trait]
impl ShippingRates for FlatRateTable {
    async fn methods(&self) -> Result<Vec<ShippingMethod>> {
        Ok(self.methods.clone())
    }

    async fn quote(&self, zip: &str) -> Result<Vec<ShippingMethod>> {
        let zip = zip.trim();
        if !is_valid_zip(zip) {
            return Err(MarketplaceError::invalid_field("zip", "ZIP code must look like 12345 or 12345-6789"));
        }
        Ok(self.methods.clone())
    }
}
