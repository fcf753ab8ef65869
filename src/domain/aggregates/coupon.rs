//! Coupon Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::{is_money_amount, CouponCode};
use crate::{MarketplaceError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType { Percentage, FixedAmount, FreeShipping }

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Percentage => "PERCENTAGE", Self::FixedAmount => "FIXED_AMOUNT", Self::FreeShipping => "FREE_SHIPPING" }
    }
    pub fn parse(s: &str) -> Option<Self> {
        match s { "PERCENTAGE" => Some(Self::Percentage), "FIXED_AMOUNT" => Some(Self::FixedAmount), "FREE_SHIPPING" => Some(Self::FreeShipping), _ => None }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: Uuid,
    pub store_id: Uuid,
    pub code: CouponCode,
    pub discount_type: DiscountType,
    /// Percent for PERCENTAGE, currency amount for FIXED_AMOUNT, ignored for FREE_SHIPPING.
    pub value: Decimal,
    #[serde(default)]
    pub min_purchase: Option<Decimal>,
    #[serde(default)]
    pub max_discount: Option<Decimal>,
    #[serde(default)]
    pub usage_limit: Option<u32>,
    #[serde(default)]
    pub times_used: u32,
    #[serde(default)]
    pub per_customer_limit: Option<u32>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    pub active: bool,
    #[serde(default)]
    pub applicable_products: Vec<Uuid>,
    #[serde(default)]
    pub applicable_categories: Vec<Uuid>,
    #[serde(default)]
    pub excluded_products: Vec<Uuid>,
    #[serde(default)]
    pub first_time_only: bool,
}

impl Coupon {
    pub fn new(store_id: Uuid, code: CouponCode, discount_type: DiscountType, value: Decimal) -> Self {
        Self {
            id: Uuid::now_v7(), store_id, code, discount_type, value, min_purchase: None, max_discount: None,
            usage_limit: None, times_used: 0, per_customer_limit: None, starts_at: None, ends_at: None, active: true,
            applicable_products: vec![], applicable_categories: vec![], excluded_products: vec![], first_time_only: false,
        }
    }

    pub fn percentage(store_id: Uuid, code: CouponCode, percent: Decimal) -> Self {
        Self::new(store_id, code, DiscountType::Percentage, percent)
    }

    pub fn fixed_amount(store_id: Uuid, code: CouponCode, amount: Decimal) -> Self {
        Self::new(store_id, code, DiscountType::FixedAmount, amount)
    }

    pub fn free_shipping(store_id: Uuid, code: CouponCode) -> Self {
        Self::new(store_id, code, DiscountType::FreeShipping, Decimal::ZERO)
    }

    /// Write-time invariants.
    pub fn validate(&self) -> Result<()> {
        let mut invalid = Vec::new();
        if !is_money_amount(self.value) { invalid.push("value"); }
        if self.discount_type == DiscountType::Percentage && self.value > Decimal::ONE_HUNDRED { invalid.push("value"); }
        if self.min_purchase.is_some_and(|m| !is_money_amount(m)) { invalid.push("min_purchase"); }
        if self.max_discount.is_some_and(|m| !is_money_amount(m)) { invalid.push("max_discount"); }
        if self.usage_limit == Some(0) { invalid.push("usage_limit"); }
        if self.per_customer_limit == Some(0) { invalid.push("per_customer_limit"); }
        if let (Some(start), Some(end)) = (self.starts_at, self.ends_at) {
            if end <= start { invalid.push("ends_at"); }
        }
        invalid.dedup();
        if invalid.is_empty() {
            Ok(())
        } else {
            let fields: Vec<String> = invalid.into_iter().map(String::from).collect();
            Err(MarketplaceError::validation(format!("Invalid coupon {}: {}", self.code, fields.join(", ")), fields))
        }
    }

    pub fn has_inclusion_rules(&self) -> bool {
        !self.applicable_products.is_empty() || !self.applicable_categories.is_empty()
    }

    pub fn includes(&self, product_id: Uuid, category_id: Option<Uuid>) -> bool {
        self.applicable_products.contains(&product_id)
            || category_id.is_some_and(|c| self.applicable_categories.contains(&c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn code(s: &str) -> CouponCode { CouponCode::parse(s).unwrap() }

    #[test]
    fn test_percentage_cap() {
        let c = Coupon::percentage(Uuid::now_v7(), code("HALF"), dec!(100));
        assert!(c.validate().is_ok());
        let c = Coupon::percentage(Uuid::now_v7(), code("TOO-MUCH"), dec!(100.01));
        assert_eq!(c.validate().unwrap_err().fields(), &["value".to_string()]);
    }

    #[test]
    fn test_date_window_order() {
        let now = Utc::now();
        let mut c = Coupon::fixed_amount(Uuid::now_v7(), code("WINDOW"), dec!(5));
        c.starts_at = Some(now);
        c.ends_at = Some(now);
        assert!(c.validate().is_err());
        c.ends_at = Some(now + Duration::days(1));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_inclusion() {
        let product = Uuid::now_v7();
        let category = Uuid::now_v7();
        let mut c = Coupon::free_shipping(Uuid::now_v7(), code("SHIP"));
        assert!(!c.has_inclusion_rules());
        c.applicable_categories.push(category);
        assert!(c.includes(Uuid::now_v7(), Some(category)));
        assert!(!c.includes(product, None));
    }
}
