//! Value Objects for the marketplace

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{MarketplaceError, Result};

/// Round a monetary amount to cents, half-up.
pub fn round_cents(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// `amount * percent / 100`, rounded to cents.
/// Non-negative and representable in cents, the way prices are stored.
pub fn is_money_amount(amount: Decimal) -> bool {
    amount >= Decimal::ZERO && amount.normalize().scale() <= 2
}

pub fn percent_of(amount: Decimal, percent: Decimal) -> Decimal {
    round_cents(amount * percent / Decimal::ONE_HUNDRED)
}

/// SKU (Stock Keeping Unit) value object
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sku(String);

impl Sku {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into().trim().to_uppercase();
        if value.is_empty() { return Err(MarketplaceError::invalid_field("sku", "SKU must not be empty")); }
        if value.len() > 50 { return Err(MarketplaceError::invalid_field("sku", "SKU must be at most 50 characters")); }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl TryFrom<String> for Sku {
    type Error = MarketplaceError;
    fn try_from(value: String) -> Result<Self> { Self::new(value) }
}

impl From<Sku> for String {
    fn from(sku: Sku) -> Self { sku.0 }
}

impl fmt::Display for Sku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Store-scoped coupon code: uppercase letters, digits, `-` and `_`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CouponCode(String);

impl CouponCode {
    pub const MAX_LEN: usize = 32;

    pub fn parse(raw: &str) -> Result<Self> {
        let code = raw.trim().to_uppercase();
        if code.is_empty() {
            return Err(MarketplaceError::invalid_field("code", "Coupon code must not be empty"));
        }
        if code.len() > Self::MAX_LEN {
            return Err(MarketplaceError::invalid_field("code", "Coupon code is too long"));
        }
        if !code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-' || c == '_') {
            return Err(MarketplaceError::invalid_field(
                "code",
                "Coupon code may only contain letters, digits, '-' and '_'",
            ));
        }
        Ok(Self(code))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl TryFrom<String> for CouponCode {
    type Error = MarketplaceError;
    fn try_from(value: String) -> Result<Self> { Self::parse(&value) }
}

impl From<CouponCode> for String {
    fn from(code: CouponCode) -> Self { code.0 }
}

impl fmt::Display for CouponCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Money value object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money { amount: Decimal, currency: String }

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Self { Self { amount, currency: currency.to_uppercase() } }
    pub fn usd(amount: Decimal) -> Self { Self::new(amount, "USD") }
    pub fn amount(&self) -> Decimal { self.amount }
    pub fn currency(&self) -> &str { &self.currency }
    /// Integer minor units, as payment processors expect them.
    pub fn minor_units(&self) -> i64 {
        (round_cents(self.amount) * Decimal::ONE_HUNDRED).trunc().to_i64().unwrap_or(i64::MAX)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", round_cents(self.amount), self.currency)
    }
}

/// Flat regional tax rate, stored as a fraction (0.0875 for 8.75%).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct TaxRate(Decimal);

impl TaxRate {
    pub fn new(rate: Decimal) -> Result<Self> {
        if rate < Decimal::ZERO || rate >= Decimal::ONE {
            return Err(MarketplaceError::invalid_field("tax_rate", "Tax rate must be a fraction in [0, 1)"));
        }
        Ok(Self(rate))
    }
    pub fn zero() -> Self { Self(Decimal::ZERO) }
    pub fn rate(&self) -> Decimal { self.0 }
    pub fn tax_on(&self, base: Decimal) -> Decimal { round_cents(base * self.0) }
}

impl TryFrom<Decimal> for TaxRate {
    type Error = MarketplaceError;
    fn try_from(value: Decimal) -> Result<Self> { Self::new(value) }
}

impl From<TaxRate> for Decimal {
    fn from(rate: TaxRate) -> Self { rate.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_sku() { let sku = Sku::new("prod-001").unwrap(); assert_eq!(sku.as_str(), "PROD-001"); }

    #[test]
    fn test_money_amounts_are_whole_cents() {
        assert!(is_money_amount(dec!(12.50)));
        assert!(is_money_amount(dec!(12.5000)));
        assert!(!is_money_amount(dec!(12.505)));
        assert!(!is_money_amount(dec!(-1)));
    }

    #[test]
    fn test_minor_units() {
        assert_eq!(Money::usd(dec!(113.09)).minor_units(), 11309);
        assert_eq!(Money::usd(dec!(7)).minor_units(), 700);
    }

    #[test]
    fn test_round_cents_half_up() {
        assert_eq!(round_cents(dec!(7.4985)), dec!(7.50));
        assert_eq!(round_cents(dec!(9.099125)), dec!(9.10));
        assert_eq!(round_cents(dec!(0.005)), dec!(0.01));
        assert_eq!(round_cents(dec!(0.004)), dec!(0.00));
    }

    #[test]
    fn test_coupon_code_canonical() {
        assert_eq!(CouponCode::parse("  starter-5 ").unwrap().as_str(), "STARTER-5");
        assert!(CouponCode::parse("save 10").is_err());
        assert!(CouponCode::parse("").is_err());
        assert!(CouponCode::parse("€URO").is_err());
    }

    #[test]
    fn test_tax_rate() {
        let rate = TaxRate::new(dec!(0.0875)).unwrap();
        assert_eq!(rate.tax_on(dec!(103.99)), dec!(9.10));
        assert!(TaxRate::new(dec!(1.5)).is_err());
    }
}
