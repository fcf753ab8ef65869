//! Order total assembly.
//!
//! Order of operations is fixed: subtotal, shipping, discount, taxable base,
//! tax, total. Tax is charged on the discounted subtotal plus the discounted
//! shipping.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::coupon::DiscountOutcome;
use crate::domain::value_objects::{round_cents, Money, TaxRate};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub currency: String,
    pub subtotal: Decimal,
    pub shipping: Decimal,
    pub discount: Decimal,
    pub shipping_discount: Decimal,
    pub taxable_base: Decimal,
    pub tax_rate: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

impl OrderTotals {
    /// Amount to charge.
    pub fn charge(&self) -> Money { Money::new(self.total, &self.currency) }
}

/// Combine the priced cart into the final charge. Cash and card share this call.
pub fn assemble(subtotal: Decimal, shipping_cost: Decimal, discount: &DiscountOutcome, tax_rate: TaxRate, currency: &str) -> OrderTotals {
    let subtotal = round_cents(subtotal);
    let shipping = round_cents(shipping_cost);
    let product_discount = discount.product_discount.min(subtotal).max(Decimal::ZERO);
    let shipping_discount = discount.shipping_discount.min(shipping).max(Decimal::ZERO);

    let taxable_base = subtotal - product_discount + (shipping - shipping_discount);
    let tax = tax_rate.tax_on(taxable_base);
    OrderTotals {
        currency: currency.to_uppercase(),
        subtotal,
        shipping,
        discount: product_discount,
        shipping_discount,
        taxable_base,
        tax_rate: tax_rate.rate(),
        tax,
        total: taxable_base + tax,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_worked_example() {
        let discount = DiscountOutcome { coupon: None, product_discount: dec!(5.00), shipping_discount: dec!(0) };
        let rate = TaxRate::new(dec!(0.0875)).unwrap();
        let totals = assemble(dec!(100.00), dec!(8.99), &discount, rate, "usd");
        assert_eq!(totals.taxable_base, dec!(103.99));
        assert_eq!(totals.tax, dec!(9.10));
        assert_eq!(totals.total, dec!(113.09));
        assert_eq!(totals.charge().minor_units(), 11309);
        assert_eq!(totals.currency, "USD");
    }

    #[test]
    fn test_free_shipping_zeroes_shipping_only() {
        let discount = DiscountOutcome { coupon: None, product_discount: dec!(0), shipping_discount: dec!(8.99) };
        let totals = assemble(dec!(20), dec!(8.99), &discount, TaxRate::zero(), "USD");
        assert_eq!(totals.subtotal, dec!(20));
        assert_eq!(totals.total, dec!(20));
    }

    #[test]
    fn test_discount_never_exceeds_subtotal() {
        let discount = DiscountOutcome { coupon: None, product_discount: dec!(50), shipping_discount: dec!(0) };
        let totals = assemble(dec!(30), dec!(0), &discount, TaxRate::zero(), "USD");
        assert_eq!(totals.discount, dec!(30));
        assert_eq!(totals.total, dec!(0));
    }
}
