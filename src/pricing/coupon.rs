//! Coupon eligibility and discount computation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::line::{subtotal, PricedLine};
use crate::domain::aggregates::{AppliedCoupon, Coupon, DiscountType};
use crate::domain::value_objects::percent_of;
use crate::{CouponRejection, MarketplaceError, Result};

/// What the store knows about the customer redeeming the coupon.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CustomerHistory {
    /// Times this customer has redeemed this coupon.
    pub redemptions: u32,
    /// Orders this customer has placed with the store.
    pub prior_orders: u32,
}

pub struct CouponContext<'a> {
    pub store_id: Uuid,
    pub now: DateTime<Utc>,
    pub lines: &'a [PricedLine],
    pub shipping_cost: Decimal,
    /// `None` when the customer is not known yet (an anonymous cart quote).
    pub customer: Option<CustomerHistory>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscountOutcome {
    pub coupon: Option<AppliedCoupon>,
    /// Taken off the product subtotal.
    pub product_discount: Decimal,
    /// Taken off the shipping cost.
    pub shipping_discount: Decimal,
}

impl DiscountOutcome {
    pub fn none() -> Self { Self::default() }
}

fn reject(reason: CouponRejection) -> MarketplaceError {
    MarketplaceError::CouponIneligible(reason)
}

/// Run the eligibility checks in order and compute the discount.
/// The first failing check decides the rejection reason.
pub fn evaluate(coupon: Option<&Coupon>, ctx: &CouponContext<'_>) -> Result<DiscountOutcome> {
    let coupon = match coupon {
        Some(c) if c.store_id == ctx.store_id && c.active => c,
        _ => return Err(reject(CouponRejection::InvalidCode)),
    };

    let not_started = coupon.starts_at.is_some_and(|start| ctx.now < start);
    let ended = coupon.ends_at.is_some_and(|end| ctx.now > end);
    if not_started || ended {
        return Err(reject(CouponRejection::Expired));
    }

    if coupon.usage_limit.is_some_and(|limit| coupon.times_used >= limit) {
        return Err(reject(CouponRejection::UsageLimitReached));
    }

    if let (Some(limit), Some(history)) = (coupon.per_customer_limit, ctx.customer) {
        if history.redemptions >= limit {
            return Err(reject(CouponRejection::CustomerLimitReached));
        }
    }

    let cart_subtotal = subtotal(ctx.lines);
    if coupon.min_purchase.is_some_and(|min| cart_subtotal < min) {
        return Err(reject(CouponRejection::MinPurchaseNotMet));
    }

    if coupon.first_time_only && ctx.customer.is_some_and(|h| h.prior_orders > 0) {
        return Err(reject(CouponRejection::NotFirstTimeCustomer));
    }

    if ctx.lines.iter().any(|l| coupon.excluded_products.contains(&l.product_id)) {
        return Err(reject(CouponRejection::NotApplicable));
    }
    let eligible_subtotal = if coupon.has_inclusion_rules() {
        let eligible: Decimal = ctx.lines.iter()
            .filter(|l| coupon.includes(l.product_id, l.category_id))
            .map(|l| l.line_total)
            .sum();
        if !ctx.lines.iter().any(|l| coupon.includes(l.product_id, l.category_id)) {
            return Err(reject(CouponRejection::NotApplicable));
        }
        eligible
    } else {
        cart_subtotal
    };

    let applied = AppliedCoupon { coupon_id: coupon.id, code: coupon.code.clone(), discount_type: coupon.discount_type };
    let outcome = match coupon.discount_type {
        DiscountType::Percentage => {
            let raw = percent_of(eligible_subtotal, coupon.value);
            let capped = coupon.max_discount.map_or(raw, |cap| raw.min(cap));
            DiscountOutcome { coupon: Some(applied), product_discount: capped, shipping_discount: Decimal::ZERO }
        }
        DiscountType::FixedAmount => DiscountOutcome {
            coupon: Some(applied),
            product_discount: coupon.value.min(eligible_subtotal),
            shipping_discount: Decimal::ZERO,
        },
        DiscountType::FreeShipping => DiscountOutcome {
            coupon: Some(applied),
            product_discount: Decimal::ZERO,
            shipping_discount: ctx.shipping_cost,
        },
    };
    Ok(outcome)
}
