//! Pricing engine: line pricing, coupon resolution and order totals.

pub mod coupon;
pub mod line;
pub mod totals;

pub use coupon::{evaluate, CouponContext, CustomerHistory, DiscountOutcome};
pub use line::{price_line, subtotal, AddonCharge, LineRequest, PricedLine};
pub use totals::{assemble, OrderTotals};
