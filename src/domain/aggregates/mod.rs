//! Aggregates module
pub mod addon;
pub mod cart;
pub mod coupon;
pub mod order;
pub mod product;
pub mod variant;

pub use addon::{AddonField, AddonOption, AddonPricing, AddonSelection, ProductAddon};
pub use cart::{CartItem, CartSession, StoreSummary};
pub use coupon::{Coupon, DiscountType};
pub use order::{Address, AppliedCoupon, Customer, Order, OrderDraft, OrderItem, OrderStatus, PaymentMethod, PaymentStatus};
pub use product::{Product, ProductStatus, VariantMode};
pub use variant::{
    AxisType, CombinationKey, CombinationPatch, OptionInput, RegenerationReport, ResolvedVariant, Selection,
    VariantCombination, VariantMatrix, VariantOption,
};
