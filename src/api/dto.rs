//! Request bodies. Shape checks run through `validator` before a request
//! reaches the services; business rules stay in the domain.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{
    Address, AddonField, AddonPricing, AddonSelection, AxisType, Coupon, Customer, DiscountType, OptionInput,
    ProductAddon, Selection,
};
use crate::domain::value_objects::CouponCode;
use crate::payment::IntentStatus;
use crate::pricing::LineRequest;
use crate::services::{CheckoutRequest, PaymentEvent};
use crate::shipping::ShippingMethod;
use crate::{MarketplaceError, Result};

#[derive(Debug, Deserialize, Validate)]
pub struct CreateStoreRequest {
    #[validate(length(min = 1, max = 120))]
    pub slug: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DefineAxisRequest {
    pub axis: AxisType,
    #[validate(length(max = 100))]
    pub values: Vec<OptionInput>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateAddonRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub field: AddonField,
    pub pricing: AddonPricing,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub allow_multiple: bool,
    #[serde(default)]
    pub max_quantity: Option<u32>,
    #[serde(default)]
    pub sort_order: i32,
}

impl CreateAddonRequest {
    pub fn into_addon(self, product_id: Uuid) -> ProductAddon {
        ProductAddon {
            description: self.description.filter(|d| !d.trim().is_empty()),
            required: self.required,
            allow_multiple: self.allow_multiple,
            max_quantity: self.max_quantity,
            sort_order: self.sort_order,
            ..ProductAddon::new(product_id, self.name.trim(), self.field, self.pricing)
        }
    }
}

fn active_default() -> bool { true }

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCouponRequest {
    pub store_id: Uuid,
    #[validate(length(min = 1, max = 32))]
    pub code: String,
    pub discount_type: DiscountType,
    #[serde(default)]
    pub value: Decimal,
    #[serde(default)]
    pub min_purchase: Option<Decimal>,
    #[serde(default)]
    pub max_discount: Option<Decimal>,
    #[serde(default)]
    pub usage_limit: Option<u32>,
    #[serde(default)]
    pub per_customer_limit: Option<u32>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default = "active_default")]
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

impl CreateCouponRequest {
    pub fn into_coupon(self) -> Result<Coupon> {
        let code = CouponCode::parse(&self.code)?;
        Ok(Coupon {
            min_purchase: self.min_purchase,
            max_discount: self.max_discount,
            usage_limit: self.usage_limit,
            per_customer_limit: self.per_customer_limit,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            active: self.active,
            applicable_products: self.applicable_products,
            applicable_categories: self.applicable_categories,
            excluded_products: self.excluded_products,
            first_time_only: self.first_time_only,
            ..Coupon::new(self.store_id, code, self.discount_type, self.value)
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RestockRequest {
    #[validate(range(min = 1, max = 1000000))]
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    #[serde(default)]
    pub selection: Selection,
    #[serde(default)]
    pub addons: Vec<AddonSelection>,
    #[validate(range(min = 1, max = 999))]
    pub quantity: u32,
}

impl From<AddToCartRequest> for LineRequest {
    fn from(r: AddToCartRequest) -> Self {
        LineRequest { product_id: r.product_id, selection: r.selection, addons: r.addons, quantity: r.quantity }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateQuantityRequest {
    /// Zero removes the line.
    #[validate(range(max = 999))]
    pub quantity: u32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ApplyCouponRequest {
    #[validate(length(min = 1, max = 32))]
    pub code: String,
    #[serde(default)]
    #[validate(email)]
    pub customer_email: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct QuoteRequest {
    #[validate(length(min = 1, max = 64))]
    pub shipping_method_id: String,
    #[serde(default)]
    #[validate(email)]
    pub customer_email: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutBody {
    #[validate(length(min = 1, max = 128))]
    pub session_id: String,
    #[validate(length(min = 1, max = 64))]
    pub shipping_method_id: String,
    #[validate(email)]
    pub customer_email: String,
    #[serde(default)]
    #[validate(length(max = 200))]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    #[serde(default)]
    pub shipping_address: Option<Address>,
}

impl From<CheckoutBody> for CheckoutRequest {
    fn from(b: CheckoutBody) -> Self {
        CheckoutRequest {
            session_id: b.session_id,
            shipping_method_id: b.shipping_method_id,
            customer: Customer { email: b.customer_email, name: b.customer_name, customer_id: b.customer_id },
            shipping_address: b.shipping_address,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfirmCardRequest {
    pub order_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PaymentWebhook {
    #[validate(length(min = 1, max = 255))]
    pub event_id: String,
    #[validate(length(min = 1, max = 255))]
    pub intent_id: String,
    pub status: String,
}

impl TryFrom<PaymentWebhook> for PaymentEvent {
    type Error = MarketplaceError;
    fn try_from(w: PaymentWebhook) -> Result<Self> {
        let status = IntentStatus::parse(&w.status)
            .ok_or_else(|| MarketplaceError::invalid_field("status", format!("Unknown payment status {:?}", w.status)))?;
        Ok(PaymentEvent { event_id: w.event_id, intent_id: w.intent_id, status })
    }
}

#[derive(Debug, Deserialize)]
pub struct ZipQuery {
    pub zip: String,
}

#[derive(Debug, Serialize)]
pub struct ShippingMethodView {
    #[serde(flatten)]
    pub method: ShippingMethod,
    pub estimated_delivery: String,
}

impl From<ShippingMethod> for ShippingMethodView {
    fn from(method: ShippingMethod) -> Self {
        Self { estimated_delivery: method.delivery_estimate(), method }
    }
}
