//! OpenSASE Marketplace
//!
//! Multi-tenant marketplace core: vendors run storefronts on a shared platform,
//! customers check out from one store at a time.
//!
//! ## Features
//! - Variant axes and the purchasable combination matrix
//! - Product add-ons with fixed and percentage pricing
//! - Cart line pricing, coupons and order totals
//! - Atomic inventory reservation at order confirmation
//! - Cash and card checkout over a JSON API

pub mod api;
pub mod config;
pub mod domain;
pub mod inventory;
pub mod payment;
pub mod pricing;
pub mod publisher;
pub mod services;
pub mod shipping;
pub mod store;

use serde::Serialize;
use thiserror::Error;

pub use domain::aggregates::StoreSummary;

// =============================================================================
// Error Types
// =============================================================================

/// Reason a coupon was refused, in the order the checks run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponRejection {
    InvalidCode,
    Expired,
    UsageLimitReached,
    CustomerLimitReached,
    MinPurchaseNotMet,
    NotFirstTimeCustomer,
    NotApplicable,
}

impl CouponRejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCode => "INVALID_CODE",
            Self::Expired => "EXPIRED",
            Self::UsageLimitReached => "USAGE_LIMIT_REACHED",
            Self::CustomerLimitReached => "CUSTOMER_LIMIT_REACHED",
            Self::MinPurchaseNotMet => "MIN_PURCHASE_NOT_MET",
            Self::NotFirstTimeCustomer => "NOT_FIRST_TIME_CUSTOMER",
            Self::NotApplicable => "NOT_APPLICABLE",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::InvalidCode => "This coupon code is not valid for this store",
            Self::Expired => "This coupon is not active right now",
            Self::UsageLimitReached => "This coupon has reached its usage limit",
            Self::CustomerLimitReached => "You have already used this coupon the maximum number of times",
            Self::MinPurchaseNotMet => "Your cart does not meet the minimum purchase for this coupon",
            Self::NotFirstTimeCustomer => "This coupon is only available on a first order",
            Self::NotApplicable => "This coupon does not apply to the items in your cart",
        }
    }
}

impl std::fmt::Display for CouponRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Error, Debug)]
pub enum MarketplaceError {
    #[error("{message}")]
    Validation { message: String, fields: Vec<String> },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{item} is out of stock (requested {requested}, available {available})")]
    OutOfStock { item: String, requested: u32, available: i32 },

    #[error("Insufficient stock for {target}: requested {requested}")]
    InsufficientStock { target: String, requested: u32 },

    #[error("Coupon rejected: {}", .0.message())]
    CouponIneligible(CouponRejection),

    #[error("Cart already contains items from {}", current.name)]
    DifferentStore { current: StoreSummary, requested: StoreSummary },

    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl MarketplaceError {
    pub fn validation(message: impl Into<String>, fields: Vec<String>) -> Self {
        Self::Validation { message: message.into(), fields }
    }

    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { message: message.into(), fields: vec![field.into()] }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound { entity, id: id.to_string() }
    }

    /// Stable machine-readable kind, used by the API layer to pick a status.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::OutOfStock { .. } => "OUT_OF_STOCK",
            Self::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            Self::CouponIneligible(_) => "COUPON_INELIGIBLE",
            Self::DifferentStore { .. } => "DIFFERENT_STORE",
            Self::PaymentFailed(_) => "PAYMENT_FAILED",
            Self::NotImplemented(_) => "NOT_IMPLEMENTED",
            Self::Storage(_) => "STORAGE",
        }
    }

    pub fn fields(&self) -> &[String] {
        match self {
            Self::Validation { fields, .. } => fields,
            _ => &[],
        }
    }
}

impl From<sqlx::Error> for MarketplaceError {
    fn from(e: sqlx::Error) -> Self {
        MarketplaceError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for MarketplaceError {
    fn from(e: serde_json::Error) -> Self {
        MarketplaceError::Storage(e.to_string())
    }
}

impl From<validator::ValidationErrors> for MarketplaceError {
    fn from(e: validator::ValidationErrors) -> Self {
        let mut fields: Vec<String> = e.field_errors().keys().map(|k| k.to_string()).collect();
        fields.sort();
        MarketplaceError::Validation { message: format!("Invalid request: {}", fields.join(", ")), fields }
    }
}

pub type Result<T> = std::result::Result<T, MarketplaceError>;
