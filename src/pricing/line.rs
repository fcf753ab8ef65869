//! Cart line pricing.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::addon::{compute_addon_contribution, validate_selections};
use crate::domain::aggregates::{AddonSelection, CombinationKey, Product, ProductAddon, Selection, VariantMatrix};
use crate::{MarketplaceError, Result};

/// What the customer asked for on one line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineRequest {
    pub product_id: Uuid,
    #[serde(default)]
    pub selection: Selection,
    #[serde(default)]
    pub addons: Vec<AddonSelection>,
    pub quantity: u32,
}

/// Frozen price contribution of one add-on selection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddonCharge {
    pub addon_id: Uuid,
    pub name: String,
    pub values: Vec<String>,
    pub amount: Decimal,
}

/// Pricing breakdown for a single line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub product_name: String,
    pub category_id: Option<Uuid>,
    pub combination_id: Option<Uuid>,
    pub combination_key: Option<CombinationKey>,
    pub sku: Option<String>,
    pub selection: Selection,
    /// Variant override, else product base price.
    pub base_unit_price: Decimal,
    pub addons: Vec<AddonCharge>,
    /// `base_unit_price` plus every add-on charge.
    pub unit_price: Decimal,
    pub quantity: u32,
    pub line_total: Decimal,
    pub track_inventory: bool,
    pub available_quantity: i32,
}

/// Price one line against the live catalog. Pure: stock is checked, never taken.
pub fn price_line(product: &Product, matrix: &VariantMatrix, addons: &[ProductAddon], request: &LineRequest) -> Result<PricedLine> {
    if request.quantity == 0 {
        return Err(MarketplaceError::invalid_field("quantity", "Quantity must be at least 1"));
    }
    if request.product_id != product.id || matrix.product_id != product.id {
        return Err(MarketplaceError::not_found("product", request.product_id));
    }
    product.ensure_purchasable()?;

    let resolved = matrix.resolve(product, &request.selection)?;

    validate_selections(addons, &request.addons)?;
    let mut charges = Vec::new();
    for selection in request.addons.iter().filter(|s| !s.is_blank()) {
        // validate_selections has already rejected unknown add-ons
        let Some(addon) = addons.iter().find(|a| a.id == selection.addon_id) else { continue };
        let amount = compute_addon_contribution(addon, selection, resolved.unit_price)?;
        charges.push(AddonCharge {
            addon_id: addon.id,
            name: addon.name.clone(),
            values: selection.values.iter().map(|v| v.trim().to_string()).collect(),
            amount,
        });
    }

    let unit_price = resolved.unit_price + charges.iter().map(|c| c.amount).sum::<Decimal>();
    let line_total = unit_price * Decimal::from(request.quantity);

    if product.track_inventory && i64::from(resolved.quantity) < i64::from(request.quantity) {
        let item = match &resolved.key {
            Some(key) => format!("{} ({})", product.name, key),
            None => product.name.clone(),
        };
        return Err(MarketplaceError::OutOfStock { item, requested: request.quantity, available: resolved.quantity });
    }

    Ok(PricedLine {
        product_id: product.id,
        product_name: product.name.clone(),
        category_id: product.category_id,
        combination_id: resolved.combination_id,
        selection: canonical_selection(matrix, resolved.combination_id),
        combination_key: resolved.key,
        sku: resolved.sku,
        base_unit_price: resolved.unit_price,
        addons: charges,
        unit_price,
        quantity: request.quantity,
        line_total,
        track_inventory: product.track_inventory,
        available_quantity: resolved.quantity,
    })
}

fn canonical_selection(matrix: &VariantMatrix, combination_id: Option<Uuid>) -> Selection {
    combination_id
        .and_then(|id| matrix.combination_by_id(id))
        .map(|c| c.selection.clone())
        .unwrap_or_default()
}

/// Sum of line totals.
pub fn subtotal(lines: &[PricedLine]) -> Decimal {
    lines.iter().map(|l| l.line_total).sum()
}
