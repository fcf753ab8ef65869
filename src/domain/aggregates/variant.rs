//! Variant axes and the combination matrix derived from them.
//!
//! The combinations of a product are always the cross-product of its active
//! option values grouped by axis. They are regenerated whenever an axis
//! changes and are never deleted: combinations that can no longer be produced
//! are retired so historical order items keep pointing at a row, and come
//! back when their values do.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use uuid::Uuid;

use super::product::{Product, VariantMode};
use crate::domain::value_objects::is_money_amount;
use crate::{MarketplaceError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AxisType { Size, Color, Material, Style, Pattern, Custom }

impl AxisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Size => "SIZE", Self::Color => "COLOR", Self::Material => "MATERIAL",
            Self::Style => "STYLE", Self::Pattern => "PATTERN", Self::Custom => "CUSTOM",
        }
    }
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "SIZE" => Some(Self::Size), "COLOR" => Some(Self::Color), "MATERIAL" => Some(Self::Material),
            "STYLE" => Some(Self::Style), "PATTERN" => Some(Self::Pattern), "CUSTOM" => Some(Self::Custom),
            _ => None,
        }
    }
}

impl fmt::Display for AxisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// A customer's choice of one value per axis.
pub type Selection = BTreeMap<AxisType, String>;

/// Deterministic `AXIS=value|AXIS=value` serialization of a selection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CombinationKey(String);

impl CombinationKey {
    pub fn from_selection(selection: &Selection) -> Self {
        let parts: Vec<String> = selection.iter().map(|(axis, value)| format!("{}={}", axis.as_str(), value)).collect();
        Self(parts.join("|"))
    }
    pub fn from_raw(raw: impl Into<String>) -> Self { Self(raw.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for CombinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariantOption {
    pub id: Uuid,
    pub product_id: Uuid,
    pub axis: AxisType,
    pub value: String,
    pub display_name: String,
    pub color_hex: Option<String>,
    pub sort_order: i32,
    pub active: bool,
}

/// Vendor input for one value of an axis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OptionInput {
    pub value: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub color_hex: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool { true }

impl OptionInput {
    pub fn new(value: impl Into<String>) -> Self {
        Self { value: value.into(), display_name: None, color_hex: None, active: true }
    }
    pub fn inactive(value: impl Into<String>) -> Self {
        Self { active: false, ..Self::new(value) }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VariantCombination {
    pub id: Uuid,
    pub product_id: Uuid,
    pub key: CombinationKey,
    pub selection: Selection,
    pub sku: Option<String>,
    /// Falls back to the product's base price when absent.
    pub price: Option<Decimal>,
    pub compare_at_price: Option<Decimal>,
    pub quantity: i32,
    /// Vendor-controlled visibility.
    pub available: bool,
    /// Set while the key is not producible from the active options.
    #[serde(default)]
    pub retired: bool,
    pub image_url: Option<String>,
    pub sort_order: i32,
}

impl VariantCombination {
    pub fn in_stock(&self) -> bool { self.quantity > 0 }
    /// Purchasable: producible and not hidden by the vendor.
    pub fn is_live(&self) -> bool { self.available && !self.retired }
    pub fn effective_price(&self, base_price: Decimal) -> Decimal { self.price.unwrap_or(base_price) }

    pub fn apply(&mut self, patch: &CombinationPatch) -> Result<()> {
        let mut invalid = Vec::new();
        if patch.price.is_some_and(|p| !is_money_amount(p)) { invalid.push("price".to_string()); }
        if patch.compare_at_price.is_some_and(|p| !is_money_amount(p)) { invalid.push("compare_at_price".to_string()); }
        if patch.quantity.is_some_and(|q| q < 0) { invalid.push("quantity".to_string()); }
        if patch.clear_price && patch.price.is_some() { invalid.push("clear_price".to_string()); }
        if !invalid.is_empty() {
            return Err(MarketplaceError::validation(format!("Invalid combination update: {}", invalid.join(", ")), invalid));
        }
        if patch.clear_price { self.price = None; }
        if let Some(price) = patch.price { self.price = Some(price); }
        if let Some(price) = patch.compare_at_price { self.compare_at_price = Some(price); }
        if let Some(sku) = &patch.sku { self.sku = Some(sku.trim().to_uppercase()).filter(|s| !s.is_empty()); }
        if let Some(quantity) = patch.quantity { self.quantity = quantity; }
        if let Some(available) = patch.available { self.available = available; }
        if let Some(url) = &patch.image_url { self.image_url = Some(url.clone()).filter(|u| !u.is_empty()); }
        Ok(())
    }
}

/// Vendor edit of a single combination.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CombinationPatch {
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Remove the price override so the product base price applies again.
    #[serde(default)]
    pub clear_price: bool,
    #[serde(default)]
    pub compare_at_price: Option<Decimal>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub quantity: Option<i32>,
    #[serde(default)]
    pub available: Option<bool>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegenerationReport {
    pub created: usize,
    pub preserved: usize,
    /// Retired rows producible again.
    pub restored: usize,
    pub retired: usize,
}

/// What a selection resolves to: a concrete combination, or the product itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedVariant {
    pub combination_id: Option<Uuid>,
    pub key: Option<CombinationKey>,
    pub sku: Option<String>,
    pub unit_price: Decimal,
    pub compare_at_price: Option<Decimal>,
    pub quantity: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantMatrix {
    pub product_id: Uuid,
    pub options: Vec<VariantOption>,
    pub combinations: Vec<VariantCombination>,
}

impl VariantMatrix {
    pub fn new(product_id: Uuid) -> Self {
        Self { product_id, options: vec![], combinations: vec![] }
    }

    /// Active values per axis in sort order; axes without an active value are omitted.
    pub fn active_axes(&self) -> BTreeMap<AxisType, Vec<&VariantOption>> {
        let mut axes: BTreeMap<AxisType, Vec<&VariantOption>> = BTreeMap::new();
        for option in self.options.iter().filter(|o| o.active) {
            axes.entry(option.axis).or_default().push(option);
        }
        for values in axes.values_mut() {
            values.sort_by_key(|o| o.sort_order);
        }
        axes
    }

    pub fn has_axes(&self) -> bool { self.options.iter().any(|o| o.active) }

    pub fn combination(&self, key: &CombinationKey) -> Option<&VariantCombination> {
        self.combinations.iter().find(|c| &c.key == key)
    }

    pub fn combination_by_id(&self, id: Uuid) -> Option<&VariantCombination> {
        self.combinations.iter().find(|c| c.id == id)
    }

    /// Replace the option set of one axis and regenerate the combinations.
    pub fn define_axis(&mut self, mode: VariantMode, axis: AxisType, inputs: Vec<OptionInput>) -> Result<RegenerationReport> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for input in &inputs {
            let value = input.value.trim();
            if value.is_empty() || value.contains('|') || value.contains('=') {
                return Err(MarketplaceError::invalid_field(
                    axis.as_str(),
                    format!("Invalid {} value {:?}: must be non-empty and may not contain '|' or '='", axis, input.value),
                ));
            }
            if !seen.insert(value.to_lowercase()) {
                duplicates.push(value.to_string());
            }
        }
        if !duplicates.is_empty() {
            return Err(MarketplaceError::validation(
                format!("Duplicate {} values: {}", axis, duplicates.join(", ")),
                vec![axis.as_str().to_string()],
            ));
        }
        if mode == VariantMode::Legacy && !inputs.is_empty() && self.options.iter().any(|o| o.axis != axis) {
            return Err(MarketplaceError::invalid_field(
                axis.as_str(),
                "Legacy variant products support a single option axis",
            ));
        }

        let previous: Vec<VariantOption> = self.options.iter().filter(|o| o.axis == axis).cloned().collect();
        self.options.retain(|o| o.axis != axis);
        for (index, input) in inputs.into_iter().enumerate() {
            let value = input.value.trim().to_string();
            let id = previous.iter()
                .find(|o| o.value.eq_ignore_ascii_case(&value))
                .map(|o| o.id)
                .unwrap_or_else(Uuid::now_v7);
            self.options.push(VariantOption {
                id,
                product_id: self.product_id,
                axis,
                display_name: input.display_name.filter(|d| !d.trim().is_empty()).unwrap_or_else(|| value.clone()),
                value,
                color_hex: input.color_hex,
                sort_order: index as i32,
                active: input.active,
            });
        }
        Ok(self.regenerate())
    }

    /// Every selection producible from the active options, in sort order.
    pub fn producible_selections(&self) -> Vec<Selection> {
        let axes = self.active_axes();
        if axes.is_empty() {
            return vec![];
        }
        let mut selections = vec![Selection::new()];
        for (axis, values) in &axes {
            let mut next = Vec::with_capacity(selections.len() * values.len());
            for partial in &selections {
                for option in values {
                    let mut s = partial.clone();
                    s.insert(*axis, option.value.clone());
                    next.push(s);
                }
            }
            selections = next;
        }
        selections
    }

    /// Upsert one combination per producible key and retire the rest.
    pub fn regenerate(&mut self) -> RegenerationReport {
        let mut report = RegenerationReport::default();
        let mut producible = HashSet::new();
        for (index, selection) in self.producible_selections().into_iter().enumerate() {
            let key = CombinationKey::from_selection(&selection);
            producible.insert(key.clone());
            match self.combinations.iter_mut().find(|c| c.key == key) {
                Some(existing) => {
                    existing.sort_order = index as i32;
                    if existing.retired {
                        existing.retired = false;
                        report.restored += 1;
                    } else {
                        report.preserved += 1;
                    }
                }
                None => {
                    self.combinations.push(VariantCombination {
                        id: Uuid::now_v7(),
                        product_id: self.product_id,
                        key,
                        selection,
                        sku: None,
                        price: None,
                        compare_at_price: None,
                        quantity: 0,
                        available: true,
                        retired: false,
                        image_url: None,
                        sort_order: index as i32,
                    });
                    report.created += 1;
                }
            }
        }
        for combination in self.combinations.iter_mut() {
            if !producible.contains(&combination.key) && !combination.retired {
                combination.retired = true;
                report.retired += 1;
            }
        }
        self.combinations.sort_by_key(|c| (c.retired, c.sort_order));
        report
    }

    /// Resolve a customer's per-axis choice to something purchasable.
    pub fn resolve(&self, product: &Product, selection: &Selection) -> Result<ResolvedVariant> {
        let axes = self.active_axes();
        if axes.is_empty() {
            if !selection.is_empty() {
                return Err(MarketplaceError::not_found("variant combination", CombinationKey::from_selection(selection)));
            }
            if product.track_inventory && product.quantity <= 0 {
                return Err(MarketplaceError::OutOfStock { item: product.name.clone(), requested: 1, available: product.quantity });
            }
            return Ok(ResolvedVariant {
                combination_id: None,
                key: None,
                sku: product.sku.as_ref().map(|s| s.to_string()),
                unit_price: product.base_price,
                compare_at_price: product.compare_at_price,
                quantity: product.quantity,
            });
        }

        let missing: Vec<&str> = axes.keys().filter(|a| !selection.contains_key(a)).map(|a| a.as_str()).collect();
        if !missing.is_empty() {
            return Err(MarketplaceError::NotFound {
                entity: "variant combination",
                id: format!("incomplete selection, missing {}", missing.join(", ")),
            });
        }
        let mut canonical = Selection::new();
        for (axis, value) in selection {
            let option = axes.get(axis)
                .and_then(|values| values.iter().find(|o| o.value.eq_ignore_ascii_case(value.trim())))
                .ok_or_else(|| MarketplaceError::not_found("variant combination", CombinationKey::from_selection(selection)))?;
            canonical.insert(*axis, option.value.clone());
        }
        let key = CombinationKey::from_selection(&canonical);
        let combination = self.combination(&key)
            .filter(|c| c.is_live())
            .ok_or_else(|| MarketplaceError::not_found("variant combination", &key))?;
        if product.track_inventory && combination.quantity <= 0 {
            return Err(MarketplaceError::OutOfStock {
                item: format!("{} ({})", product.name, key),
                requested: 1,
                available: combination.quantity,
            });
        }
        Ok(ResolvedVariant {
            combination_id: Some(combination.id),
            key: Some(key),
            sku: combination.sku.clone().or_else(|| product.sku.as_ref().map(|s| s.to_string())),
            unit_price: combination.effective_price(product.base_price),
            compare_at_price: combination.compare_at_price.or(product.compare_at_price),
            quantity: combination.quantity,
        })
    }
}
