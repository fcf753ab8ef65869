//! Product add-ons: optional per-product customizations with their own pricing.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::value_objects::{is_money_amount, percent_of, round_cents};
use crate::{MarketplaceError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddonOption {
    pub label: String,
    pub value: String,
    /// Added on top of the add-on's own price when this option is chosen.
    #[serde(default)]
    pub price: Option<Decimal>,
}

impl AddonOption {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self { label: label.into(), value: value.into(), price: None }
    }
    pub fn priced(label: impl Into<String>, value: impl Into<String>, price: Decimal) -> Self {
        Self { price: Some(price), ..Self::new(label, value) }
    }
}

/// Input widget of an add-on, with the schema each kind needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "fieldType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddonField {
    Text { #[serde(default)] max_length: Option<u32> },
    Textarea { #[serde(default)] max_length: Option<u32> },
    Number { #[serde(default)] min: Option<Decimal>, #[serde(default)] max: Option<Decimal> },
    Select { options: Vec<AddonOption> },
    Radio { options: Vec<AddonOption> },
    Checkbox { options: Vec<AddonOption> },
    Date,
    Color,
    File,
    ImageButtons { options: Vec<AddonOption> },
}

impl AddonField {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "TEXT", Self::Textarea { .. } => "TEXTAREA", Self::Number { .. } => "NUMBER",
            Self::Select { .. } => "SELECT", Self::Radio { .. } => "RADIO", Self::Checkbox { .. } => "CHECKBOX",
            Self::Date => "DATE", Self::Color => "COLOR", Self::File => "FILE", Self::ImageButtons { .. } => "IMAGE_BUTTONS",
        }
    }

    /// Options of choice-based fields; `None` for free-form ones.
    pub fn options(&self) -> Option<&[AddonOption]> {
        match self {
            Self::Select { options } | Self::Radio { options } | Self::Checkbox { options } | Self::ImageButtons { options } => Some(options),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "priceType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddonPricing {
    Fixed { amount: Decimal },
    /// Percentage of the resolved unit price (variant override, else product base).
    Percentage { percent: Decimal },
    /// Declared for catalog compatibility; pricing such an add-on is refused.
    Formula { expression: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductAddon {
    pub id: Uuid,
    pub product_id: Uuid,
    pub name: String,
    #[serde(default)]
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

/// The customer's input for one add-on. Every value travels as text and is
/// interpreted by the add-on's field type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddonSelection {
    pub addon_id: Uuid,
    #[serde(default)]
    pub values: Vec<String>,
}

impl AddonSelection {
    pub fn single(addon_id: Uuid, value: impl Into<String>) -> Self {
        Self { addon_id, values: vec![value.into()] }
    }
    pub fn many(addon_id: Uuid, values: &[&str]) -> Self {
        Self { addon_id, values: values.iter().map(|v| v.to_string()).collect() }
    }
    pub fn is_blank(&self) -> bool { self.values.iter().all(|v| v.trim().is_empty()) }
}

impl ProductAddon {
    pub fn new(product_id: Uuid, name: impl Into<String>, field: AddonField, pricing: AddonPricing) -> Self {
        Self {
            id: Uuid::now_v7(), product_id, name: name.into(), description: None, field, pricing,
            required: false, allow_multiple: false, max_quantity: None, sort_order: 0,
        }
    }

    pub fn required(mut self) -> Self { self.required = true; self }

    fn allows_many(&self) -> bool {
        self.allow_multiple || matches!(self.field, AddonField::Checkbox { .. })
    }

    /// Schema checks run when a vendor saves an add-on.
    pub fn validate(&self) -> Result<()> {
        let mut invalid = Vec::new();
        if self.name.trim().is_empty() { invalid.push("name"); }
        match &self.pricing {
            AddonPricing::Fixed { amount } if !is_money_amount(*amount) => invalid.push("pricing.amount"),
            AddonPricing::Percentage { percent } if *percent < Decimal::ZERO || *percent > Decimal::ONE_HUNDRED => invalid.push("pricing.percent"),
            _ => {}
        }
        if let Some(options) = self.field.options() {
            let mut seen = HashSet::new();
            if options.is_empty()
                || options.iter().any(|o| o.value.trim().is_empty() || o.label.trim().is_empty() || !seen.insert(o.value.as_str()))
            {
                invalid.push("field.options");
            }
            if options.iter().any(|o| o.price.is_some_and(|p| !is_money_amount(p))) {
                invalid.push("field.options.price");
            }
        }
        if let AddonField::Number { min: Some(min), max: Some(max) } = &self.field {
            if min > max { invalid.push("field.min"); }
        }
        if let Some(max) = self.max_quantity {
            if max == 0 || !self.allows_many() { invalid.push("max_quantity"); }
        }
        if invalid.is_empty() {
            Ok(())
        } else {
            let fields: Vec<String> = invalid.into_iter().map(String::from).collect();
            Err(MarketplaceError::validation(format!("Invalid add-on {:?}: {}", self.name, fields.join(", ")), fields))
        }
    }

    /// Problem with a selection for this add-on, if any.
    fn selection_problem(&self, selection: &AddonSelection) -> Option<String> {
        let values: Vec<&str> = selection.values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()).collect();
        if values.is_empty() {
            return None;
        }
        if let Some(options) = self.field.options() {
            if values.len() > 1 && !self.allows_many() {
                return Some(format!("{} accepts a single choice", self.name));
            }
            if let Some(max) = self.max_quantity {
                if values.len() > max as usize {
                    return Some(format!("{} accepts at most {} choices", self.name, max));
                }
            }
            let mut seen = HashSet::new();
            if let Some(unknown) = values.iter().find(|v| !options.iter().any(|o| o.value == **v) || !seen.insert(**v)) {
                return Some(format!("{:?} is not a valid choice for {}", unknown, self.name));
            }
            return None;
        }
        if values.len() > 1 {
            return Some(format!("{} accepts a single value", self.name));
        }
        let value = values[0];
        match &self.field {
            AddonField::Text { max_length } | AddonField::Textarea { max_length } => max_length
                .filter(|max| value.chars().count() > *max as usize)
                .map(|max| format!("{} must be at most {} characters", self.name, max)),
            AddonField::Number { min, max } => match Decimal::from_str(value) {
                Err(_) => Some(format!("{} must be a number", self.name)),
                Ok(n) if min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m) => {
                    Some(format!("{} is out of range", self.name))
                }
                Ok(_) => None,
            },
            AddonField::Date => NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .err()
                .map(|_| format!("{} must be a date (YYYY-MM-DD)", self.name)),
            AddonField::Color => {
                let hex = value.strip_prefix('#').unwrap_or("");
                (hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()))
                    .then(|| format!("{} must be a #RRGGBB color", self.name))
            }
            _ => None,
        }
    }
}

/// Price contribution of one add-on selection to the unit price.
pub fn compute_addon_contribution(addon: &ProductAddon, selection: &AddonSelection, base_price: Decimal) -> Result<Decimal> {
    let own = match &addon.pricing {
        AddonPricing::Fixed { amount } => *amount,
        AddonPricing::Percentage { percent } => percent_of(base_price, *percent),
        AddonPricing::Formula { .. } => {
            return Err(MarketplaceError::NotImplemented(format!("formula pricing for add-on {:?}", addon.name)));
        }
    };
    let chosen: Decimal = match addon.field.options() {
        Some(options) => selection.values.iter()
            .filter_map(|v| options.iter().find(|o| o.value == v.trim()))
            .filter_map(|o| o.price)
            .sum(),
        None => Decimal::ZERO,
    };
    Ok(round_cents(own + chosen))
}

/// Check every required add-on is answered, then that every answer is well formed.
/// Each pass reports all offenders in a single error.
pub fn validate_selections(addons: &[ProductAddon], selections: &[AddonSelection]) -> Result<()> {
    let missing: Vec<String> = addons.iter()
        .filter(|a| a.required)
        .filter(|a| selections.iter().find(|s| s.addon_id == a.id).map_or(true, |s| s.is_blank()))
        .map(|a| a.name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(MarketplaceError::validation(format!("Missing required add-ons: {}", missing.join(", ")), missing));
    }

    let mut fields = Vec::new();
    let mut problems = Vec::new();
    let mut seen = HashSet::new();
    for selection in selections {
        if !seen.insert(selection.addon_id) {
            fields.push(selection.addon_id.to_string());
            problems.push(format!("add-on {} selected twice", selection.addon_id));
            continue;
        }
        match addons.iter().find(|a| a.id == selection.addon_id) {
            None => {
                fields.push(selection.addon_id.to_string());
                problems.push(format!("unknown add-on {}", selection.addon_id));
            }
            Some(addon) => {
                if let Some(problem) = addon.selection_problem(selection) {
                    fields.push(addon.name.clone());
                    problems.push(problem);
                }
            }
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(MarketplaceError::validation(problems.join("; "), fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn engraving(product_id: Uuid) -> ProductAddon {
        ProductAddon::new(product_id, "Engraving", AddonField::Text { max_length: Some(10) }, AddonPricing::Fixed { amount: dec!(5.00) })
    }

    #[test]
    fn test_fixed_contribution() {
        let addon = engraving(Uuid::now_v7());
        let sel = AddonSelection::single(addon.id, "ABC");
        assert_eq!(compute_addon_contribution(&addon, &sel, dec!(49.99)).unwrap(), dec!(5.00));
    }

    #[test]
    fn test_percentage_rounds_half_up_per_addon() {
        let addon = ProductAddon::new(Uuid::now_v7(), "Gift wrap", AddonField::Checkbox { options: vec![AddonOption::new("Yes", "yes")] }, AddonPricing::Percentage { percent: dec!(15) });
        let sel = AddonSelection::single(addon.id, "yes");
        assert_eq!(compute_addon_contribution(&addon, &sel, dec!(49.99)).unwrap(), dec!(7.50));
    }

    #[test]
    fn test_option_price_added_on_top() {
        let addon = ProductAddon::new(
            Uuid::now_v7(),
            "Frame",
            AddonField::Select { options: vec![AddonOption::new("None", "none"), AddonOption::priced("Oak", "oak", dec!(12.00))] },
            AddonPricing::Fixed { amount: dec!(1.00) },
        );
        assert_eq!(compute_addon_contribution(&addon, &AddonSelection::single(addon.id, "oak"), dec!(30)).unwrap(), dec!(13.00));
        assert_eq!(compute_addon_contribution(&addon, &AddonSelection::single(addon.id, "none"), dec!(30)).unwrap(), dec!(1.00));
    }

    #[test]
    fn test_fixed_amounts_must_be_whole_cents() {
        let addon = ProductAddon::new(Uuid::now_v7(), "Wrap", AddonField::Text { max_length: None }, AddonPricing::Fixed { amount: dec!(0.125) });
        let err = addon.validate().unwrap_err();
        assert_eq!(err.fields(), &["pricing.amount".to_string()]);
    }

    #[test]
    fn test_formula_not_implemented() {
        let addon = ProductAddon::new(Uuid::now_v7(), "Custom", AddonField::Number { min: None, max: None }, AddonPricing::Formula { expression: "x * 2".into() });
        let err = compute_addon_contribution(&addon, &AddonSelection::single(addon.id, "2"), dec!(10)).unwrap_err();
        assert!(matches!(err, MarketplaceError::NotImplemented(_)));
    }

    #[test]
    fn test_required_addons_reported_together() {
        let product_id = Uuid::now_v7();
        let a = engraving(product_id).required();
        let b = ProductAddon::new(product_id, "Size note", AddonField::Textarea { max_length: None }, AddonPricing::Fixed { amount: dec!(0) }).required();
        let err = validate_selections(&[a, b], &[]).unwrap_err();
        match err {
            MarketplaceError::Validation { fields, message } => {
                assert_eq!(fields, vec!["Engraving".to_string(), "Size note".to_string()]);
                assert!(message.contains("Engraving") && message.contains("Size note"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_blank_counts_as_missing() {
        let a = engraving(Uuid::now_v7()).required();
        assert!(validate_selections(&[a.clone()], &[AddonSelection::single(a.id, "  ")]).is_err());
        assert!(validate_selections(&[a.clone()], &[AddonSelection::single(a.id, "HI")]).is_ok());
    }

    #[test]
    fn test_malformed_selections() {
        let product_id = Uuid::now_v7();
        let text = engraving(product_id);
        let qty = ProductAddon::new(product_id, "Candles", AddonField::Number { min: Some(dec!(1)), max: Some(dec!(5)) }, AddonPricing::Fixed { amount: dec!(0.5) });
        let color = ProductAddon::new(product_id, "Ink", AddonField::Color, AddonPricing::Fixed { amount: dec!(0) });
        let radio = ProductAddon::new(product_id, "Box", AddonField::Radio { options: vec![AddonOption::new("S", "s"), AddonOption::new("L", "l")] }, AddonPricing::Fixed { amount: dec!(0) });
        let addons = vec![text.clone(), qty.clone(), color.clone(), radio.clone()];

        let err = validate_selections(&addons, &[
            AddonSelection::single(text.id, "way too long for this"),
            AddonSelection::single(qty.id, "9"),
            AddonSelection::single(color.id, "blue"),
            AddonSelection::many(radio.id, &["s", "l"]),
            AddonSelection::single(Uuid::now_v7(), "x"),
        ]).unwrap_err();
        assert_eq!(err.fields().len(), 5);

        assert!(validate_selections(&addons, &[
            AddonSelection::single(qty.id, "3"),
            AddonSelection::single(color.id, "#00ff7A"),
            AddonSelection::single(radio.id, "l"),
        ]).is_ok());
    }

    #[test]
    fn test_addon_schema_validation() {
        let product_id = Uuid::now_v7();
        let empty = ProductAddon::new(product_id, "Frame", AddonField::Select { options: vec![] }, AddonPricing::Fixed { amount: dec!(1) });
        assert!(empty.validate().is_err());

        let mut capped = ProductAddon::new(product_id, "Charms", AddonField::Select { options: vec![AddonOption::new("A", "a")] }, AddonPricing::Fixed { amount: dec!(1) });
        capped.max_quantity = Some(3);
        assert!(capped.validate().is_err());
        capped.allow_multiple = true;
        assert!(capped.validate().is_ok());

        let pct = ProductAddon::new(product_id, "Rush", AddonField::Checkbox { options: vec![AddonOption::new("Yes", "yes")] }, AddonPricing::Percentage { percent: dec!(120) });
        assert_eq!(pct.validate().unwrap_err().fields(), &["pricing.percent".to_string()]);
    }

    #[test]
    fn test_field_type_tagging() {
        let json = serde_json::json!({"fieldType": "IMAGE_BUTTONS", "options": [{"label": "Red", "value": "red", "price": "2.50"}]});
        let field: AddonField = serde_json::from_value(json).unwrap();
        assert_eq!(field.name(), "IMAGE_BUTTONS");
        assert_eq!(field.options().unwrap()[0].price, Some(dec!(2.50)));
        let date: AddonField = serde_json::from_value(serde_json::json!({"fieldType": "DATE"})).unwrap();
        assert_eq!(date, AddonField::Date);
    }
}
