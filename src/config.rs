//! Service configuration from the environment.

use chrono::Duration;
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

use crate::domain::value_objects::TaxRate;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid { key: &'static str, value: String, reason: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    /// In-memory storage is used when unset.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub port: u16,
    pub nats_url: Option<String>,
    pub currency: String,
    pub tax_rate: TaxRate,
    pub cart_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 10,
            port: 8083,
            nats_url: None,
            currency: "USD".into(),
            tax_rate: TaxRate::new(Decimal::new(875, 4)).unwrap_or_else(|_| TaxRate::zero()),
            cart_ttl: Duration::minutes(1440),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let tax_rate = match get("MARKETPLACE_TAX_RATE") {
            Some(raw) => {
                let rate: Decimal = parse("MARKETPLACE_TAX_RATE", &raw)?;
                TaxRate::new(rate).map_err(|e| invalid("MARKETPLACE_TAX_RATE", &raw, e))?
            }
            None => defaults.tax_rate,
        };
        let currency = match get("MARKETPLACE_CURRENCY") {
            Some(raw) if raw.len() == 3 && raw.chars().all(|c| c.is_ascii_alphabetic()) => raw.to_uppercase(),
            Some(raw) => return Err(invalid("MARKETPLACE_CURRENCY", &raw, "expected a 3-letter currency code")),
            None => defaults.currency,
        };
        let cart_ttl = match get("CART_TTL_MINUTES") {
            Some(raw) => {
                let minutes: i64 = parse("CART_TTL_MINUTES", &raw)?;
                if minutes <= 0 { return Err(invalid("CART_TTL_MINUTES", &raw, "must be positive")); }
                Duration::minutes(minutes)
            }
            None => defaults.cart_ttl,
        };

        Ok(Self {
            database_url: get("DATABASE_URL"),
            db_max_connections: get("DB_MAX_CONNECTIONS").map(|v| parse("DB_MAX_CONNECTIONS", &v)).transpose()?.unwrap_or(defaults.db_max_connections),
            port: get("PORT").map(|v| parse("PORT", &v)).transpose()?.unwrap_or(defaults.port),
            nats_url: get("NATS_URL"),
            currency,
            tax_rate,
            cart_ttl,
        })
    }
}

fn parse<T: FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| invalid(key, raw, e))
}

fn invalid(key: &'static str, value: &str, reason: impl std::fmt::Display) -> ConfigError {
    ConfigError::Invalid { key, value: value.to_string(), reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8083);
        assert_eq!(config.currency, "USD");
        assert_eq!(config.tax_rate.rate(), dec!(0.0875));
        assert_eq!(config.cart_ttl, Duration::minutes(1440));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "9000"),
            ("MARKETPLACE_CURRENCY", "eur"),
            ("MARKETPLACE_TAX_RATE", "0.2"),
            ("CART_TTL_MINUTES", "30"),
            ("DATABASE_URL", "postgres://localhost/market"),
        ])).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.currency, "EUR");
        assert_eq!(config.tax_rate.rate(), dec!(0.2));
        assert_eq!(config.cart_ttl, Duration::minutes(30));
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/market"));
    }

    #[test]
    fn test_invalid_values() {
        assert!(Config::from_lookup(lookup(&[("PORT", "eighty")])).is_err());
        assert!(Config::from_lookup(lookup(&[("MARKETPLACE_TAX_RATE", "1.5")])).is_err());
        assert!(Config::from_lookup(lookup(&[("CART_TTL_MINUTES", "0")])).is_err());
        assert!(Config::from_lookup(lookup(&[("MARKETPLACE_CURRENCY", "dollars")])).is_err());
    }
}
