//! Jurisdiction tax-rate configuration boundary.

use std::collections::HashMap;

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaxError {
    #[error("no tax rate configured for jurisdiction '{0}'")]
    UnknownJurisdiction(String),

    #[error("tax configuration unavailable: {0}")]
    Unavailable(String),
}

impl TaxError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaxError::Unavailable(_))
    }
}

/// Tax configuration boundary.
///
/// Rates are fractions (0.075 = 7.5%), applied to the invoice subtotal.
pub trait TaxConfig: Send + Sync {
    fn rate_for(&self, jurisdiction: &str) -> Result<Decimal, TaxError>;
}

/// Static per-jurisdiction rate table, configured at startup.
#[derive(Debug, Clone, Default)]
pub struct FixedTaxConfig {
    rates: HashMap<String, Decimal>,
}

impl FixedTaxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(jurisdiction: impl Into<String>, rate: Decimal) -> Self {
        let mut config = Self::new();
        config.set(jurisdiction, rate);
        config
    }

    pub fn set(&mut self, jurisdiction: impl Into<String>, rate: Decimal) {
        self.rates.insert(jurisdiction.into(), rate);
    }
}

impl TaxConfig for FixedTaxConfig {
    fn rate_for(&self, jurisdiction: &str) -> Result<Decimal, TaxError> {
        self.rates
            .get(jurisdiction)
            .copied()
            .ok_or_else(|| TaxError::UnknownJurisdiction(jurisdiction.to_string()))
    }
}
