//! Payment business settings loaded from `payments.toml`
//!
//! Everything here is non-secret: currency, stage splits, which payment
//! methods customers may pick and where the customer-facing app lives.
//! A missing file means defaults; a file that exists but does not parse or
//! validate is an error.

use crate::core::stages::StageSplits;
use crate::errors::{Error, Result};
use crate::gateway::PaymentMethod;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Contents of the payments configuration file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PaymentsConfig {
    /// ISO currency code sent to the gateway
    pub currency: String,
    /// Stage split in basis points
    pub splits: StageSplits,
    /// Payment methods offered at checkout
    pub payment_methods: Vec<PaymentMethod>,
    /// Base URL of the customer-facing app, without trailing slash
    pub app_base_url: String,
    /// Name shown on the checkout line item
    pub business_name: String,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            currency: "usd".to_string(),
            splits: StageSplits::default(),
            payment_methods: vec![PaymentMethod::Card, PaymentMethod::Ach],
            app_base_url: "http://localhost:3000".to_string(),
            business_name: "Project".to_string(),
        }
    }
}

impl PaymentsConfig {
    /// Checks cross-field rules that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.splits.validate()?;

        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(Error::Config {
                message: format!("currency '{}' is not a 3-letter code", self.currency),
            });
        }
        if self.payment_methods.is_empty() {
            return Err(Error::Config {
                message: "at least one payment method must be enabled".to_string(),
            });
        }
        if !self.app_base_url.starts_with("http://") && !self.app_base_url.starts_with("https://")
        {
            return Err(Error::Config {
                message: format!("app_base_url '{}' is not an http(s) URL", self.app_base_url),
            });
        }
        Ok(())
    }

    /// Whether customers may pay with `method`
    #[must_use]
    pub fn allows(&self, method: PaymentMethod) -> bool {
        self.payment_methods.contains(&method)
    }

    /// `app_base_url` with any trailing slash removed
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.app_base_url.trim_end_matches('/')
    }
}

/// Parses and validates configuration from TOML text.
pub fn parse_config(contents: &str) -> Result<PaymentsConfig> {
    let mut config: PaymentsConfig = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse payments config: {e}"),
    })?;
    config.currency = config.currency.to_ascii_lowercase();
    config.validate()?;
    Ok(config)
}

/// Loads configuration from `path`, falling back to defaults when the file
/// does not exist.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<PaymentsConfig> {
    let path = path.as_ref();
    if !path.exists() {
        info!(path = %path.display(), "Payments config not found, using defaults");
        return Ok(PaymentsConfig::default());
    }

    let contents = std::fs::read_to_string(path).map_err(|e| Error::Config {
        message: format!("Failed to read payments config {}: {e}", path.display()),
    })?;
    parse_config(&contents)
}
