//! Payment gateway credentials and HTTP settings.
//!
//! Secrets are read from the environment only and never stored in the
//! payments TOML file.

use crate::errors::{Error, Result};
use std::time::Duration;

/// Default gateway API base URL
pub const DEFAULT_API_BASE: &str = "https://api.stripe.com";

/// Settings for talking to the hosted payment gateway.
#[derive(Clone)]
pub struct GatewayConfig {
    /// API secret key (bearer token)
    pub secret_key: String,
    /// Shared secret used to sign webhook notifications
    pub webhook_secret: String,
    /// API base URL, overridable for test doubles
    pub api_base: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Accepted clock skew for webhook timestamps
    pub webhook_tolerance: Duration,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("secret_key", &"<redacted>")
            .field("webhook_secret", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .field("webhook_tolerance", &self.webhook_tolerance)
            .finish()
    }
}

impl GatewayConfig {
    /// Reads gateway settings from the environment.
    ///
    /// `STRIPE_SECRET_KEY` and `STRIPE_WEBHOOK_SECRET` are required;
    /// `STRIPE_API_BASE`, `STRIPE_TIMEOUT_SECS` and `WEBHOOK_TOLERANCE_SECS`
    /// are optional.
    pub fn from_env() -> Result<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET")?;
        let api_base =
            std::env::var("STRIPE_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let timeout = Duration::from_secs(secs_from_env("STRIPE_TIMEOUT_SECS", 30)?);
        let webhook_tolerance = Duration::from_secs(secs_from_env("WEBHOOK_TOLERANCE_SECS", 300)?);

        let config = Self {
            secret_key,
            webhook_secret,
            api_base,
            timeout,
            webhook_tolerance,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects empty secrets and a non-HTTP base URL.
    pub fn validate(&self) -> Result<()> {
        if self.secret_key.trim().is_empty() {
            return Err(Error::Config {
                message: "STRIPE_SECRET_KEY is empty".to_string(),
            });
        }
        if self.webhook_secret.trim().is_empty() {
            return Err(Error::Config {
                message: "STRIPE_WEBHOOK_SECRET is empty".to_string(),
            });
        }
        if !self.api_base.starts_with("http://") && !self.api_base.starts_with("https://") {
            return Err(Error::Config {
                message: format!("STRIPE_API_BASE '{}' is not an http(s) URL", self.api_base),
            });
        }
        Ok(())
    }
}

fn secs_from_env(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<u64>().map_err(|e| Error::Config {
            message: format!("{key} must be a whole number of seconds: {e}"),
        }),
        Err(_) => Ok(default),
    }
}
