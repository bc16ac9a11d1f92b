//! Application configuration.
//!
//! Deployment values and secrets come from the environment (optionally via a
//! `.env` file loaded in `main`); business settings come from a TOML file.

/// Database configuration and connection management
pub mod database;

/// Gateway credentials and HTTP settings from environment variables
pub mod gateway;

/// Payment business settings from payments.toml
pub mod payments;

use crate::errors::{Error, Result};
use gateway::GatewayConfig;
use payments::PaymentsConfig;
use std::net::SocketAddr;
use tracing::info;

/// Default listen address
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
/// Default payments configuration path
pub const DEFAULT_PAYMENTS_CONFIG: &str = "payments.toml";

/// Everything the service needs to start.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Database connection string
    pub database_url: String,
    /// HTTP listen address
    pub bind_addr: SocketAddr,
    /// Gateway credentials and timeouts
    pub gateway: GatewayConfig,
    /// Business settings
    pub payments: PaymentsConfig,
}

/// Loads the full application configuration from the environment and the
/// payments TOML file.
pub fn load_app_config() -> Result<AppConfig> {
    let database_url = database::get_database_url();

    let bind_raw = std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let bind_addr = bind_raw.parse::<SocketAddr>().map_err(|e| Error::Config {
        message: format!("BIND_ADDR '{bind_raw}' is not a socket address: {e}"),
    })?;

    let gateway = GatewayConfig::from_env()?;

    let payments_path =
        std::env::var("PAYMENTS_CONFIG").unwrap_or_else(|_| DEFAULT_PAYMENTS_CONFIG.to_string());
    let payments = payments::load_config(&payments_path)?;

    info!(
        %bind_addr,
        payments_config = %payments_path,
        currency = %payments.currency,
        splits = ?payments.splits,
        "Configuration loaded"
    );

    Ok(AppConfig {
        database_url,
        bind_addr,
        gateway,
        payments,
    })
}
