#![allow(clippy::result_large_err)]

use dotenvy::dotenv;
use proposal_payments::{
    api::{self, AppState},
    config::{self, database},
    errors::Result,
    gateway::{signature::WebhookVerifier, stripe::StripeGateway},
    notify::LogNotifier,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; env vars can also be set externally
    dotenv().ok();

    // 3. Load the application configuration
    let app_config = config::load_app_config()
        .inspect_err(|e| error!("Failed to load application configuration: {}", e))?;

    // 4. Open the database and create tables
    let db = database::create_connection(&app_config.database_url)
        .await
        .inspect_err(|e| error!("Failed to initialize database: {}", e))?;

    // 5. Wire the gateway, verifier and notifier
    let gateway = StripeGateway::new(&app_config.gateway)?;
    let verifier = WebhookVerifier::new(
        app_config.gateway.webhook_secret.clone(),
        app_config.gateway.webhook_tolerance,
    );

    let state = AppState {
        db,
        gateway: Arc::new(gateway),
        verifier: Arc::new(verifier),
        notifier: Arc::new(LogNotifier),
        config: Arc::new(app_config.payments),
    };

    // 6. Serve until Ctrl-C
    api::serve(state, app_config.bind_addr).await?;
    info!("Server stopped");
    Ok(())
}
