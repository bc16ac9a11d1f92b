//! HTTP surface.
//!
//! Thin axum handlers over the `core` operations. Handlers parse the request,
//! call one core function and map the result; no payment rules live here.

/// Error to response mapping
pub mod error;
/// Confirmation intake endpoints (webhook and customer return)
pub mod intake;
/// Proposal, checkout and ledger endpoints
pub mod proposals;

use crate::{
    config::payments::PaymentsConfig, gateway::PaymentGateway,
    gateway::signature::WebhookVerifier, notify::PaymentNotifier,
};
use axum::{
    Router,
    http::StatusCode,
    routing::{get, post, put},
};
use sea_orm::DatabaseConnection;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::ApiError;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    /// Database pool
    pub db: DatabaseConnection,
    /// Hosted checkout gateway
    pub gateway: Arc<dyn PaymentGateway>,
    /// Webhook signature verifier
    pub verifier: Arc<WebhookVerifier>,
    /// Payment-received hook
    pub notifier: Arc<dyn PaymentNotifier>,
    /// Business settings
    pub config: Arc<PaymentsConfig>,
}

/// Builds the router (separate from [`serve`] for testing).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/gateway", post(intake::gateway_webhook))
        .route("/payments/success", get(intake::payment_success))
        .route("/payments/warnings", get(proposals::list_warnings))
        .route("/proposals", post(proposals::create))
        .route("/views/:token", get(proposals::get_by_token))
        .route("/proposals/:id", get(proposals::get))
        .route("/proposals/:id/send", post(proposals::send))
        .route("/proposals/:id/pricing", put(proposals::update_pricing))
        .route("/proposals/:id/approve", post(proposals::approve))
        .route("/proposals/:id/reject", post(proposals::reject))
        .route("/proposals/:id/checkout", post(proposals::checkout))
        .route("/proposals/:id/payments", get(proposals::payments))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the API on `addr` until Ctrl-C.
pub async fn serve(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn health() -> StatusCode {
    StatusCode::OK
}
