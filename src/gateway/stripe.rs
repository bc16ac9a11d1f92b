//! Stripe Checkout client.
//!
//! Talks to the REST API with form-encoded bodies and bearer auth. Session
//! retrieval is retried on transient failures; session creation is not.

use super::{CheckoutRequest, CheckoutSession, GatewaySession, PaymentGateway};
use crate::config::gateway::GatewayConfig;
use crate::errors::{Error, Result};
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Hosted checkout backed by the Stripe API.
#[derive(Debug, Clone)]
pub struct StripeGateway {
    client: Client,
    secret_key: String,
    api_base: String,
}

impl StripeGateway {
    /// Builds a client from gateway settings.
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            client,
            secret_key: config.secret_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    fn backoff() -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(3))
            .with_max_times(3)
            .with_jitter()
    }

    fn is_retryable(err: &Error) -> bool {
        match err {
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::Gateway {
                status: Some(status),
                ..
            } => *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500,
            _ => false,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.api_base)
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(Into::into);
        }

        let message = api_error_message(&body).unwrap_or_else(|| body.chars().take(200).collect());
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            warn!(status = %status, message = %message, "Gateway returned retryable status");
        } else {
            error!(status = %status, message = %message, "Gateway request failed");
        }
        Err(Error::Gateway {
            status: Some(status.as_u16()),
            message,
        })
    }

    async fn fetch_session(&self, session_id: &str) -> Result<GatewaySession> {
        let response = self
            .client
            .get(self.url(&format!("/v1/checkout/sessions/{session_id}")))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        Self::read_json(response).await
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(proposal_id = request.metadata.proposal_id, stage = %request.metadata.stage))]
    async fn create_checkout_session(&self, request: CheckoutRequest) -> Result<CheckoutSession> {
        let form = checkout_form(&request);
        let response = self
            .client
            .post(self.url("/v1/checkout/sessions"))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await?;

        let session: CheckoutSession = Self::read_json(response).await?;
        debug!(session_id = %session.id, "Checkout session created");
        Ok(session)
    }

    #[instrument(skip(self))]
    async fn retrieve_session(&self, session_id: &str) -> Result<GatewaySession> {
        (|| async { self.fetch_session(session_id).await })
            .retry(Self::backoff())
            .when(Self::is_retryable)
            .await
    }
}

/// Form fields for a one-line-item checkout session.
fn checkout_form(request: &CheckoutRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("mode".to_string(), "payment".to_string()),
        (
            "payment_method_types[0]".to_string(),
            request.payment_method.gateway_type().to_string(),
        ),
        (
            "line_items[0][price_data][currency]".to_string(),
            request.currency.clone(),
        ),
        (
            "line_items[0][price_data][product_data][name]".to_string(),
            request.product_name.clone(),
        ),
        (
            "line_items[0][price_data][product_data][description]".to_string(),
            request.description.clone(),
        ),
        (
            "line_items[0][price_data][unit_amount]".to_string(),
            request.amount.cents().to_string(),
        ),
        ("line_items[0][quantity]".to_string(), "1".to_string()),
        ("success_url".to_string(), request.success_url.clone()),
        ("cancel_url".to_string(), request.cancel_url.clone()),
    ];

    if let Some(email) = &request.customer_email {
        form.push(("customer_email".to_string(), email.clone()));
    }

    for (key, value) in request.metadata.to_pairs() {
        form.push((format!("metadata[{key}]"), value.clone()));
        form.push((format!("payment_intent_data[metadata][{key}]"), value));
    }

    form
}

fn api_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(ToString::to_string)
}
