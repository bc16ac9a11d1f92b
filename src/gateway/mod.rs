//! Payment gateway port.
//!
//! The service relies on exactly three things from the hosted gateway:
//! creating a checkout session, retrieving a session's authoritative state,
//! and delivering signed completion notifications. The first two live behind
//! [`PaymentGateway`]; notification verification is in [`signature`].

pub mod signature;
pub mod stripe;

use crate::{core::money::Money, entities::PaymentStage, errors::Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Metadata key carrying the proposal id
pub const METADATA_PROPOSAL_ID: &str = "proposal_id";
/// Metadata key carrying the stage name
pub const METADATA_STAGE: &str = "payment_stage";
/// Metadata key carrying the payment method
pub const METADATA_PAYMENT_METHOD: &str = "payment_method";

/// Gateway `payment_status` value for a collected payment
pub const PAYMENT_STATUS_PAID: &str = "paid";

/// Operations this service needs from a hosted payment gateway.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a hosted checkout session and returns where to send the customer.
    async fn create_checkout_session(&self, request: CheckoutRequest) -> Result<CheckoutSession>;

    /// Fetches the gateway's authoritative view of a session.
    async fn retrieve_session(&self, session_id: &str) -> Result<GatewaySession>;
}

/// How the customer pays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    /// Card payment, settles immediately
    #[default]
    Card,
    /// US bank debit, settles asynchronously
    Ach,
}

impl PaymentMethod {
    /// Wire name used in metadata and on ledger rows
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Ach => "ach",
        }
    }

    /// Gateway payment method type for checkout creation
    #[must_use]
    pub const fn gateway_type(self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Ach => "us_bank_account",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "card" => Ok(Self::Card),
            "ach" | "us_bank_account" => Ok(Self::Ach),
            other => Err(format!("unknown payment method '{other}'")),
        }
    }
}

/// Everything needed to open a hosted checkout for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    /// Amount to charge
    pub amount: Money,
    /// ISO currency code, lowercase
    pub currency: String,
    /// Line item name
    pub product_name: String,
    /// Line item description
    pub description: String,
    /// Prefilled customer email
    pub customer_email: Option<String>,
    /// Payment method offered on the hosted page
    pub payment_method: PaymentMethod,
    /// Where the gateway sends the customer after paying
    pub success_url: String,
    /// Where the gateway sends the customer on cancel
    pub cancel_url: String,
    /// Attribution carried back on completion
    pub metadata: StageMetadata,
}

/// Attribution metadata attached to every checkout session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageMetadata {
    /// Proposal being paid
    pub proposal_id: i64,
    /// Stage being paid
    pub stage: PaymentStage,
    /// Payment method selected
    pub payment_method: PaymentMethod,
}

impl StageMetadata {
    /// Key/value pairs as sent to the gateway
    #[must_use]
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            (METADATA_PROPOSAL_ID, self.proposal_id.to_string()),
            (METADATA_STAGE, self.stage.as_str().to_string()),
            (METADATA_PAYMENT_METHOD, self.payment_method.as_str().to_string()),
        ]
    }
}

/// A freshly created checkout session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Gateway session id
    pub id: String,
    /// Hosted checkout URL
    pub url: String,
}

/// Customer details block on a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetails {
    /// Email entered on the hosted page
    #[serde(default)]
    pub email: Option<String>,
}

/// The gateway's view of a checkout session, as returned by retrieval and
/// embedded in notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySession {
    /// Gateway session id
    pub id: String,
    /// `paid`, `unpaid` or `no_payment_required`
    #[serde(default)]
    pub payment_status: String,
    /// `open`, `complete` or `expired`
    #[serde(default)]
    pub status: Option<String>,
    /// Amount charged in cents
    #[serde(default)]
    pub amount_total: Option<i64>,
    /// Transaction (payment intent) id
    #[serde(default)]
    pub payment_intent: Option<String>,
    /// Email supplied when the session was created
    #[serde(default)]
    pub customer_email: Option<String>,
    /// Email the customer actually entered
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    /// Attribution metadata (untrusted)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl GatewaySession {
    /// True when the gateway reports the funds as collected
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.payment_status == PAYMENT_STATUS_PAID
    }

    /// Best available customer email
    #[must_use]
    pub fn email(&self) -> Option<String> {
        self.customer_details
            .as_ref()
            .and_then(|d| d.email.clone())
            .or_else(|| self.customer_email.clone())
    }
}
