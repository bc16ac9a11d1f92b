//! Payment entity - The append-only payment ledger.
//!
//! One row per completed gateway checkout session. `gateway_session_id` is
//! UNIQUE: it is the dedupe key that lets the webhook and the browser redirect
//! report the same payment without double counting. Rows are inserted by the
//! reconciler and never updated or deleted.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the three sequential payment obligations
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStage {
    /// First payment, due on approval
    #[sea_orm(string_value = "deposit")]
    Deposit,
    /// Mid-project payment
    #[sea_orm(string_value = "progress")]
    Progress,
    /// Closing payment
    #[sea_orm(string_value = "final")]
    Final,
}

impl PaymentStage {
    /// Stages in the order they must be paid
    pub const ORDERED: [Self; 3] = [Self::Deposit, Self::Progress, Self::Final];

    /// Wire name used in gateway metadata and URLs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Progress => "progress",
            Self::Final => "final",
        }
    }

    /// Label shown to people (notifications, line items)
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Deposit => "Deposit",
            Self::Progress => "Progress",
            Self::Final => "Final",
        }
    }

    /// The stage that follows this one, if any
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Deposit => Some(Self::Progress),
            Self::Progress => Some(Self::Final),
            Self::Final => None,
        }
    }
}

impl fmt::Display for PaymentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deposit" => Ok(Self::Deposit),
            // Older checkout sessions carry the rough-in name
            "progress" | "roughin" | "rough_in" => Ok(Self::Progress),
            "final" => Ok(Self::Final),
            other => Err(format!("unknown payment stage '{other}'")),
        }
    }
}

/// Ledger row status. Only completed payments are ever persisted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Gateway confirmed the funds were collected
    #[sea_orm(string_value = "completed")]
    Completed,
}

/// Intake channel that delivered the confirmation first
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum PaymentSource {
    /// Signed server-to-server notification
    #[sea_orm(string_value = "webhook")]
    Webhook,
    /// Customer browser redirect, re-verified against the gateway
    #[sea_orm(string_value = "redirect")]
    Redirect,
}

/// Ledger entry database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    /// Unique identifier for the ledger row
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Gateway checkout session id (natural dedupe key)
    #[sea_orm(unique)]
    pub gateway_session_id: String,
    /// Gateway transaction (payment intent) id, when the gateway reports one
    pub gateway_transaction_id: Option<String>,
    /// Proposal this payment belongs to
    pub proposal_id: i64,
    /// Stage the customer paid for, as attributed by session metadata
    pub stage: PaymentStage,
    /// Amount actually charged in cents (authoritative)
    pub amount: i64,
    /// Always `completed`
    pub status: PaymentStatus,
    /// `card` or `ach`, when known
    pub payment_method: Option<String>,
    /// Email the customer paid with
    pub customer_email: Option<String>,
    /// Channel that recorded the row
    pub source: PaymentSource,
    /// Set when the payment did not match the expected next stage
    pub reconciliation_warning: Option<String>,
    /// When the gateway reports the payment happened
    pub paid_at: DateTimeUtc,
    /// When the row was written
    pub created_at: DateTimeUtc,
}

/// Defines relationships between Payment and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each payment belongs to one proposal
    #[sea_orm(
        belongs_to = "super::proposal::Entity",
        from = "Column::ProposalId",
        to = "super::proposal::Column::Id"
    )]
    Proposal,
}

impl Related<super::proposal::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Proposal.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
