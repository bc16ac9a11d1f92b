//! Proposal entity - One priced customer engagement.
//!
//! Pricing fields are mutable while the proposal is a draft or has been sent.
//! Approval freezes `total` and writes the three stage obligations; from then on
//! the stage timestamps, `current_payment_stage` and `total_paid` are written
//! only by the reconciler. All monetary columns are stored in cents.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a proposal
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    /// Being prepared by staff
    #[sea_orm(string_value = "draft")]
    Draft,
    /// Delivered to the customer, awaiting a decision
    #[sea_orm(string_value = "sent")]
    Sent,
    /// Accepted by the customer; payment stages are live
    #[sea_orm(string_value = "approved")]
    Approved,
    /// Declined by the customer (terminal)
    #[sea_orm(string_value = "rejected")]
    Rejected,
}

/// Persisted pointer to the next unpaid stage
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum CurrentPaymentStage {
    /// Deposit is due
    #[sea_orm(string_value = "deposit")]
    Deposit,
    /// Progress payment is due
    #[sea_orm(string_value = "progress")]
    Progress,
    /// Final payment is due
    #[sea_orm(string_value = "final")]
    Final,
    /// All stages are paid
    #[sea_orm(string_value = "completed")]
    Completed,
}

/// Proposal database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "proposals")]
pub struct Model {
    /// Unique identifier for the proposal
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Human-readable proposal number shown to customers
    #[sea_orm(unique)]
    pub proposal_number: String,
    /// Short title of the work being proposed
    pub title: String,
    /// Customer contact email, prefilled on checkout
    pub customer_email: Option<String>,
    /// Opaque token for the customer-facing proposal view
    #[sea_orm(unique)]
    pub customer_view_token: String,
    /// Sum of line items in cents
    pub subtotal: i64,
    /// Tax in cents
    pub tax_amount: i64,
    /// `subtotal + tax_amount` in cents; frozen once approved
    pub total: i64,
    /// Lifecycle status
    pub status: ProposalStatus,
    /// Notes left by the customer when approving or rejecting
    pub customer_notes: Option<String>,
    /// When the customer approved
    pub approved_at: Option<DateTimeUtc>,
    /// When the customer rejected
    pub rejected_at: Option<DateTimeUtc>,
    /// Deposit obligation in cents, set at approval
    pub deposit_amount: Option<i64>,
    /// Progress obligation in cents, set at approval
    pub progress_amount: Option<i64>,
    /// Final obligation in cents, set at approval
    pub final_amount: Option<i64>,
    /// When the deposit stage was paid
    pub deposit_paid_at: Option<DateTimeUtc>,
    /// When the progress stage was paid
    pub progress_paid_at: Option<DateTimeUtc>,
    /// When the final stage was paid
    pub final_paid_at: Option<DateTimeUtc>,
    /// Next unpaid stage, `completed`, or null before approval
    pub current_payment_stage: Option<CurrentPaymentStage>,
    /// Cached sum of ledger rows in cents; always recomputed, never incremented
    pub total_paid: i64,
    /// Optimistic lock counter bumped on every write
    pub version: i32,
    /// When the proposal was created
    pub created_at: DateTimeUtc,
    /// When the proposal was last modified
    pub updated_at: DateTimeUtc,
}

/// Defines relationships between Proposal and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One proposal has many ledger entries
    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
