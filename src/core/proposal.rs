//! Proposal business logic - pricing, sending, approval and rejection.
//!
//! Staff build proposals in `draft`, send them, and the customer approves or
//! rejects. Approval is the only place stage obligations are computed: it runs
//! the stage calculator once and freezes the total. Everything after approval
//! that touches payment fields belongs to the reconciler.

use crate::{
    core::{
        money::Money,
        payment_state::PaymentState,
        stages::{self, StageSplits},
    },
    entities::{Proposal, ProposalStatus, proposal},
    errors::{Error, Result},
};
use chrono::Utc;
use sea_orm::{Set, SqlErr, prelude::*, sea_query::Expr};
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

/// Statuses in which pricing may still change and the customer may decide
const OPEN_STATUSES: [ProposalStatus; 2] = [ProposalStatus::Draft, ProposalStatus::Sent];

/// Input for a new draft proposal
#[derive(Debug, Clone, Deserialize)]
pub struct NewProposal {
    /// Human-readable number, unique per business
    pub proposal_number: String,
    /// Short title of the work
    pub title: String,
    /// Customer contact email
    #[serde(default)]
    pub customer_email: Option<String>,
    /// Line-item subtotal in cents
    pub subtotal: Money,
    /// Tax in cents
    #[serde(default)]
    pub tax_amount: Money,
}

/// Creates a draft proposal with `total = subtotal + tax_amount`.
pub async fn create_proposal(db: &DatabaseConnection, input: NewProposal) -> Result<proposal::Model> {
    let proposal_number = input.proposal_number.trim().to_string();
    if proposal_number.is_empty() {
        return Err(Error::InvalidInput {
            message: "Proposal number cannot be empty".to_string(),
        });
    }
    let total = validate_pricing(input.subtotal, input.tax_amount)?;
    let requested_number = proposal_number.clone();

    let now = Utc::now();
    let model = proposal::ActiveModel {
        proposal_number: Set(proposal_number),
        title: Set(input.title.trim().to_string()),
        customer_email: Set(input.customer_email),
        customer_view_token: Set(Uuid::new_v4().simple().to_string()),
        subtotal: Set(input.subtotal.cents()),
        tax_amount: Set(input.tax_amount.cents()),
        total: Set(total.cents()),
        status: Set(ProposalStatus::Draft),
        customer_notes: Set(None),
        approved_at: Set(None),
        rejected_at: Set(None),
        deposit_amount: Set(None),
        progress_amount: Set(None),
        final_amount: Set(None),
        deposit_paid_at: Set(None),
        progress_paid_at: Set(None),
        final_paid_at: Set(None),
        current_payment_stage: Set(None),
        total_paid: Set(0),
        version: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    let created = model.insert(db).await.map_err(|err| {
        if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
            Error::InvalidInput {
                message: format!("Proposal number '{requested_number}' already exists"),
            }
        } else {
            err.into()
        }
    })?;
    info!(
        proposal_id = created.id,
        proposal_number = %created.proposal_number,
        total = %Money::from_cents(created.total),
        "Created draft proposal"
    );
    Ok(created)
}

/// Finds a proposal by id.
pub async fn get_proposal_by_id<C>(db: &C, proposal_id: i64) -> Result<Option<proposal::Model>>
where
    C: ConnectionTrait,
{
    Proposal::find_by_id(proposal_id)
        .one(db)
        .await
        .map_err(Into::into)
}

/// Finds a proposal by the token used in customer-facing links.
pub async fn get_proposal_by_token(
    db: &DatabaseConnection,
    token: &str,
) -> Result<Option<proposal::Model>> {
    Proposal::find()
        .filter(proposal::Column::CustomerViewToken.eq(token))
        .one(db)
        .await
        .map_err(Into::into)
}

/// Loads a proposal or fails with [`Error::ProposalNotFound`].
pub async fn require_proposal<C>(db: &C, proposal_id: i64) -> Result<proposal::Model>
where
    C: ConnectionTrait,
{
    get_proposal_by_id(db, proposal_id)
        .await?
        .ok_or(Error::ProposalNotFound { id: proposal_id })
}

/// Moves a draft to `sent`. Sending an already-sent proposal is a no-op.
pub async fn mark_sent(db: &DatabaseConnection, proposal_id: i64) -> Result<proposal::Model> {
    let existing = require_proposal(db, proposal_id).await?;
    match existing.status {
        ProposalStatus::Sent => Ok(existing),
        ProposalStatus::Draft => {
            let version = existing.version;
            let mut active: proposal::ActiveModel = existing.into();
            active.status = Set(ProposalStatus::Sent);
            active.updated_at = Set(Utc::now());
            active.version = Set(version + 1);
            active.update(db).await.map_err(Into::into)
        }
        status => Err(Error::InvalidProposalStatus {
            id: proposal_id,
            status,
            expected: vec![ProposalStatus::Draft],
        }),
    }
}

/// Replaces subtotal and tax and recomputes the total.
///
/// Only allowed before approval. Once approved the total backs live stage
/// obligations and fails with [`Error::TotalFrozen`].
pub async fn update_pricing(
    db: &DatabaseConnection,
    proposal_id: i64,
    subtotal: Money,
    tax_amount: Money,
) -> Result<proposal::Model> {
    let total = validate_pricing(subtotal, tax_amount)?;

    let result = Proposal::update_many()
        .col_expr(proposal::Column::Subtotal, Expr::value(subtotal.cents()))
        .col_expr(proposal::Column::TaxAmount, Expr::value(tax_amount.cents()))
        .col_expr(
            proposal::Column::Total,
            Expr::value(total.cents()),
        )
        .col_expr(proposal::Column::UpdatedAt, Expr::value(Utc::now()))
        .col_expr(
            proposal::Column::Version,
            Expr::col(proposal::Column::Version).add(1),
        )
        .filter(proposal::Column::Id.eq(proposal_id))
        .filter(proposal::Column::Status.is_in(OPEN_STATUSES))
        .exec(db)
        .await?;

    let current = require_proposal(db, proposal_id).await?;
    if result.rows_affected == 0 {
        return Err(match current.status {
            ProposalStatus::Approved => Error::TotalFrozen { id: proposal_id },
            status => Error::InvalidProposalStatus {
                id: proposal_id,
                status,
                expected: OPEN_STATUSES.to_vec(),
            },
        });
    }
    Ok(current)
}

/// Approves a proposal on the customer's behalf and freezes its obligations.
///
/// The stage calculator runs before anything is written; a non-positive total
/// or a rounding violation blocks approval. The status transition is a single
/// conditional update, so two concurrent approvals cannot both compute
/// obligations.
#[instrument(skip(db, splits, customer_notes))]
pub async fn approve_proposal(
    db: &DatabaseConnection,
    splits: &StageSplits,
    proposal_id: i64,
    customer_notes: Option<String>,
) -> Result<proposal::Model> {
    let existing = require_proposal(db, proposal_id).await?;
    ensure_open(&existing)?;

    let total = Money::from_cents(existing.total);
    let amounts = stages::compute(total, splits)?;
    let now = Utc::now();

    let result = Proposal::update_many()
        .col_expr(proposal::Column::Status, Expr::value(ProposalStatus::Approved))
        .col_expr(proposal::Column::ApprovedAt, Expr::value(now))
        .col_expr(proposal::Column::CustomerNotes, Expr::value(customer_notes))
        .col_expr(
            proposal::Column::DepositAmount,
            Expr::value(amounts.deposit.cents()),
        )
        .col_expr(
            proposal::Column::ProgressAmount,
            Expr::value(amounts.progress.cents()),
        )
        .col_expr(
            proposal::Column::FinalAmount,
            Expr::value(amounts.final_amount.cents()),
        )
        .col_expr(
            proposal::Column::CurrentPaymentStage,
            Expr::value(PaymentState::DepositDue.current_marker()),
        )
        .col_expr(proposal::Column::UpdatedAt, Expr::value(now))
        .col_expr(
            proposal::Column::Version,
            Expr::col(proposal::Column::Version).add(1),
        )
        .filter(proposal::Column::Id.eq(proposal_id))
        .filter(proposal::Column::Status.is_in(OPEN_STATUSES))
        .filter(proposal::Column::Total.eq(existing.total))
        .exec(db)
        .await?;

    let approved = require_proposal(db, proposal_id).await?;
    if result.rows_affected == 0 {
        // Lost a race with another approval, rejection or pricing edit
        ensure_open(&approved)?;
        return Err(Error::ConcurrentUpdate { id: proposal_id });
    }

    info!(
        proposal_id,
        total = %total,
        deposit = %amounts.deposit,
        progress = %amounts.progress,
        final_amount = %amounts.final_amount,
        "Proposal approved, stage obligations frozen"
    );
    Ok(approved)
}

/// Records the customer's rejection. Rejected proposals never take payments.
#[instrument(skip(db, customer_notes))]
pub async fn reject_proposal(
    db: &DatabaseConnection,
    proposal_id: i64,
    customer_notes: Option<String>,
) -> Result<proposal::Model> {
    let now = Utc::now();
    let result = Proposal::update_many()
        .col_expr(proposal::Column::Status, Expr::value(ProposalStatus::Rejected))
        .col_expr(proposal::Column::RejectedAt, Expr::value(now))
        .col_expr(proposal::Column::CustomerNotes, Expr::value(customer_notes))
        .col_expr(proposal::Column::UpdatedAt, Expr::value(now))
        .col_expr(
            proposal::Column::Version,
            Expr::col(proposal::Column::Version).add(1),
        )
        .filter(proposal::Column::Id.eq(proposal_id))
        .filter(proposal::Column::Status.is_in(OPEN_STATUSES))
        .exec(db)
        .await?;

    let current = require_proposal(db, proposal_id).await?;
    if result.rows_affected == 0 {
        ensure_open(&current)?;
        return Err(Error::ConcurrentUpdate { id: proposal_id });
    }
    info!(proposal_id, "Proposal rejected");
    Ok(current)
}

fn ensure_open(proposal: &proposal::Model) -> Result<()> {
    if OPEN_STATUSES.contains(&proposal.status) {
        Ok(())
    } else {
        Err(Error::InvalidProposalStatus {
            id: proposal.id,
            status: proposal.status,
            expected: OPEN_STATUSES.to_vec(),
        })
    }
}

/// Rejects negative amounts and returns `subtotal + tax_amount`.
fn validate_pricing(subtotal: Money, tax_amount: Money) -> Result<Money> {
    if subtotal < Money::ZERO {
        return Err(Error::InvalidAmount { amount: subtotal });
    }
    if tax_amount < Money::ZERO {
        return Err(Error::InvalidAmount { amount: tax_amount });
    }
    subtotal
        .checked_add(tax_amount)
        .ok_or(Error::InvalidAmount { amount: subtotal })
}
