//! Payment ledger - append-only record of completed gateway payments.
//!
//! The ledger is the source of truth for how much has been paid. Rows are
//! keyed by gateway session id; the UNIQUE constraint on that column, not any
//! application lock, is what keeps two intake channels from double counting.
//! The summary read model is derived purely from ledger rows and the frozen
//! obligations on the proposal, so it can be recomputed at any time.

use crate::{
    core::{
        intake::ConfirmationEvent, money::Money, payment_state::PaymentState,
        proposal::require_proposal,
    },
    entities::{Payment, PaymentStage, PaymentStatus, ProposalModel, payment},
    errors::Result,
};
use chrono::Utc;
use sea_orm::{QueryOrder, Set, SqlErr, prelude::*};
use serde::Serialize;
use tracing::debug;

/// Per-stage view of expected versus collected money.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSummary {
    /// Stage
    pub stage: PaymentStage,
    /// Obligation frozen at approval (zero before approval)
    pub expected: Money,
    /// Sum of ledger rows attributed to this stage
    pub paid: Money,
    /// `max(0, paid - expected)`; reported only, never rolled forward
    pub overpayment: Money,
    /// Number of ledger rows for this stage
    pub payment_count: usize,
    /// Stage timestamp on the proposal, if the stage counts as paid
    pub paid_at: Option<DateTimeUtc>,
}

/// Balance report for one proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    /// Proposal id
    pub proposal_id: i64,
    /// Proposal number
    pub proposal_number: String,
    /// Lifecycle state derived from the proposal
    pub state: PaymentState,
    /// Frozen proposal total
    pub total: Money,
    /// Sum of every ledger row
    pub total_paid: Money,
    /// `max(0, total - total_paid)`
    pub remaining: Money,
    /// Deposit, progress, final in order
    pub stages: Vec<StageSummary>,
    /// Whether the cached `total_paid` on the proposal matches the ledger
    pub cache_consistent: bool,
}

/// Looks up the ledger row for a gateway session, if one was recorded.
pub async fn find_by_session<C>(db: &C, gateway_session_id: &str) -> Result<Option<payment::Model>>
where
    C: ConnectionTrait,
{
    Payment::find()
        .filter(payment::Column::GatewaySessionId.eq(gateway_session_id))
        .one(db)
        .await
        .map_err(Into::into)
}

/// All ledger rows for a proposal, oldest payment first.
pub async fn entries_for_proposal<C>(db: &C, proposal_id: i64) -> Result<Vec<payment::Model>>
where
    C: ConnectionTrait,
{
    Payment::find()
        .filter(payment::Column::ProposalId.eq(proposal_id))
        .order_by_asc(payment::Column::PaidAt)
        .order_by_asc(payment::Column::Id)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Sum of the amounts on a set of ledger rows
#[must_use]
pub fn sum_entries(entries: &[payment::Model]) -> Money {
    entries.iter().map(|e| Money::from_cents(e.amount)).sum()
}

/// Inserts the ledger row for a confirmed payment.
///
/// Returns `Ok(None)` when a row for the same gateway session already exists;
/// that is the idempotent replay case, not a failure.
pub async fn record_entry<C>(
    db: &C,
    event: &ConfirmationEvent,
    reconciliation_warning: Option<String>,
) -> Result<Option<payment::Model>>
where
    C: ConnectionTrait,
{
    let entry = payment::ActiveModel {
        gateway_session_id: Set(event.gateway_session_id.clone()),
        gateway_transaction_id: Set(event.gateway_transaction_id.clone()),
        proposal_id: Set(event.proposal_id),
        stage: Set(event.stage),
        amount: Set(event.amount_charged.cents()),
        status: Set(PaymentStatus::Completed),
        payment_method: Set(event.payment_method.clone()),
        customer_email: Set(event.customer_email.clone()),
        source: Set(event.source),
        reconciliation_warning: Set(reconciliation_warning),
        paid_at: Set(event.paid_at),
        created_at: Set(Utc::now()),
        ..Default::default()
    };

    match entry.insert(db).await {
        Ok(model) => Ok(Some(model)),
        Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            debug!(
                gateway_session_id = %event.gateway_session_id,
                "Ledger row already exists for session"
            );
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// Ledger rows flagged for manual review, newest first.
pub async fn list_warnings(db: &DatabaseConnection) -> Result<Vec<payment::Model>> {
    Payment::find()
        .filter(payment::Column::ReconciliationWarning.is_not_null())
        .order_by_desc(payment::Column::CreatedAt)
        .all(db)
        .await
        .map_err(Into::into)
}

/// Builds the balance report for a proposal. Never writes.
pub async fn summarize(db: &DatabaseConnection, proposal_id: i64) -> Result<LedgerSummary> {
    let proposal = require_proposal(db, proposal_id).await?;
    let entries = entries_for_proposal(db, proposal_id).await?;
    Ok(build_summary(&proposal, &entries))
}

/// Pure part of [`summarize`], usable on rows already in hand.
#[must_use]
pub fn build_summary(proposal: &ProposalModel, entries: &[payment::Model]) -> LedgerSummary {
    let stages = PaymentStage::ORDERED
        .into_iter()
        .map(|stage| {
            let expected = Money::from_cents(expected_for(proposal, stage).unwrap_or(0));
            let rows: Vec<_> = entries.iter().filter(|e| e.stage == stage).collect();
            let paid: Money = rows.iter().map(|e| Money::from_cents(e.amount)).sum();
            StageSummary {
                stage,
                expected,
                paid,
                overpayment: paid.saturating_sub_floor_zero(expected),
                payment_count: rows.len(),
                paid_at: paid_at_for(proposal, stage),
            }
        })
        .collect();

    let total = Money::from_cents(proposal.total);
    let total_paid = sum_entries(entries);

    LedgerSummary {
        proposal_id: proposal.id,
        proposal_number: proposal.proposal_number.clone(),
        state: PaymentState::of(proposal),
        total,
        total_paid,
        remaining: total.saturating_sub_floor_zero(total_paid),
        stages,
        cache_consistent: Money::from_cents(proposal.total_paid) == total_paid,
    }
}

/// Obligation frozen on the proposal for `stage`
#[must_use]
pub const fn expected_for(proposal: &ProposalModel, stage: PaymentStage) -> Option<i64> {
    match stage {
        PaymentStage::Deposit => proposal.deposit_amount,
        PaymentStage::Progress => proposal.progress_amount,
        PaymentStage::Final => proposal.final_amount,
    }
}

/// Stage timestamp stored on the proposal
#[must_use]
pub const fn paid_at_for(proposal: &ProposalModel, stage: PaymentStage) -> Option<DateTimeUtc> {
    match stage {
        PaymentStage::Deposit => proposal.deposit_paid_at,
        PaymentStage::Progress => proposal.progress_paid_at,
        PaymentStage::Final => proposal.final_paid_at,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::entities::PaymentSource;
    use crate::test_utils::*;

    #[tokio::test]
    async fn test_record_entry_dedupes_by_session() -> Result<()> {
        let db = setup_test_db().await?;
        let proposal = create_approved_proposal(&db, "P-200", 100_000).await?;
        let event = confirmation(&proposal, PaymentStage::Deposit, "cs_dup", 50_000);

        let first = record_entry(&db, &event, None).await?;
        assert!(first.is_some());

        let mut replay = event.clone();
        replay.source = PaymentSource::Redirect;
        let second = record_entry(&db, &replay, None).await?;
        assert!(second.is_none());

        let rows = entries_for_proposal(&db, proposal.id).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].source, PaymentSource::Webhook);
        assert_eq!(rows[0].status, PaymentStatus::Completed);
        Ok(())
    }

    #[tokio::test]
    async fn test_find_by_session() -> Result<()> {
        let db = setup_test_db().await?;
        let proposal = create_approved_proposal(&db, "P-201", 100_000).await?;
        let event = confirmation(&proposal, PaymentStage::Deposit, "cs_find", 50_000);
        record_entry(&db, &event, None).await?;

        let found = find_by_session(&db, "cs_find").await?.unwrap();
        assert_eq!(found.amount, 50_000);
        assert_eq!(found.gateway_transaction_id.as_deref(), Some("pi_cs_find"));
        assert!(find_by_session(&db, "cs_missing").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_summary_reports_overpayment_without_rolling_forward() -> Result<()> {
        let db = setup_test_db().await?;
        let proposal = create_approved_proposal(&db, "P-202", 100_000).await?;

        record_entry(
            &db,
            &confirmation(&proposal, PaymentStage::Deposit, "cs_over", 52_500),
            None,
        )
        .await?;

        let summary = summarize(&db, proposal.id).await?;
        let deposit = &summary.stages[0];
        assert_eq!(deposit.stage, PaymentStage::Deposit);
        assert_eq!(deposit.expected, Money::from_cents(50_000));
        assert_eq!(deposit.paid, Money::from_cents(52_500));
        assert_eq!(deposit.overpayment, Money::from_cents(2_500));

        let progress = &summary.stages[1];
        assert_eq!(progress.expected, Money::from_cents(30_000));
        assert_eq!(progress.paid, Money::ZERO);
        assert_eq!(progress.overpayment, Money::ZERO);

        assert_eq!(summary.total_paid, Money::from_cents(52_500));
        assert_eq!(summary.remaining, Money::from_cents(47_500));
        Ok(())
    }

    #[tokio::test]
    async fn test_summary_of_untouched_proposal() -> Result<()> {
        let db = setup_test_db().await?;
        let proposal = create_test_proposal(&db, "P-203", 20_000, 0).await?;

        let summary = summarize(&db, proposal.id).await?;
        assert_eq!(summary.state, PaymentState::Unapproved);
        assert_eq!(summary.total_paid, Money::ZERO);
        assert_eq!(summary.remaining, Money::from_cents(20_000));
        assert!(summary.cache_consistent);
        assert!(summary.stages.iter().all(|s| s.expected == Money::ZERO));
        Ok(())
    }

    #[tokio::test]
    async fn test_summary_flags_stale_cache() -> Result<()> {
        let db = setup_test_db().await?;
        let proposal = create_approved_proposal(&db, "P-204", 100_000).await?;
        // Written straight to the ledger, bypassing the reconciler
        record_entry(
            &db,
            &confirmation(&proposal, PaymentStage::Deposit, "cs_raw", 50_000),
            None,
        )
        .await?;

        let summary = summarize(&db, proposal.id).await?;
        assert!(!summary.cache_consistent);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_warnings_only_returns_flagged_rows() -> Result<()> {
        let db = setup_test_db().await?;
        let proposal = create_approved_proposal(&db, "P-205", 100_000).await?;
        record_entry(
            &db,
            &confirmation(&proposal, PaymentStage::Deposit, "cs_ok", 50_000),
            None,
        )
        .await?;
        record_entry(
            &db,
            &confirmation(&proposal, PaymentStage::Final, "cs_early", 20_000),
            Some("final paid before progress".to_string()),
        )
        .await?;

        let warnings = list_warnings(&db).await?;
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].gateway_session_id, "cs_early");
        Ok(())
    }
}
