//! Stage reconciler.
//!
//! The only writer of a proposal's stage timestamps, `current_payment_stage`
//! and cached `total_paid`. Each confirmation is applied in one database
//! transaction:
//!
//! 1. a ledger row for the session already exists -> duplicate, no-op
//! 2. insert the ledger row (UNIQUE on session id; losing the race is also a
//!    duplicate)
//! 3. recompute paid stages and `total_paid` from the ledger
//! 4. write the proposal guarded by its `version` column
//!
//! A zero-row update in step 4 means another writer got there first; the
//! transaction rolls back and the whole transition is retried.

use crate::{
    core::{
        intake::ConfirmationEvent,
        ledger::{self, expected_for, paid_at_for},
        money::Money,
        payment_state::PaymentState,
        proposal::require_proposal,
    },
    entities::{PaymentStage, Proposal, ProposalModel, ProposalStatus, payment, proposal},
    errors::{Error, Result},
};
use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use sea_orm::{TransactionTrait, prelude::*, sea_query::Expr};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// What applying a confirmation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Ledger row recorded and the proposal moved forward cleanly
    Applied {
        /// Proposal after the update
        proposal: ProposalModel,
        /// New ledger row
        entry: payment::Model,
        /// Lifecycle state after the update
        state: PaymentState,
    },
    /// Ledger row recorded, but something about it needs staff review
    RecordedWithWarning {
        /// Proposal after the update
        proposal: ProposalModel,
        /// New ledger row, carrying the warning
        entry: payment::Model,
        /// Why the payment was flagged
        warning: String,
    },
    /// The session was already recorded; nothing changed
    Duplicate {
        /// Session that was replayed
        gateway_session_id: String,
    },
}

impl ReconcileOutcome {
    /// The ledger row this call created, if any
    #[must_use]
    pub const fn new_entry(&self) -> Option<&payment::Model> {
        match self {
            Self::Applied { entry, .. } | Self::RecordedWithWarning { entry, .. } => Some(entry),
            Self::Duplicate { .. } => None,
        }
    }

    /// The proposal after reconciliation, if this call changed it
    #[must_use]
    pub const fn proposal(&self) -> Option<&ProposalModel> {
        match self {
            Self::Applied { proposal, .. } | Self::RecordedWithWarning { proposal, .. } => {
                Some(proposal)
            }
            Self::Duplicate { .. } => None,
        }
    }
}

fn backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_millis(500))
        .with_max_times(8)
        .with_jitter()
}

/// Applies a confirmation event exactly once.
///
/// Safe to call concurrently for the same event from both intake channels;
/// exactly one call records the row and the rest report
/// [`ReconcileOutcome::Duplicate`].
#[instrument(skip(db, event), fields(session_id = %event.gateway_session_id, proposal_id = event.proposal_id, stage = %event.stage))]
pub async fn reconcile(db: &DatabaseConnection, event: &ConfirmationEvent) -> Result<ReconcileOutcome> {
    (|| async { reconcile_once(db, event).await })
        .retry(backoff())
        .when(|e| matches!(e, Error::ConcurrentUpdate { .. }))
        .notify(|err, delay| debug!(error = %err, ?delay, "Retrying reconciliation"))
        .await
}

async fn reconcile_once(
    db: &DatabaseConnection,
    event: &ConfirmationEvent,
) -> Result<ReconcileOutcome> {
    let txn = db.begin().await?;

    if ledger::find_by_session(&txn, &event.gateway_session_id)
        .await?
        .is_some()
    {
        debug!("Session already in ledger");
        return Ok(duplicate(event));
    }

    let current = require_proposal(&txn, event.proposal_id).await?;
    let before = PaymentState::of(&current);
    let warning = assess(&current, before, event);

    let Some(entry) = ledger::record_entry(&txn, event, warning.clone()).await? else {
        return Ok(duplicate(event));
    };

    let entries = ledger::entries_for_proposal(&txn, current.id).await?;
    let total_paid = ledger::sum_entries(&entries);
    let now = Utc::now();

    let mut update = Proposal::update_many()
        .col_expr(proposal::Column::TotalPaid, Expr::value(total_paid.cents()))
        .col_expr(proposal::Column::UpdatedAt, Expr::value(now))
        .col_expr(
            proposal::Column::Version,
            Expr::col(proposal::Column::Version).add(1),
        );

    let after = if current.status == ProposalStatus::Approved {
        let paid: BTreeSet<PaymentStage> = entries.iter().map(|e| e.stage).collect();
        let after = PaymentState::from_paid_stages(&paid);

        // A stage's timestamp never precedes the stage before it
        let mut floor = None;
        for stage in PaymentStage::ORDERED {
            if !after.has_paid(stage) {
                break;
            }
            let stamped = match paid_at_for(&current, stage) {
                Some(existing) => existing,
                None => {
                    let earliest = entries
                        .iter()
                        .filter(|e| e.stage == stage)
                        .map(|e| e.paid_at)
                        .min()
                        .unwrap_or(event.paid_at);
                    let stamped = floor.map_or(earliest, |f: DateTimeUtc| f.max(earliest));
                    update = update.col_expr(paid_at_column(stage), Expr::value(stamped));
                    stamped
                }
            };
            floor = Some(stamped);
        }

        update = update.col_expr(
            proposal::Column::CurrentPaymentStage,
            Expr::value(after.current_marker()),
        );
        after
    } else {
        before
    };

    let result = update
        .filter(proposal::Column::Id.eq(current.id))
        .filter(proposal::Column::Version.eq(current.version))
        .exec(&txn)
        .await?;

    if result.rows_affected == 0 {
        debug!(version = current.version, "Proposal version moved underneath us");
        return Err(Error::ConcurrentUpdate { id: current.id });
    }

    txn.commit().await?;
    let updated = require_proposal(db, current.id).await?;

    if let Some(warning) = warning {
        warn!(
            entry_id = entry.id,
            amount = %event.amount_charged,
            state = ?after,
            %warning,
            "Payment recorded with reconciliation warning"
        );
        return Ok(ReconcileOutcome::RecordedWithWarning {
            proposal: updated,
            entry,
            warning,
        });
    }

    info!(
        entry_id = entry.id,
        amount = %event.amount_charged,
        total_paid = %total_paid,
        from = ?before,
        to = ?after,
        "Payment reconciled"
    );
    Ok(ReconcileOutcome::Applied {
        proposal: updated,
        entry,
        state: after,
    })
}

/// Describes anything about this payment a human should look at.
fn assess(current: &ProposalModel, state: PaymentState, event: &ConfirmationEvent) -> Option<String> {
    let stage = event.stage;
    let mut notes = Vec::new();

    match state {
        PaymentState::Unapproved | PaymentState::Rejected => notes.push(format!(
            "{} payment received while proposal is {:?}",
            stage.as_str(),
            current.status
        )),
        PaymentState::Completed => notes.push(format!(
            "{} payment received after every stage was paid",
            stage.as_str()
        )),
        PaymentState::DepositDue | PaymentState::ProgressDue | PaymentState::FinalDue => {
            if let Some(due) = state.due_stage()
                && due != stage
            {
                if state.has_paid(stage) {
                    notes.push(format!(
                        "{} already paid; {} is due",
                        stage.as_str(),
                        due.as_str()
                    ));
                } else {
                    notes.push(format!(
                        "{} paid out of order; {} is due",
                        stage.as_str(),
                        due.as_str()
                    ));
                }
            }
            if let Some(expected) = expected_for(current, stage).map(Money::from_cents)
                && expected != event.amount_charged
            {
                notes.push(format!(
                    "charged {} but {} obligation is {expected}",
                    event.amount_charged,
                    stage.as_str()
                ));
            }
        }
    }

    (!notes.is_empty()).then(|| notes.join("; "))
}

const fn paid_at_column(stage: PaymentStage) -> proposal::Column {
    match stage {
        PaymentStage::Deposit => proposal::Column::DepositPaidAt,
        PaymentStage::Progress => proposal::Column::ProgressPaidAt,
        PaymentStage::Final => proposal::Column::FinalPaidAt,
    }
}

fn duplicate(event: &ConfirmationEvent) -> ReconcileOutcome {
    ReconcileOutcome::Duplicate {
        gateway_session_id: event.gateway_session_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use crate::core::ledger::{entries_for_proposal, summarize};
    use crate::entities::{CurrentPaymentStage, PaymentSource};
    use crate::test_utils::*;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_full_payment_sequence() -> Result<()> {
        let db = setup_test_db().await?;
        let proposal = create_approved_proposal(&db, "P-300", 100_000).await?;

        let outcome = reconcile(
            &db,
            &confirmation(&proposal, PaymentStage::Deposit, "cs_dep", 50_000),
        )
        .await?;
        let ReconcileOutcome::Applied { proposal: p, state, .. } = outcome else {
            panic!("expected Applied, got {outcome:?}");
        };
        assert_eq!(state, PaymentState::ProgressDue);
        assert_eq!(p.current_payment_stage, Some(CurrentPaymentStage::Progress));
        assert!(p.deposit_paid_at.is_some());
        assert_eq!(p.total_paid, 50_000);

        reconcile(
            &db,
            &confirmation(&proposal, PaymentStage::Progress, "cs_prog", 30_000),
        )
        .await?;
        let outcome = reconcile(
            &db,
            &confirmation(&proposal, PaymentStage::Final, "cs_fin", 20_000),
        )
        .await?;
        let ReconcileOutcome::Applied { proposal: p, state, .. } = outcome else {
            panic!("expected Applied, got {outcome:?}");
        };
        assert_eq!(state, PaymentState::Completed);
        assert_eq!(p.current_payment_stage, Some(CurrentPaymentStage::Completed));
        assert_eq!(p.total_paid, 100_000);
        assert!(p.final_paid_at.is_some());

        let summary = summarize(&db, proposal.id).await?;
        assert_eq!(summary.remaining, Money::ZERO);
        assert!(summary.cache_consistent);
        Ok(())
    }

    #[tokio::test]
    async fn test_replay_is_a_noop() -> Result<()> {
        let db = setup_test_db().await?;
        let proposal = create_approved_proposal(&db, "P-301", 100_000).await?;
        let event = confirmation(&proposal, PaymentStage::Deposit, "cs_replay", 50_000);

        reconcile(&db, &event).await?;
        let after_first = require_proposal(&db, proposal.id).await?;

        for _ in 0..3 {
            let outcome = reconcile(&db, &event).await?;
            assert!(matches!(outcome, ReconcileOutcome::Duplicate { .. }));
            assert!(outcome.new_entry().is_none());
        }

        let after_replays = require_proposal(&db, proposal.id).await?;
        assert_eq!(after_first, after_replays);
        assert_eq!(entries_for_proposal(&db, proposal.id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_racing_channels_record_once() -> Result<()> {
        let db = setup_test_db().await?;
        let proposal = create_approved_proposal(&db, "P-302", 100_000).await?;

        let webhook = confirmation(&proposal, PaymentStage::Deposit, "cs_race", 50_000);
        let mut redirect = webhook.clone();
        redirect.source = PaymentSource::Redirect;

        let (a, b) = tokio::join!(reconcile(&db, &webhook), reconcile(&db, &redirect));
        let outcomes = [a?, b?];

        let recorded = outcomes.iter().filter(|o| o.new_entry().is_some()).count();
        let duplicates = outcomes
            .iter()
            .filter(|o| matches!(o, ReconcileOutcome::Duplicate { .. }))
            .count();
        assert_eq!(recorded, 1);
        assert_eq!(duplicates, 1);

        let current = require_proposal(&db, proposal.id).await?;
        assert_eq!(current.total_paid, 50_000);
        assert_eq!(current.current_payment_stage, Some(CurrentPaymentStage::Progress));
        assert_eq!(entries_for_proposal(&db, proposal.id).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_out_of_order_stage_is_recorded_then_promoted() -> Result<()> {
        let db = setup_test_db().await?;
        let proposal = create_approved_proposal(&db, "P-303", 100_000).await?;

        let mut early = confirmation(&proposal, PaymentStage::Progress, "cs_early", 30_000);
        early.paid_at = Utc::now() - ChronoDuration::hours(2);
        let outcome = reconcile(&db, &early).await?;
        let ReconcileOutcome::RecordedWithWarning { proposal: p, warning, .. } = outcome else {
            panic!("expected warning, got {outcome:?}");
        };
        assert!(warning.contains("out of order"));
        assert_eq!(p.current_payment_stage, Some(CurrentPaymentStage::Deposit));
        assert!(p.progress_paid_at.is_none());
        assert_eq!(p.total_paid, 30_000);

        let deposit = confirmation(&proposal, PaymentStage::Deposit, "cs_late_dep", 50_000);
        let outcome = reconcile(&db, &deposit).await?;
        let ReconcileOutcome::Applied { proposal: p, state, .. } = outcome else {
            panic!("expected Applied, got {outcome:?}");
        };
        assert_eq!(state, PaymentState::FinalDue);
        assert_eq!(p.current_payment_stage, Some(CurrentPaymentStage::Final));
        assert_eq!(p.total_paid, 80_000);

        let deposit_at = p.deposit_paid_at.unwrap();
        let progress_at = p.progress_paid_at.unwrap();
        assert!(progress_at >= deposit_at);
        Ok(())
    }

    #[tokio::test]
    async fn test_payment_for_unapproved_proposal_never_advances() -> Result<()> {
        let db = setup_test_db().await?;
        let draft = create_test_proposal(&db, "P-304", 10_000, 0).await?;

        let outcome = reconcile(
            &db,
            &confirmation(&draft, PaymentStage::Deposit, "cs_draft", 5_000),
        )
        .await?;
        let ReconcileOutcome::RecordedWithWarning { proposal: p, entry, .. } = outcome else {
            panic!("expected warning, got {outcome:?}");
        };
        assert_eq!(p.status, ProposalStatus::Draft);
        assert!(p.deposit_paid_at.is_none());
        assert!(p.current_payment_stage.is_none());
        assert!(entry.reconciliation_warning.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_amount_mismatch_still_pays_stage() -> Result<()> {
        let db = setup_test_db().await?;
        let proposal = create_approved_proposal(&db, "P-305", 100_000).await?;

        let outcome = reconcile(
            &db,
            &confirmation(&proposal, PaymentStage::Deposit, "cs_short", 49_000),
        )
        .await?;
        let ReconcileOutcome::RecordedWithWarning { proposal: p, warning, .. } = outcome else {
            panic!("expected warning, got {outcome:?}");
        };
        assert!(warning.contains("obligation"));
        assert!(p.deposit_paid_at.is_some());
        assert_eq!(p.current_payment_stage, Some(CurrentPaymentStage::Progress));
        Ok(())
    }

    #[tokio::test]
    async fn test_second_payment_for_paid_stage_is_flagged() -> Result<()> {
        let db = setup_test_db().await?;
        let proposal = create_approved_proposal(&db, "P-306", 100_000).await?;

        reconcile(
            &db,
            &confirmation(&proposal, PaymentStage::Deposit, "cs_a", 50_000),
        )
        .await?;
        let first = require_proposal(&db, proposal.id).await?;

        let outcome = reconcile(
            &db,
            &confirmation(&proposal, PaymentStage::Deposit, "cs_b", 50_000),
        )
        .await?;
        let ReconcileOutcome::RecordedWithWarning { proposal: p, warning, .. } = outcome else {
            panic!("expected warning, got {outcome:?}");
        };
        assert!(warning.contains("already paid"));
        assert_eq!(p.deposit_paid_at, first.deposit_paid_at);
        assert_eq!(p.current_payment_stage, Some(CurrentPaymentStage::Progress));
        assert_eq!(p.total_paid, 100_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_proposal() -> Result<()> {
        let db = setup_test_db().await?;
        let ghost = sample_proposal();
        let result = reconcile(
            &db,
            &confirmation(&ghost, PaymentStage::Deposit, "cs_ghost", 1_000),
        )
        .await;
        assert!(matches!(result, Err(Error::ProposalNotFound { .. })));
        Ok(())
    }
}
