//! Payment state machine.
//!
//! A proposal's payment progress is persisted as nullable stage timestamps
//! plus a `current_payment_stage` pointer. This module turns that into one
//! explicit state and owns every ordering rule, so no other code needs to
//! check "deposit paid but progress not" by hand.
//!
//! ```text
//! unapproved -> deposit_due -> progress_due -> final_due -> completed
//!      \
//!       `-> rejected
//! ```

use crate::entities::{CurrentPaymentStage, PaymentStage, ProposalModel, ProposalStatus};
use serde::Serialize;
use std::collections::BTreeSet;

/// Where a proposal is in its payment lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    /// Draft or sent; no obligations exist yet
    Unapproved,
    /// Approved, nothing paid
    DepositDue,
    /// Deposit paid
    ProgressDue,
    /// Deposit and progress paid
    FinalDue,
    /// All three stages paid (terminal)
    Completed,
    /// Customer declined (terminal)
    Rejected,
}

impl PaymentState {
    /// Derives the state from a stored proposal's status and stage timestamps.
    ///
    /// Timestamps are read strictly in order: a later stage timestamp without
    /// its predecessor does not count.
    #[must_use]
    pub const fn of(proposal: &ProposalModel) -> Self {
        match proposal.status {
            ProposalStatus::Draft | ProposalStatus::Sent => Self::Unapproved,
            ProposalStatus::Rejected => Self::Rejected,
            ProposalStatus::Approved => {
                if proposal.deposit_paid_at.is_none() {
                    Self::DepositDue
                } else if proposal.progress_paid_at.is_none() {
                    Self::ProgressDue
                } else if proposal.final_paid_at.is_none() {
                    Self::FinalDue
                } else {
                    Self::Completed
                }
            }
        }
    }

    /// Derives the state for an approved proposal from the set of stages that
    /// have at least one ledger row. A stage only counts once every earlier
    /// stage counts.
    #[must_use]
    pub fn from_paid_stages(paid: &BTreeSet<PaymentStage>) -> Self {
        let mut state = Self::DepositDue;
        for stage in PaymentStage::ORDERED {
            if !paid.contains(&stage) {
                break;
            }
            state = state.after_paying(stage);
        }
        state
    }

    /// The stage a customer may pay next, if any
    #[must_use]
    pub const fn due_stage(self) -> Option<PaymentStage> {
        match self {
            Self::DepositDue => Some(PaymentStage::Deposit),
            Self::ProgressDue => Some(PaymentStage::Progress),
            Self::FinalDue => Some(PaymentStage::Final),
            Self::Unapproved | Self::Completed | Self::Rejected => None,
        }
    }

    /// True when `stage` has been paid in this state
    #[must_use]
    pub fn has_paid(self, stage: PaymentStage) -> bool {
        match self.due_stage() {
            Some(due) => stage < due,
            None => self == Self::Completed,
        }
    }

    /// State after paying `stage`. Paying anything other than the due stage
    /// leaves the state unchanged.
    #[must_use]
    pub fn after_paying(self, stage: PaymentStage) -> Self {
        if self.due_stage() != Some(stage) {
            return self;
        }
        match stage.next() {
            Some(PaymentStage::Progress) => Self::ProgressDue,
            Some(PaymentStage::Final) => Self::FinalDue,
            Some(PaymentStage::Deposit) | None => Self::Completed,
        }
    }

    /// Value persisted in `current_payment_stage`
    #[must_use]
    pub const fn current_marker(self) -> Option<CurrentPaymentStage> {
        match self {
            Self::DepositDue => Some(CurrentPaymentStage::Deposit),
            Self::ProgressDue => Some(CurrentPaymentStage::Progress),
            Self::FinalDue => Some(CurrentPaymentStage::Final),
            Self::Completed => Some(CurrentPaymentStage::Completed),
            Self::Unapproved | Self::Rejected => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::sample_proposal;
    use chrono::Utc;

    #[test]
    fn test_state_from_status() {
        let mut proposal = sample_proposal();
        assert_eq!(PaymentState::of(&proposal), PaymentState::Unapproved);

        proposal.status = ProposalStatus::Rejected;
        assert_eq!(PaymentState::of(&proposal), PaymentState::Rejected);

        proposal.status = ProposalStatus::Approved;
        assert_eq!(PaymentState::of(&proposal), PaymentState::DepositDue);
    }

    #[test]
    fn test_state_from_timestamps() {
        let mut proposal = sample_proposal();
        proposal.status = ProposalStatus::Approved;
        let now = Utc::now();

        proposal.deposit_paid_at = Some(now);
        assert_eq!(PaymentState::of(&proposal), PaymentState::ProgressDue);

        proposal.progress_paid_at = Some(now);
        assert_eq!(PaymentState::of(&proposal), PaymentState::FinalDue);

        proposal.final_paid_at = Some(now);
        assert_eq!(PaymentState::of(&proposal), PaymentState::Completed);
    }

    #[test]
    fn test_later_timestamp_without_predecessor_is_ignored() {
        let mut proposal = sample_proposal();
        proposal.status = ProposalStatus::Approved;
        proposal.progress_paid_at = Some(Utc::now());
        assert_eq!(PaymentState::of(&proposal), PaymentState::DepositDue);
    }

    #[test]
    fn test_full_transition_sequence() {
        let mut state = PaymentState::DepositDue;
        let mut seen = vec![state];
        for stage in PaymentStage::ORDERED {
            state = state.after_paying(stage);
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                PaymentState::DepositDue,
                PaymentState::ProgressDue,
                PaymentState::FinalDue,
                PaymentState::Completed,
            ]
        );
    }

    #[test]
    fn test_out_of_order_payment_does_not_advance() {
        assert_eq!(
            PaymentState::DepositDue.after_paying(PaymentStage::Progress),
            PaymentState::DepositDue
        );
        assert_eq!(
            PaymentState::FinalDue.after_paying(PaymentStage::Deposit),
            PaymentState::FinalDue
        );
        assert_eq!(
            PaymentState::Unapproved.after_paying(PaymentStage::Deposit),
            PaymentState::Unapproved
        );
    }

    #[test]
    fn test_from_paid_stages_requires_predecessors() {
        let only_progress: BTreeSet<_> = [PaymentStage::Progress].into();
        assert_eq!(
            PaymentState::from_paid_stages(&only_progress),
            PaymentState::DepositDue
        );

        let deposit_and_progress: BTreeSet<_> =
            [PaymentStage::Deposit, PaymentStage::Progress].into();
        assert_eq!(
            PaymentState::from_paid_stages(&deposit_and_progress),
            PaymentState::FinalDue
        );

        let all: BTreeSet<_> = PaymentStage::ORDERED.into();
        assert_eq!(PaymentState::from_paid_stages(&all), PaymentState::Completed);
    }

    #[test]
    fn test_has_paid_and_markers() {
        assert!(PaymentState::FinalDue.has_paid(PaymentStage::Deposit));
        assert!(PaymentState::FinalDue.has_paid(PaymentStage::Progress));
        assert!(!PaymentState::FinalDue.has_paid(PaymentStage::Final));
        assert!(PaymentState::Completed.has_paid(PaymentStage::Final));
        assert!(!PaymentState::Unapproved.has_paid(PaymentStage::Deposit));

        assert_eq!(
            PaymentState::ProgressDue.current_marker(),
            Some(CurrentPaymentStage::Progress)
        );
        assert_eq!(PaymentState::Unapproved.current_marker(), None);
        assert_eq!(
            PaymentState::Completed.current_marker(),
            Some(CurrentPaymentStage::Completed)
        );
    }
}
