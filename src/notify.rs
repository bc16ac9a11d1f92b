//! Payment-received notifications.
//!
//! Called once per newly recorded ledger row, after the reconciliation
//! transaction has committed. Duplicate confirmations never notify.
//! Delivery (email, chat) lives outside this service; the shipped
//! implementation emits a structured log event that a collector can route.

use crate::{
    core::{money::Money, reconcile::ReconcileOutcome},
    entities::{PaymentModel, ProposalModel},
};
use async_trait::async_trait;
use tracing::info;

/// Receives a callback for every payment that was newly recorded.
#[async_trait]
pub trait PaymentNotifier: Send + Sync {
    /// A payment was recorded against `proposal`.
    async fn payment_received(&self, proposal: &ProposalModel, entry: &PaymentModel);
}

/// Notifier that writes a `tracing` event per payment.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl PaymentNotifier for LogNotifier {
    async fn payment_received(&self, proposal: &ProposalModel, entry: &PaymentModel) {
        info!(
            target: "payment_notification",
            proposal_number = %proposal.proposal_number,
            customer_email = proposal.customer_email.as_deref().unwrap_or("-"),
            stage = entry.stage.label(),
            amount = %Money::from_cents(entry.amount),
            reference = %short_reference(entry),
            method = entry.payment_method.as_deref().unwrap_or("card"),
            "Payment received"
        );
    }
}

/// Notifies for the row `outcome` created, if it created one.
pub async fn notify_outcome(notifier: &dyn PaymentNotifier, outcome: &ReconcileOutcome) {
    if let (Some(proposal), Some(entry)) = (outcome.proposal(), outcome.new_entry()) {
        notifier.payment_received(proposal, entry).await;
    }
}

/// Last eight characters of the transaction id (or session id), upper-cased.
#[must_use]
pub fn short_reference(entry: &PaymentModel) -> String {
    let id = entry
        .gateway_transaction_id
        .as_deref()
        .unwrap_or(&entry.gateway_session_id);
    let start = id.char_indices().rev().nth(7).map_or(0, |(i, _)| i);
    id[start..].to_ascii_uppercase()
}
