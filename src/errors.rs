//! Unified error type for the payment lifecycle service.
//!
//! Every fallible operation in the crate returns [`Result`]. Duplicate gateway
//! confirmations are deliberately absent here: replaying an already-recorded
//! session is a successful no-op, reported through
//! [`ReconcileOutcome::Duplicate`](crate::core::reconcile::ReconcileOutcome::Duplicate).

use crate::core::money::Money;
use crate::entities::{PaymentStage, ProposalStatus};
use thiserror::Error;

/// All errors produced by the service.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be read, parsed or validated
    #[error("Configuration error: {message}")]
    Config {
        /// What went wrong
        message: String,
    },

    /// Underlying database failure
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Caller supplied a value that fails validation
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// What was wrong with the input
        message: String,
    },

    /// No proposal with this id exists
    #[error("Proposal not found: {id}")]
    ProposalNotFound {
        /// Requested proposal id
        id: i64,
    },

    /// A monetary amount that must be positive was not
    #[error("Invalid amount: {amount}")]
    InvalidAmount {
        /// The offending amount
        amount: Money,
    },

    /// The proposal is not in a status that allows the requested action
    #[error("Proposal {id} is {status:?}, expected one of {expected:?}")]
    InvalidProposalStatus {
        /// Proposal id
        id: i64,
        /// Current status
        status: ProposalStatus,
        /// Statuses that would have allowed the action
        expected: Vec<ProposalStatus>,
    },

    /// Pricing edits are not allowed once the proposal is approved
    #[error("Proposal {id} total is frozen after approval")]
    TotalFrozen {
        /// Proposal id
        id: i64,
    },

    /// Stage obligations failed to sum exactly to the proposal total
    #[error(
        "Stage obligations {deposit} + {progress} + {final_amount} do not sum to total {total}"
    )]
    RoundingInvariantViolation {
        /// Proposal total
        total: Money,
        /// Deposit obligation
        deposit: Money,
        /// Progress obligation
        progress: Money,
        /// Final obligation
        final_amount: Money,
    },

    /// A stage was requested out of order or after it was already paid
    #[error("Stage {requested} is locked for proposal {proposal_id} (next due: {due:?})")]
    StageLocked {
        /// Proposal id
        proposal_id: i64,
        /// Stage that was requested
        requested: PaymentStage,
        /// Stage that is actually due, if any
        due: Option<PaymentStage>,
    },

    /// Asynchronous notification failed signature verification
    #[error("Invalid webhook signature: {reason}")]
    InvalidSignature {
        /// Why verification failed
        reason: String,
    },

    /// Redirect re-query showed the session was not paid
    #[error(
        "Gateway session {session_id} is not completed (status: {status:?}, payment status: {payment_status})"
    )]
    SessionNotCompleted {
        /// Gateway session id
        session_id: String,
        /// Session status (`open`, `complete`, `expired`), if reported
        status: Option<String>,
        /// Payment status reported by the gateway
        payment_status: String,
    },

    /// A payment event could not be attributed to a proposal and stage
    #[error("Malformed payment event: {message}")]
    MalformedEvent {
        /// What was missing or invalid
        message: String,
    },

    /// Another writer updated the proposal between read and write
    #[error("Concurrent update detected on proposal {id}")]
    ConcurrentUpdate {
        /// Proposal id
        id: i64,
    },

    /// The payment gateway rejected or failed a request
    #[error("Payment gateway error: {message}")]
    Gateway {
        /// HTTP status returned by the gateway, if it answered
        status: Option<u16>,
        /// Gateway response summary
        message: String,
    },

    /// HTTP transport failure talking to the gateway
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Required environment variable missing or invalid
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
