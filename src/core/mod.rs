//! Core business logic - framework-agnostic proposal payment operations.
//!
//! Nothing in here knows about HTTP. Handlers in `api` call these functions
//! with a database connection and, where a gateway is involved, a
//! [`PaymentGateway`](crate::gateway::PaymentGateway).

/// Payment session initiator
pub mod checkout;
/// Normalizing gateway confirmations from both intake channels
pub mod intake;
/// Append-only payment ledger and the balance read model
pub mod ledger;
/// Integer-cent money type
pub mod money;
/// Payment lifecycle state machine
pub mod payment_state;
/// Proposal lifecycle: create, send, price, approve, reject
pub mod proposal;
/// Applying confirmations to proposals exactly once
pub mod reconcile;
/// Stage calculator
pub mod stages;
