//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod payment;
pub mod proposal;

// Re-export specific types to avoid conflicts
pub use payment::{
    Column as PaymentColumn, Entity as Payment, Model as PaymentModel, PaymentSource,
    PaymentStage, PaymentStatus,
};
pub use proposal::{
    Column as ProposalColumn, CurrentPaymentStage, Entity as Proposal, Model as ProposalModel,
    ProposalStatus,
};
