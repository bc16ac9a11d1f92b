//! Shared test utilities.
//!
//! Helpers for setting up an in-memory database, creating proposals with
//! sensible defaults, building confirmation events, and an in-memory
//! [`PaymentGateway`] double.

#![allow(clippy::unwrap_used)]

use crate::{
    core::{
        intake::ConfirmationEvent,
        money::Money,
        proposal::{self, NewProposal},
        stages::StageSplits,
    },
    entities::{PaymentModel, PaymentSource, PaymentStage, ProposalModel, ProposalStatus},
    errors::{Error, Result},
    gateway::{
        CheckoutRequest, CheckoutSession, GatewaySession, METADATA_PAYMENT_METHOD,
        METADATA_PROPOSAL_ID, METADATA_STAGE, PaymentGateway,
    },
    notify::PaymentNotifier,
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::DatabaseConnection;
use std::collections::HashMap;
use std::sync::Mutex;

/// Creates an in-memory `SQLite` database with all tables initialized.
/// This is the standard setup for all integration tests.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = sea_orm::Database::connect("sqlite::memory:").await?;
    crate::config::database::create_tables(&db).await?;
    Ok(db)
}

/// An unsaved draft proposal for pure state tests.
///
/// # Defaults
/// * `id`: 4242 (never present in a fresh test database)
/// * `total`: 100000 cents
/// * `status`: draft, nothing paid
pub fn sample_proposal() -> ProposalModel {
    let now = Utc::now();
    ProposalModel {
        id: 4242,
        proposal_number: "P-SAMPLE".to_string(),
        title: "Sample work".to_string(),
        customer_email: Some("customer@example.com".to_string()),
        customer_view_token: "sampletoken".to_string(),
        subtotal: 100_000,
        tax_amount: 0,
        total: 100_000,
        status: ProposalStatus::Draft,
        customer_notes: None,
        approved_at: None,
        rejected_at: None,
        deposit_amount: None,
        progress_amount: None,
        final_amount: None,
        deposit_paid_at: None,
        progress_paid_at: None,
        final_paid_at: None,
        current_payment_stage: None,
        total_paid: 0,
        version: 0,
        created_at: now,
        updated_at: now,
    }
}

/// Creates a draft proposal.
///
/// # Defaults
/// * `title`: "Test job"
/// * `customer_email`: "customer@example.com"
pub async fn create_test_proposal(
    db: &DatabaseConnection,
    number: &str,
    subtotal_cents: i64,
    tax_cents: i64,
) -> Result<ProposalModel> {
    proposal::create_proposal(
        db,
        NewProposal {
            proposal_number: number.to_string(),
            title: "Test job".to_string(),
            customer_email: Some("customer@example.com".to_string()),
            subtotal: Money::from_cents(subtotal_cents),
            tax_amount: Money::from_cents(tax_cents),
        },
    )
    .await
}

/// Creates a proposal and approves it with the default 50/30/20 split.
pub async fn create_approved_proposal(
    db: &DatabaseConnection,
    number: &str,
    total_cents: i64,
) -> Result<ProposalModel> {
    let draft = create_test_proposal(db, number, total_cents, 0).await?;
    proposal::approve_proposal(db, &StageSplits::default(), draft.id, None).await
}

/// A webhook confirmation for `proposal` paid now.
///
/// The transaction id is `pi_{session_id}`.
pub fn confirmation(
    proposal: &ProposalModel,
    stage: PaymentStage,
    session_id: &str,
    amount_cents: i64,
) -> ConfirmationEvent {
    ConfirmationEvent {
        gateway_session_id: session_id.to_string(),
        gateway_transaction_id: Some(format!("pi_{session_id}")),
        proposal_id: proposal.id,
        stage,
        amount_charged: Money::from_cents(amount_cents),
        payment_method: Some("card".to_string()),
        customer_email: proposal.customer_email.clone(),
        source: PaymentSource::Webhook,
        paid_at: Utc::now(),
    }
}

/// A paid gateway session carrying the given metadata.
///
/// `stage` is the raw metadata string so tests can use aliases and garbage.
pub fn paid_session(
    session_id: &str,
    proposal_id: i64,
    stage: &str,
    amount_cents: i64,
) -> GatewaySession {
    GatewaySession {
        id: session_id.to_string(),
        payment_status: "paid".to_string(),
        status: Some("complete".to_string()),
        amount_total: Some(amount_cents),
        payment_intent: Some(format!("pi_{session_id}")),
        customer_email: Some("customer@example.com".to_string()),
        customer_details: None,
        metadata: HashMap::from([
            (METADATA_PROPOSAL_ID.to_string(), proposal_id.to_string()),
            (METADATA_STAGE.to_string(), stage.to_string()),
            (METADATA_PAYMENT_METHOD.to_string(), "card".to_string()),
        ]),
    }
}

/// In-memory gateway. Created checkout sessions start unpaid; tests mark
/// them paid with [`FakeGateway::complete`] or seed sessions directly.
#[derive(Debug, Default)]
pub struct FakeGateway {
    sessions: Mutex<HashMap<String, GatewaySession>>,
    requests: Mutex<Vec<CheckoutRequest>>,
}

impl FakeGateway {
    /// Makes `session` retrievable.
    pub fn insert_session(&self, session: GatewaySession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    /// Marks a previously created session as paid and returns it.
    pub fn complete(&self, session_id: &str) -> GatewaySession {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(session_id).unwrap();
        session.payment_status = "paid".to_string();
        session.status = Some("complete".to_string());
        session.payment_intent = Some(format!("pi_{session_id}"));
        session.clone()
    }

    /// Every checkout request received, oldest first
    pub fn checkout_requests(&self) -> Vec<CheckoutRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn create_checkout_session(&self, request: CheckoutRequest) -> Result<CheckoutSession> {
        let mut requests = self.requests.lock().unwrap();
        let id = format!("cs_test_{}", requests.len() + 1);

        let session = GatewaySession {
            id: id.clone(),
            payment_status: "unpaid".to_string(),
            status: Some("open".to_string()),
            amount_total: Some(request.amount.cents()),
            payment_intent: None,
            customer_email: request.customer_email.clone(),
            customer_details: None,
            metadata: request
                .metadata
                .to_pairs()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        };
        self.insert_session(session);
        requests.push(request);

        Ok(CheckoutSession {
            url: format!("https://checkout.test/pay/{id}"),
            id,
        })
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<GatewaySession> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::Gateway {
                status: Some(404),
                message: format!("No such checkout.session: '{session_id}'"),
            })
    }
}

/// Notifier that remembers which sessions it was told about.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sessions: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    /// Session ids notified so far, in order
    pub fn sessions(&self) -> Vec<String> {
        self.sessions.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentNotifier for RecordingNotifier {
    async fn payment_received(&self, _proposal: &ProposalModel, entry: &PaymentModel) {
        self.sessions
            .lock()
            .unwrap()
            .push(entry.gateway_session_id.clone());
    }
}
