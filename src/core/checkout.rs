//! Payment session initiator.
//!
//! Opens a hosted checkout for the stage that is currently due. Nothing is
//! written here: a proposal only moves forward when the reconciler sees a
//! confirmed payment, never because a checkout page was opened.

use crate::{
    config::payments::PaymentsConfig,
    core::{
        ledger::expected_for, money::Money, payment_state::PaymentState,
        proposal::require_proposal,
    },
    entities::{PaymentStage, ProposalModel, ProposalStatus},
    errors::{Error, Result},
    gateway::{CheckoutRequest, PaymentGateway, PaymentMethod, StageMetadata},
};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// What the caller wants to pay.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutOptions {
    /// Stage to pay; must be the one currently due
    pub stage: PaymentStage,
    /// How the customer will pay
    #[serde(default)]
    pub payment_method: PaymentMethod,
    /// Email to prefill; falls back to the proposal's customer email
    #[serde(default)]
    pub customer_email: Option<String>,
}

/// Where to send the customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutRedirect {
    /// Gateway session id
    pub session_id: String,
    /// Hosted checkout page
    pub checkout_url: String,
    /// Stage being paid
    pub stage: PaymentStage,
    /// Amount the customer will be charged
    pub amount: Money,
}

/// Creates a gateway checkout session for the due stage of a proposal.
#[instrument(skip(db, gateway, config), fields(stage = %options.stage))]
pub async fn initiate_checkout(
    db: &DatabaseConnection,
    gateway: &dyn PaymentGateway,
    config: &PaymentsConfig,
    proposal_id: i64,
    options: CheckoutOptions,
) -> Result<CheckoutRedirect> {
    let proposal = require_proposal(db, proposal_id).await?;
    if proposal.status != ProposalStatus::Approved {
        return Err(Error::InvalidProposalStatus {
            id: proposal.id,
            status: proposal.status,
            expected: vec![ProposalStatus::Approved],
        });
    }

    let due = PaymentState::of(&proposal).due_stage();
    if due != Some(options.stage) {
        return Err(Error::StageLocked {
            proposal_id,
            requested: options.stage,
            due,
        });
    }

    if !config.allows(options.payment_method) {
        return Err(Error::InvalidInput {
            message: format!("payment method {} is not enabled", options.payment_method),
        });
    }

    let amount = Money::from_cents(expected_for(&proposal, options.stage).unwrap_or(0));
    if !amount.is_positive() {
        return Err(Error::InvalidAmount { amount });
    }

    let request = build_request(config, &proposal, &options, amount);
    let session = gateway.create_checkout_session(request).await?;

    info!(
        proposal_id,
        session_id = %session.id,
        amount = %amount,
        method = %options.payment_method,
        "Checkout session opened"
    );

    Ok(CheckoutRedirect {
        session_id: session.id,
        checkout_url: session.url,
        stage: options.stage,
        amount,
    })
}

/// Return URL the gateway sends the customer to after paying. The gateway
/// substitutes its own session id for the placeholder.
#[must_use]
pub fn success_url(config: &PaymentsConfig, proposal_id: i64) -> String {
    format!(
        "{}/payments/success?session_id={{CHECKOUT_SESSION_ID}}&proposal_id={proposal_id}",
        config.base_url()
    )
}

/// Customer-facing proposal page, with an optional `payment` outcome flag.
#[must_use]
pub fn proposal_view_url(config: &PaymentsConfig, view_token: &str, outcome: &str) -> String {
    format!(
        "{}/proposal/view/{view_token}?payment={outcome}",
        config.base_url()
    )
}

fn build_request(
    config: &PaymentsConfig,
    proposal: &ProposalModel,
    options: &CheckoutOptions,
    amount: Money,
) -> CheckoutRequest {
    let customer_email = options
        .customer_email
        .clone()
        .filter(|e| !e.trim().is_empty())
        .or_else(|| proposal.customer_email.clone());

    CheckoutRequest {
        amount,
        currency: config.currency.clone(),
        product_name: format!("{} {} Payment", config.business_name, options.stage.label()),
        description: format!("{} - {}", proposal.proposal_number, proposal.title),
        customer_email,
        payment_method: options.payment_method,
        success_url: success_url(config, proposal.id),
        cancel_url: proposal_view_url(config, &proposal.customer_view_token, "cancelled"),
        metadata: StageMetadata {
            proposal_id: proposal.id,
            stage: options.stage,
            payment_method: options.payment_method,
        },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::core::reconcile::reconcile;
    use crate::test_utils::*;

    fn options(stage: PaymentStage) -> CheckoutOptions {
        CheckoutOptions {
            stage,
            payment_method: PaymentMethod::Card,
            customer_email: None,
        }
    }

    #[tokio::test]
    async fn test_checkout_for_due_stage() -> Result<()> {
        let db = setup_test_db().await?;
        let gateway = FakeGateway::default();
        let config = PaymentsConfig::default();
        let proposal = create_approved_proposal(&db, "P-400", 100_000).await?;

        let redirect =
            initiate_checkout(&db, &gateway, &config, proposal.id, options(PaymentStage::Deposit))
                .await?;
        assert_eq!(redirect.amount, Money::from_cents(50_000));
        assert!(redirect.checkout_url.contains(&redirect.session_id));

        let requests = gateway.checkout_requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.amount, Money::from_cents(50_000));
        assert_eq!(request.metadata.proposal_id, proposal.id);
        assert_eq!(request.metadata.stage, PaymentStage::Deposit);
        assert!(request.success_url.contains("{CHECKOUT_SESSION_ID}"));
        assert!(
            request
                .cancel_url
                .ends_with(&format!("/proposal/view/{}?payment=cancelled", proposal.customer_view_token))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_checkout_does_not_touch_payment_state() -> Result<()> {
        let db = setup_test_db().await?;
        let gateway = FakeGateway::default();
        let proposal = create_approved_proposal(&db, "P-401", 100_000).await?;

        initiate_checkout(
            &db,
            &gateway,
            &PaymentsConfig::default(),
            proposal.id,
            options(PaymentStage::Deposit),
        )
        .await?;

        let after = require_proposal(&db, proposal.id).await?;
        assert_eq!(after, proposal);
        Ok(())
    }

    #[tokio::test]
    async fn test_out_of_order_stage_is_locked() -> Result<()> {
        let db = setup_test_db().await?;
        let gateway = FakeGateway::default();
        let config = PaymentsConfig::default();
        let proposal = create_approved_proposal(&db, "P-402", 100_000).await?;

        let result =
            initiate_checkout(&db, &gateway, &config, proposal.id, options(PaymentStage::Final))
                .await;
        assert!(matches!(
            result,
            Err(Error::StageLocked {
                requested: PaymentStage::Final,
                due: Some(PaymentStage::Deposit),
                ..
            })
        ));

        reconcile(
            &db,
            &confirmation(&proposal, PaymentStage::Deposit, "cs_paid", 50_000),
        )
        .await?;

        // Already paid
        let result =
            initiate_checkout(&db, &gateway, &config, proposal.id, options(PaymentStage::Deposit))
                .await;
        assert!(matches!(result, Err(Error::StageLocked { .. })));

        let redirect =
            initiate_checkout(&db, &gateway, &config, proposal.id, options(PaymentStage::Progress))
                .await?;
        assert_eq!(redirect.amount, Money::from_cents(30_000));
        assert_eq!(gateway.checkout_requests().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_unapproved_proposal_cannot_check_out() -> Result<()> {
        let db = setup_test_db().await?;
        let gateway = FakeGateway::default();
        let draft = create_test_proposal(&db, "P-403", 10_000, 0).await?;

        let result = initiate_checkout(
            &db,
            &gateway,
            &PaymentsConfig::default(),
            draft.id,
            options(PaymentStage::Deposit),
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidProposalStatus { .. })));
        assert!(gateway.checkout_requests().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_disabled_payment_method_rejected() -> Result<()> {
        let db = setup_test_db().await?;
        let gateway = FakeGateway::default();
        let config = PaymentsConfig {
            payment_methods: vec![PaymentMethod::Card],
            ..PaymentsConfig::default()
        };
        let proposal = create_approved_proposal(&db, "P-404", 100_000).await?;

        let result = initiate_checkout(
            &db,
            &gateway,
            &config,
            proposal.id,
            CheckoutOptions {
                payment_method: PaymentMethod::Ach,
                ..options(PaymentStage::Deposit)
            },
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidInput { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_email_falls_back_to_proposal() -> Result<()> {
        let db = setup_test_db().await?;
        let gateway = FakeGateway::default();
        let proposal = create_approved_proposal(&db, "P-405", 100_000).await?;

        initiate_checkout(
            &db,
            &gateway,
            &PaymentsConfig::default(),
            proposal.id,
            options(PaymentStage::Deposit),
        )
        .await?;
        initiate_checkout(
            &db,
            &gateway,
            &PaymentsConfig::default(),
            proposal.id,
            CheckoutOptions {
                customer_email: Some("payer@example.com".to_string()),
                ..options(PaymentStage::Deposit)
            },
        )
        .await?;

        let requests = gateway.checkout_requests();
        assert_eq!(requests[0].customer_email, proposal.customer_email);
        assert_eq!(requests[1].customer_email.as_deref(), Some("payer@example.com"));
        Ok(())
    }

    #[test]
    fn test_urls_trim_trailing_slash() {
        let config = PaymentsConfig {
            app_base_url: "https://jobs.example.com/".to_string(),
            ..PaymentsConfig::default()
        };
        assert_eq!(
            success_url(&config, 12),
            "https://jobs.example.com/payments/success?session_id={CHECKOUT_SESSION_ID}&proposal_id=12"
        );
        assert_eq!(
            proposal_view_url(&config, "tok", "success"),
            "https://jobs.example.com/proposal/view/tok?payment=success"
        );
    }
}
