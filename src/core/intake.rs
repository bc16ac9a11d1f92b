//! Confirmation intake.
//!
//! Two independent channels report that a stage was paid: the gateway's
//! signed webhook and the customer's browser returning from checkout. Both
//! normalize to a [`ConfirmationEvent`] here and hand it to the reconciler.
//! Neither channel trusts the customer: the webhook is signature-checked and
//! the redirect re-queries the gateway by session id.

use crate::{
    core::money::Money,
    entities::{PaymentSource, PaymentStage},
    errors::{Error, Result},
    gateway::{
        GatewaySession, METADATA_PAYMENT_METHOD, METADATA_PROPOSAL_ID, METADATA_STAGE,
        PaymentGateway, signature::WebhookVerifier,
    },
};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

/// Gateway event fired when a hosted checkout finishes
pub const EVENT_SESSION_COMPLETED: &str = "checkout.session.completed";
/// Gateway event fired when a delayed (bank debit) payment settles
pub const EVENT_ASYNC_PAYMENT_SUCCEEDED: &str = "checkout.session.async_payment_succeeded";

/// A normalized "stage X of proposal Y was paid" fact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationEvent {
    /// Gateway session id; the idempotency key
    pub gateway_session_id: String,
    /// Gateway transaction id, when known
    pub gateway_transaction_id: Option<String>,
    /// Proposal the payment is for
    pub proposal_id: i64,
    /// Stage the payment is attributed to
    pub stage: PaymentStage,
    /// Amount the gateway actually collected
    pub amount_charged: Money,
    /// Payment method reported in metadata
    pub payment_method: Option<String>,
    /// Customer email as seen by the gateway
    pub customer_email: Option<String>,
    /// Which channel delivered the event
    pub source: PaymentSource,
    /// When the payment happened
    pub paid_at: DateTime<Utc>,
}

/// Result of parsing a verified webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookDisposition {
    /// A paid checkout to hand to the reconciler
    Confirmed(ConfirmationEvent),
    /// Verified but not a payment completion; acknowledge and drop
    Ignored {
        /// Gateway event type
        event_type: String,
        /// Why it was not acted on
        reason: String,
    },
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: Option<i64>,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: serde_json::Value,
}

/// Builds a confirmation event from a paid gateway session.
///
/// Attribution comes from the session metadata. Missing or unparseable
/// proposal id or stage, and a missing amount, make the event malformed.
pub fn event_from_session(
    session: &GatewaySession,
    source: PaymentSource,
    paid_at: DateTime<Utc>,
) -> Result<ConfirmationEvent> {
    let proposal_id = session
        .metadata
        .get(METADATA_PROPOSAL_ID)
        .ok_or_else(|| malformed(format!("session {} has no proposal_id metadata", session.id)))?
        .trim()
        .parse::<i64>()
        .map_err(|e| malformed(format!("session {} proposal_id: {e}", session.id)))?;

    let stage = session
        .metadata
        .get(METADATA_STAGE)
        .ok_or_else(|| malformed(format!("session {} has no payment_stage metadata", session.id)))?
        .parse::<PaymentStage>()
        .map_err(|e| malformed(format!("session {}: {e}", session.id)))?;

    let amount = session
        .amount_total
        .ok_or_else(|| malformed(format!("session {} has no amount_total", session.id)))?;
    if amount < 0 {
        return Err(malformed(format!(
            "session {} has negative amount_total {amount}",
            session.id
        )));
    }

    Ok(ConfirmationEvent {
        gateway_session_id: session.id.clone(),
        gateway_transaction_id: session.payment_intent.clone(),
        proposal_id,
        stage,
        amount_charged: Money::from_cents(amount),
        payment_method: session.metadata.get(METADATA_PAYMENT_METHOD).cloned(),
        customer_email: session.email(),
        source,
        paid_at,
    })
}

/// Verifies and parses a raw webhook body.
///
/// The signature is checked before anything in the body is looked at.
/// `checkout.session.completed` with a paid session and
/// `checkout.session.async_payment_succeeded` produce a confirmation; every
/// other verified event is ignored.
#[instrument(skip_all)]
pub fn parse_webhook(
    payload: &str,
    signature_header: &str,
    verifier: &WebhookVerifier,
    now: DateTime<Utc>,
) -> Result<WebhookDisposition> {
    verifier.verify(payload, signature_header, now.timestamp())?;

    let envelope: WebhookEnvelope = serde_json::from_str(payload)
        .map_err(|e| malformed(format!("webhook body is not a gateway event: {e}")))?;

    let event_type = envelope.event_type.as_str();
    if event_type != EVENT_SESSION_COMPLETED && event_type != EVENT_ASYNC_PAYMENT_SUCCEEDED {
        debug!(event_id = %envelope.id, event_type, "Ignoring webhook event type");
        return Ok(WebhookDisposition::Ignored {
            event_type: envelope.event_type,
            reason: "not a checkout completion".to_string(),
        });
    }

    let session: GatewaySession = serde_json::from_value(envelope.data.object)
        .map_err(|e| malformed(format!("event {} session object: {e}", envelope.id)))?;

    if !session.is_paid() {
        info!(
            event_id = %envelope.id,
            session_id = %session.id,
            payment_status = %session.payment_status,
            "Checkout completed without collected funds; awaiting settlement"
        );
        return Ok(WebhookDisposition::Ignored {
            event_type: envelope.event_type,
            reason: format!("payment_status is {}", session.payment_status),
        });
    }

    let paid_at = envelope
        .created
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or(now);

    let event = event_from_session(&session, PaymentSource::Webhook, paid_at)?;
    info!(
        event_id = %envelope.id,
        session_id = %event.gateway_session_id,
        proposal_id = event.proposal_id,
        stage = %event.stage,
        amount = %event.amount_charged,
        "Webhook payment confirmation"
    );
    Ok(WebhookDisposition::Confirmed(event))
}

/// Confirms a customer's return from checkout by asking the gateway.
///
/// `expected_proposal_id` comes from the return URL and is only a
/// cross-check; attribution always comes from the gateway's session metadata.
#[instrument(skip(gateway))]
pub async fn confirm_redirect(
    gateway: &dyn PaymentGateway,
    session_id: &str,
    expected_proposal_id: Option<i64>,
) -> Result<ConfirmationEvent> {
    if session_id.trim().is_empty() {
        return Err(Error::InvalidInput {
            message: "session_id is required".to_string(),
        });
    }

    let session = gateway.retrieve_session(session_id).await?;
    if session.id != session_id {
        return Err(malformed(format!(
            "gateway returned session {} for {session_id}",
            session.id
        )));
    }

    if !session.is_paid() {
        return Err(Error::SessionNotCompleted {
            session_id: session.id,
            status: session.status,
            payment_status: session.payment_status,
        });
    }

    let event = event_from_session(&session, PaymentSource::Redirect, Utc::now())?;

    if let Some(expected) = expected_proposal_id
        && expected != event.proposal_id
    {
        warn!(
            session_id,
            url_proposal_id = expected,
            metadata_proposal_id = event.proposal_id,
            "Return URL proposal does not match session metadata"
        );
        return Err(malformed(format!(
            "session {session_id} belongs to proposal {}, not {expected}",
            event.proposal_id
        )));
    }

    Ok(event)
}

fn malformed(message: String) -> Error {
    Error::MalformedEvent { message }
}
