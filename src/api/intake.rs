//! Confirmation intake endpoints.

use super::{AppState, error::ApiError};
use crate::{
    core::{
        checkout::proposal_view_url,
        intake::{WebhookDisposition, confirm_redirect, parse_webhook},
        proposal::get_proposal_by_id,
        reconcile::{ReconcileOutcome, reconcile},
    },
    errors::{Error, Result},
    gateway::signature::SIGNATURE_HEADER,
    notify::notify_outcome,
};

/// Gateway session status once the customer finished checkout
const SESSION_STATUS_COMPLETE: &str = "complete";
use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    response::Redirect,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// Acknowledgement returned to the gateway
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookAck {
    /// Always true; the gateway only checks the status code
    pub received: bool,
    /// `applied`, `flagged`, `duplicate` or `ignored`
    pub outcome: String,
}

/// Query string on the customer's return from checkout
#[derive(Debug, Deserialize)]
pub struct SuccessQuery {
    /// Gateway session id substituted by the gateway
    pub session_id: Option<String>,
    /// Proposal id we put in the return URL; only a cross-check
    pub proposal_id: Option<String>,
}

/// `POST /webhooks/gateway`
///
/// Signature failures and malformed events are answered with 400 so the
/// gateway surfaces them; verified events that are not payments get 200.
#[instrument(skip_all)]
pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> std::result::Result<Json<WebhookAck>, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::InvalidSignature {
            reason: "missing signature header".to_string(),
        })?;
    let payload = std::str::from_utf8(&body).map_err(|_| Error::MalformedEvent {
        message: "webhook body is not UTF-8".to_string(),
    })?;

    let event = match parse_webhook(payload, signature, &state.verifier, Utc::now())? {
        WebhookDisposition::Confirmed(event) => event,
        WebhookDisposition::Ignored { event_type, reason } => {
            info!(%event_type, %reason, "Webhook acknowledged without action");
            return Ok(ack("ignored"));
        }
    };

    let outcome = reconcile(&state.db, &event).await?;
    notify_outcome(state.notifier.as_ref(), &outcome).await;
    Ok(ack(outcome_label(&outcome)))
}

/// `GET /payments/success`
///
/// Always answers with a redirect to the customer's proposal page. Failures
/// become `?payment=error`; a completed session whose bank debit is still
/// settling becomes `?payment=processing`. The detail goes to the log, never
/// to the customer.
#[instrument(skip(state))]
pub async fn payment_success(
    State(state): State<AppState>,
    Query(query): Query<SuccessQuery>,
) -> Redirect {
    let hinted_id = query
        .proposal_id
        .as_deref()
        .and_then(|raw| raw.trim().parse::<i64>().ok());

    match confirm_from_return(&state, query.session_id.as_deref(), hinted_id).await {
        Ok(proposal_id) => redirect_to_view(&state, Some(proposal_id), "success").await,
        Err(Error::SessionNotCompleted {
            session_id,
            status,
            payment_status,
        }) if status.as_deref() == Some(SESSION_STATUS_COMPLETE) => {
            info!(%session_id, %payment_status, "Customer returned before payment settled");
            redirect_to_view(&state, hinted_id, "processing").await
        }
        Err(err) => {
            warn!(error = %err, "Could not confirm payment from customer return");
            redirect_to_view(&state, hinted_id, "error").await
        }
    }
}

async fn confirm_from_return(
    state: &AppState,
    session_id: Option<&str>,
    hinted_id: Option<i64>,
) -> Result<i64> {
    let session_id = session_id.ok_or_else(|| Error::InvalidInput {
        message: "session_id is required".to_string(),
    })?;
    let event = confirm_redirect(state.gateway.as_ref(), session_id, hinted_id).await?;
    let outcome = reconcile(&state.db, &event).await?;
    notify_outcome(state.notifier.as_ref(), &outcome).await;
    Ok(event.proposal_id)
}

async fn redirect_to_view(state: &AppState, proposal_id: Option<i64>, outcome: &str) -> Redirect {
    let proposal = match proposal_id {
        Some(id) => get_proposal_by_id(&state.db, id).await.ok().flatten(),
        None => None,
    };

    let target = proposal.map_or_else(
        || format!("{}/?payment={outcome}", state.config.base_url()),
        |p| proposal_view_url(&state.config, &p.customer_view_token, outcome),
    );
    Redirect::to(&target)
}

fn ack(outcome: &str) -> Json<WebhookAck> {
    Json(WebhookAck {
        received: true,
        outcome: outcome.to_string(),
    })
}

const fn outcome_label(outcome: &ReconcileOutcome) -> &'static str {
    match outcome {
        ReconcileOutcome::Applied { .. } => "applied",
        ReconcileOutcome::RecordedWithWarning { .. } => "flagged",
        ReconcileOutcome::Duplicate { .. } => "duplicate",
    }
}
