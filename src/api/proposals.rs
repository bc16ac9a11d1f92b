//! Proposal, checkout and ledger endpoints.

use super::{AppState, error::ApiError};
use crate::{
    core::{
        checkout::{CheckoutOptions, CheckoutRedirect, initiate_checkout},
        ledger::{self, LedgerSummary},
        money::Money,
        payment_state::PaymentState,
        proposal::{self as proposals, NewProposal},
    },
    entities::{PaymentModel, ProposalModel},
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Proposal with its derived payment state
#[derive(Debug, Serialize)]
pub struct ProposalView {
    /// Stored proposal
    #[serde(flatten)]
    pub proposal: ProposalModel,
    /// Derived lifecycle state
    pub payment_state: PaymentState,
}

impl From<ProposalModel> for ProposalView {
    fn from(proposal: ProposalModel) -> Self {
        let payment_state = PaymentState::of(&proposal);
        Self {
            proposal,
            payment_state,
        }
    }
}

/// Body for approve and reject
#[derive(Debug, Default, Deserialize)]
pub struct DecisionBody {
    /// Optional note from the customer
    #[serde(default)]
    pub customer_notes: Option<String>,
}

/// Body for repricing a proposal
#[derive(Debug, Deserialize)]
pub struct PricingBody {
    /// New subtotal in cents
    pub subtotal: Money,
    /// New tax in cents
    #[serde(default)]
    pub tax_amount: Money,
}

/// `POST /proposals`
pub async fn create(
    State(state): State<AppState>,
    Json(input): Json<NewProposal>,
) -> ApiResult<(StatusCode, Json<ProposalView>)> {
    let created = proposals::create_proposal(&state.db, input).await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

/// `GET /proposals/:id`
pub async fn get(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<ProposalView>> {
    let proposal = proposals::require_proposal(&state.db, id).await?;
    Ok(Json(proposal.into()))
}

/// `GET /views/:token`
pub async fn get_by_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Response> {
    Ok(
        match proposals::get_proposal_by_token(&state.db, &token).await? {
            Some(proposal) => Json(ProposalView::from(proposal)).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        },
    )
}

/// `POST /proposals/:id/send`
pub async fn send(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<ProposalView>> {
    let sent = proposals::mark_sent(&state.db, id).await?;
    Ok(Json(sent.into()))
}

/// `PUT /proposals/:id/pricing`
pub async fn update_pricing(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<PricingBody>,
) -> ApiResult<Json<ProposalView>> {
    let updated = proposals::update_pricing(&state.db, id, body.subtotal, body.tax_amount).await?;
    Ok(Json(updated.into()))
}

/// `POST /proposals/:id/approve`
pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<DecisionBody>>,
) -> ApiResult<Json<ProposalView>> {
    let notes = body.and_then(|Json(b)| b.customer_notes);
    let approved = proposals::approve_proposal(&state.db, &state.config.splits, id, notes).await?;
    Ok(Json(approved.into()))
}

/// `POST /proposals/:id/reject`
pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<DecisionBody>>,
) -> ApiResult<Json<ProposalView>> {
    let notes = body.and_then(|Json(b)| b.customer_notes);
    let rejected = proposals::reject_proposal(&state.db, id, notes).await?;
    Ok(Json(rejected.into()))
}

/// `POST /proposals/:id/checkout`
pub async fn checkout(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(options): Json<CheckoutOptions>,
) -> ApiResult<Json<CheckoutRedirect>> {
    let redirect =
        initiate_checkout(&state.db, state.gateway.as_ref(), &state.config, id, options).await?;
    Ok(Json(redirect))
}

/// `GET /proposals/:id/payments`
pub async fn payments(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<LedgerSummary>> {
    Ok(Json(ledger::summarize(&state.db, id).await?))
}

/// `GET /payments/warnings`
pub async fn list_warnings(State(state): State<AppState>) -> ApiResult<Json<Vec<PaymentModel>>> {
    Ok(Json(ledger::list_warnings(&state.db).await?))
}
