//! Mapping service errors onto HTTP responses.

use crate::errors::Error;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{error, warn};

/// JSON error body
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human-readable message
    pub error: String,
}

/// Handler error wrapper so `?` works on [`Error`] inside axum handlers.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    /// HTTP status for the wrapped error
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidSignature { .. }
            | Error::MalformedEvent { .. }
            | Error::InvalidInput { .. }
            | Error::InvalidAmount { .. } => StatusCode::BAD_REQUEST,
            Error::ProposalNotFound { .. } => StatusCode::NOT_FOUND,
            Error::StageLocked { .. }
            | Error::InvalidProposalStatus { .. }
            | Error::TotalFrozen { .. }
            | Error::ConcurrentUpdate { .. } => StatusCode::CONFLICT,
            Error::SessionNotCompleted { .. } => StatusCode::PAYMENT_REQUIRED,
            Error::Gateway { .. } | Error::Http(_) => StatusCode::BAD_GATEWAY,
            Error::Config { .. }
            | Error::Database(_)
            | Error::RoundingInvariantViolation { .. }
            | Error::Json(_)
            | Error::Io(_)
            | Error::EnvVar(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!(error = %self.0, %status, "Request failed");
            match status {
                StatusCode::BAD_GATEWAY => "payment gateway unavailable".to_string(),
                _ => "internal error".to_string(),
            }
        } else {
            warn!(error = %self.0, %status, "Request rejected");
            self.0.to_string()
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
