use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::bid::BidStatus;
use crate::models::package::PackageStatus;

/// Why the package state machine refused a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("package is already {0}")]
    SameState(PackageStatus),

    #[error("package is {0} and cannot change status")]
    TerminalState(PackageStatus),

    #[error("cannot move package from {from} to {to}")]
    IllegalTransition {
        from: PackageStatus,
        to: PackageStatus,
    },

    #[error("only an admin may move package from {from} to {to}")]
    RoleDenied {
        from: PackageStatus,
        to: PackageStatus,
    },
}

impl TransitionError {
    pub fn reason(&self) -> &'static str {
        match self {
            TransitionError::SameState(_) => "same_state",
            TransitionError::TerminalState(_) => "terminal_state",
            TransitionError::IllegalTransition { .. } => "illegal_transition",
            TransitionError::RoleDenied { .. } => "role_denied",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BidError {
    #[error("package is {0}, not open for bids")]
    NotBiddable(PackageStatus),

    #[error("senders cannot bid on their own package")]
    SelfBid,

    #[error("courier already has an active bid on this package")]
    DuplicateBid,

    #[error("actor does not own this bid or package")]
    NotOwner,

    #[error("bid is {0}, not pending")]
    NotPending(BidStatus),

    #[error("bid is {0}, not selected")]
    NotSelected(BidStatus),

    #[error("package is {0}, not awaiting pickup")]
    NotAwaitingPickup(PackageStatus),
}

impl BidError {
    pub fn reason(&self) -> &'static str {
        match self {
            BidError::NotBiddable(_) => "not_biddable",
            BidError::SelfBid => "self_bid",
            BidError::DuplicateBid => "duplicate_bid",
            BidError::NotOwner => "not_owner",
            BidError::NotPending(_) => "not_pending",
            BidError::NotSelected(_) => "not_selected",
            BidError::NotAwaitingPickup(_) => "not_awaiting_pickup",
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Bid(#[from] BidError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn reason(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "validation",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::Conflict(_) => "conflict",
            AppError::Transition(err) => err.reason(),
            AppError::Bid(err) => err.reason(),
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Transition(TransitionError::RoleDenied { .. }) => StatusCode::FORBIDDEN,
            AppError::Transition(_) => StatusCode::CONFLICT,
            AppError::Bid(BidError::NotOwner) => StatusCode::FORBIDDEN,
            AppError::Bid(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "reason": self.reason(),
        }));

        (status, body).into_response()
    }
}
