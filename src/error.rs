use mongodb::error::Error as DbError;
use rocket::{
    http::{Status, StatusClass},
    response::{self, Responder},
    serde::json::Json,
    Request,
};
use serde::Serialize;
use thiserror::Error;

use crate::model::{election::ElectionStatus, mongodb::is_transient_error};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // Election state.
    #[error("Election not found")]
    ElectionNotFound,
    #[error("Election is not active")]
    ElectionNotActive,
    #[error("Voting is not open for this election at this time")]
    ElectionWindowClosed,
    #[error("Election must end after it starts")]
    InvalidElectionWindow,
    #[error("Election cannot move from {from} to {to}")]
    InvalidTransition {
        from: ElectionStatus,
        to: ElectionStatus,
    },

    // Voter eligibility.
    #[error("Member not found")]
    MemberNotFound,
    #[error("Member account is not active")]
    MemberInactive,
    #[error("Member must be verified to vote in this election")]
    MemberNotVerified,

    // Ballot integrity.
    #[error("Position not found")]
    PositionNotFound,
    #[error("Candidate not found")]
    CandidateNotFound,
    #[error("Candidate is not standing in this election")]
    CandidateIneligible,
    #[error("Candidate does not stand for the requested position")]
    CandidateMismatch,
    #[error("You have already voted for this position")]
    DuplicateVote,

    // Links and tokens.
    #[error("Voting link not found")]
    LinkNotFound,
    #[error("Voting link is not valid for this vote")]
    LinkInvalid,
    #[error("Voting link has already been used")]
    LinkAlreadyUsed,
    #[error("Voting link has expired")]
    LinkExpired,
    #[error("Voting link has been revoked")]
    LinkRevoked,
    #[error("Voting token failed verification")]
    TokenInvalid,
    #[error("Voting token is malformed")]
    TokenMalformed,

    // Ledger administration.
    #[error("Vote not found")]
    VoteNotFound,
    #[error("Vote has already been annotated")]
    VoteAlreadyAnnotated,

    // Generic request failures.
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),

    // Infrastructure.
    #[error("Conflicting record: {0}")]
    Constraint(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

impl Error {
    /// Stable machine-readable name of this error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ElectionNotFound => "election_not_found",
            Self::ElectionNotActive => "election_not_active",
            Self::ElectionWindowClosed => "election_window_closed",
            Self::InvalidElectionWindow => "invalid_election_window",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::MemberNotFound => "member_not_found",
            Self::MemberInactive => "member_inactive",
            Self::MemberNotVerified => "member_not_verified",
            Self::PositionNotFound => "position_not_found",
            Self::CandidateNotFound => "candidate_not_found",
            Self::CandidateIneligible => "candidate_ineligible",
            Self::CandidateMismatch => "candidate_mismatch",
            Self::DuplicateVote => "duplicate_vote",
            Self::LinkNotFound => "link_not_found",
            Self::LinkInvalid => "link_invalid",
            Self::LinkAlreadyUsed => "link_already_used",
            Self::LinkExpired => "link_expired",
            Self::LinkRevoked => "link_revoked",
            Self::TokenInvalid => "token_invalid",
            Self::TokenMalformed => "token_malformed",
            Self::VoteNotFound => "vote_not_found",
            Self::VoteAlreadyAnnotated => "vote_already_annotated",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Constraint(_) => "constraint",
            Self::Db(_) => "storage",
        }
    }

    /// Storage failures that may succeed if the whole request is replayed.
    /// Nothing else is ever worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Db(e) => is_transient_error(e),
            _ => false,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::ElectionNotFound
            | Self::MemberNotFound
            | Self::PositionNotFound
            | Self::CandidateNotFound
            | Self::LinkNotFound
            | Self::VoteNotFound => Status::NotFound,
            Self::DuplicateVote
            | Self::InvalidTransition { .. }
            | Self::VoteAlreadyAnnotated
            | Self::Constraint(_) => Status::Conflict,
            Self::ElectionNotActive
            | Self::ElectionWindowClosed
            | Self::MemberInactive
            | Self::MemberNotVerified
            | Self::CandidateIneligible
            | Self::LinkInvalid
            | Self::LinkAlreadyUsed
            | Self::LinkExpired
            | Self::LinkRevoked
            | Self::Forbidden(_) => Status::Forbidden,
            Self::TokenInvalid | Self::Unauthorized(_) => Status::Unauthorized,
            Self::TokenMalformed
            | Self::CandidateMismatch
            | Self::InvalidElectionWindow
            | Self::BadRequest(_) => Status::BadRequest,
            Self::Db(_) if self.is_transient() => Status::ServiceUnavailable,
            Self::Db(_) => Status::InternalServerError,
        }
    }
}

/// JSON body of an error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let status = self.status();
        match status.class() {
            StatusClass::ServerError => error!("{} {}: {self}", req.method(), req.uri()),
            _ => debug!("{} {}: {self}", req.method(), req.uri()),
        }
        // Storage internals are not for callers.
        let message = match self {
            Self::Db(_) => "Storage failure, please retry".to_string(),
            ref other => other.to_string(),
        };
        let body = ErrorBody {
            error: self.kind(),
            message,
        };
        (status, Json(body)).respond_to(req)
    }
}
