//! Engine error taxonomy.
//!
//! Every failure the engine can produce is one of these variants; the HTTP
//! layer maps them to status codes and the sweeper logs-and-skips them.
//! The engine never retries its own operations.

use thiserror::Error;
use uuid::Uuid;

use crate::engine::transitions::MatchState;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition { from: MatchState, to: MatchState },

    #[error("user {0} is not a participant of this match")]
    NotParticipant(Uuid),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        EngineError::NotFound(format!("{} {}", what, id))
    }
}
