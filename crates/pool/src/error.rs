//! Token pool errors.

use thiserror::Error;

use crate::token::{TokenId, TokenState};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Enrichment template not found: {0}")]
    TemplateNotFound(String),

    #[error("Unknown token: {0}")]
    UnknownToken(TokenId),

    #[error("Cannot {operation} {token} while it is {state}")]
    InvalidState {
        token: TokenId,
        state: TokenState,
        operation: &'static str,
    },
}
