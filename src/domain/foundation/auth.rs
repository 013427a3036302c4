//! Authentication types shared between the HTTP layer and handlers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::UserId;

/// A user whose bearer credential has been validated.
///
/// Inserted into request extensions by the auth middleware and consumed
/// by the `RequireAuth` extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: UserId,
    /// Email from the token claims, used for payment-customer lookup.
    pub email: Option<String>,
}

impl AuthenticatedUser {
    pub fn new(id: UserId, email: Option<String>) -> Self {
        Self { id, email }
    }
}

/// Errors from validating a bearer credential.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Authentication service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AuthError {
    /// True when the client should obtain a fresh credential.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, AuthError::InvalidToken(_) | AuthError::TokenExpired)
    }

    /// True when retrying the same credential may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::ServiceUnavailable(_))
    }
}
