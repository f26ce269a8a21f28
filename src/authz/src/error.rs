//! Error types for the authorization resolver

use serde::Serialize;
use thiserror::Error;

/// Generic message returned to callers when identity could not be established.
pub const INVALID_TOKEN_MESSAGE: &str = "Invalid token.";

/// Message returned when the token's `exp` claim has passed.
pub const EXPIRED_TOKEN_MESSAGE: &str = "Token has expired.";

/// Authorization errors
///
/// Only the first three variants are ever surfaced to a caller. The remaining
/// variants describe upstream failures and are collapsed by
/// [`AuthzError::normalize`] at the gate boundary.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Identity could not be established
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Identity established, but none of the required roles were granted
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Server misconfiguration
    #[error("Internal server error: {0}")]
    InternalServerError(String),

    /// Role or secret store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Signing key lookup failure
    #[error("Key resolution error: {0}")]
    KeyResolution(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthzError {
    /// Apply the gate-boundary rule: typed errors pass through unchanged,
    /// anything else becomes a generic authentication failure.
    pub fn normalize(self) -> Self {
        match self {
            Self::Unauthenticated(_) | Self::Unauthorized(_) | Self::InternalServerError(_) => self,
            _ => Self::Unauthenticated(INVALID_TOKEN_MESSAGE.to_string()),
        }
    }

    /// Stable error name exposed to callers
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "UnauthenticatedError",
            Self::Unauthorized(_) => "UnauthorizedError",
            _ => "InternalServerError",
        }
    }

    /// Stable numeric error id exposed to callers
    pub fn id(&self) -> u16 {
        match self {
            Self::Unauthorized(_) => 101,
            Self::Unauthenticated(_) => 102,
            _ => 100,
        }
    }

    /// HTTP status code for this error
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthenticated(_) => 401,
            Self::Unauthorized(_) => 403,
            _ => 500,
        }
    }

    /// Caller-safe message. Upstream variants never leak their detail.
    pub fn public_message(&self) -> String {
        match self {
            Self::Unauthenticated(msg) | Self::Unauthorized(msg) | Self::InternalServerError(msg) => {
                msg.clone()
            }
            _ => "An internal server error occurred. Please try again or contact support."
                .to_string(),
        }
    }

    /// Serializable response body
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: true,
            name: self.name(),
            id: self.id(),
            message: self.public_message(),
        }
    }
}

/// JSON error body rendered for callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: bool,
    pub name: &'static str,
    pub id: u16,
    pub message: String,
}

impl From<jsonwebtoken::errors::Error> for AuthzError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Unauthenticated(EXPIRED_TOKEN_MESSAGE.to_string()),
            _ => Self::Unauthenticated(INVALID_TOKEN_MESSAGE.to_string()),
        }
    }
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
