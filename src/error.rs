//! Error types for the wallet service.
//!
//! All errors implement `ResponseError` for Actix-web integration, converting
//! domain errors into the error taxonomy of the external interface: one of
//! `invalid_argument`, `unauthenticated`, `permission_denied`, `not_found`,
//! `policy_violation`, `conflict`, `failed_precondition`, `resource_exhausted`,
//! `deadline_exceeded`, `internal`. Cryptographic failures always collapse to
//! `internal` with no low-level detail in the response body.

use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde::Serialize;
use thiserror::Error;

use crate::policy::Violation;

/// Service error type with structured error responses.
#[derive(Error, Debug)]
pub enum WalletError {
    // invalid_argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid threshold: t={threshold} must be <= n={total}")]
    InvalidThreshold { threshold: u16, total: u16 },

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // unauthenticated
    #[error("Unauthenticated")]
    Unauthenticated,

    // permission_denied
    #[error("Signer is not active")]
    SignerNotActive,

    // not_found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Signer not found: {0}")]
    SignerNotFound(String),

    #[error("Envelope not found at path: {0}")]
    EnvelopeNotFound(String),

    // policy_violation
    #[error("Policy violation")]
    PolicyViolation(Vec<Violation>),

    // conflict
    #[error("Invalid session state: expected {expected}, got {actual}")]
    InvalidSessionState { expected: String, actual: String },

    #[error("Round called out of order: expected {expected}, got {actual}")]
    InvalidRound { expected: u8, actual: u8 },

    #[error("Session already consumed: {0}")]
    SessionConsumed(String),

    // failed_precondition
    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Session is not presigned: {0}")]
    NotPresigned(String),

    #[error("Signer has not completed DKG: {0}")]
    DkgNotComplete(String),

    // resource_exhausted
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    // deadline_exceeded
    #[error("Request cancelled: {0}")]
    Cancelled(String),

    // internal (never leak detail to the caller)
    #[error("DKG failed")]
    DkgFailed(String),

    #[error("Signing failed")]
    SigningFailed(String),

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Recovery failed")]
    RecoveryFailed,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("KMS unavailable")]
    KmsUnavailable,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error response body, matching the `policy_violation` (with
/// `violations[]`) shape as well as the plain `{error, code}` shape used by
/// every other taxonomy member.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    violations: Option<Vec<Violation>>,
}

impl WalletError {
    /// The taxonomy member this error surfaces as.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) | Self::InvalidThreshold { .. } | Self::Deserialization(_) => {
                "invalid_argument"
            }
            Self::Unauthenticated => "unauthenticated",
            Self::SignerNotActive => "permission_denied",
            Self::SessionNotFound(_) | Self::SignerNotFound(_) | Self::EnvelopeNotFound(_) => {
                "not_found"
            }
            Self::PolicyViolation(_) => "policy_violation",
            Self::InvalidSessionState { .. }
            | Self::InvalidRound { .. }
            | Self::SessionConsumed(_) => "conflict",
            Self::SessionExpired(_) | Self::NotPresigned(_) | Self::DkgNotComplete(_) => {
                "failed_precondition"
            }
            Self::RateLimitExceeded(_) => "resource_exhausted",
            Self::Cancelled(_) => "deadline_exceeded",
            Self::DkgFailed(_)
            | Self::SigningFailed(_)
            | Self::DecryptionFailed
            | Self::RecoveryFailed
            | Self::Storage(_)
            | Self::Serialization(_)
            | Self::KmsUnavailable
            | Self::Internal(_) => "internal",
        }
    }
}

impl ResponseError for WalletError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::InvalidThreshold { .. } | Self::Deserialization(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::SignerNotActive => StatusCode::FORBIDDEN,
            Self::SessionNotFound(_) | Self::SignerNotFound(_) | Self::EnvelopeNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::PolicyViolation(_) => StatusCode::FORBIDDEN,
            Self::InvalidSessionState { .. }
            | Self::InvalidRound { .. }
            | Self::SessionConsumed(_) => StatusCode::CONFLICT,
            Self::SessionExpired(_) | Self::NotPresigned(_) | Self::DkgNotComplete(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::RateLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Cancelled(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::DkgFailed(_)
            | Self::SigningFailed(_)
            | Self::DecryptionFailed
            | Self::RecoveryFailed
            | Self::Storage(_)
            | Self::Serialization(_)
            | Self::KmsUnavailable
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        // Low-level cryptographic detail never reaches the client; only the
        // taxonomy kind does for internal errors.
        let message = if self.kind() == "internal" {
            "internal error".to_string()
        } else {
            self.to_string()
        };

        let violations = match self {
            Self::PolicyViolation(v) => Some(v.clone()),
            _ => None,
        };

        let body = ErrorResponse {
            error: message,
            code: self.kind(),
            violations,
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

// Conversions from common error types

impl From<std::io::Error> for WalletError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::Deserialization(err.to_string())
        } else {
            Self::Serialization(err.to_string())
        }
    }
}

impl From<redb::Error> for WalletError {
    fn from(err: redb::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::DatabaseError> for WalletError {
    fn from(err: redb::DatabaseError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::TableError> for WalletError {
    fn from(err: redb::TableError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::TransactionError> for WalletError {
    fn from(err: redb::TransactionError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::CommitError> for WalletError {
    fn from(err: redb::CommitError) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<redb::StorageError> for WalletError {
    fn from(err: redb::StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Result type alias for wallet service operations.
pub type WalletResult<T> = Result<T, WalletError>;
