//! Domain error taxonomy for export generation and delivery.

use thiserror::Error;

/// Errors raised by export submission, execution and download.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExportError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Too many active exports: {active} of {limit} allowed")]
    RateLimited { active: u64, limit: u64 },

    #[error("Export job not found")]
    NotFound,

    #[error("Export job is not ready: {0}")]
    NotReady(String),

    #[error("Download token is invalid")]
    TokenForbidden,

    #[error("Download token has expired or was already used")]
    TokenGone,

    #[error(
        "MEMORY_LIMIT_EXCEEDED: projected {projected} bytes exceeds soft limit of {limit} bytes (too large to buffer)"
    )]
    MemoryLimitExceeded { projected: u64, limit: u64 },

    #[error("BUILD_FAILURE: {0}")]
    Build(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl ExportError {
    /// Stable machine-readable code used in API envelopes and logs.
    pub fn code(&self) -> &'static str {
        match self {
            ExportError::Validation(_) => "VALIDATION",
            ExportError::RateLimited { .. } => "RATE_LIMIT",
            ExportError::NotFound => "NOT_FOUND",
            ExportError::NotReady(_) => "CONFLICT",
            ExportError::TokenForbidden => "TOKEN_FORBIDDEN",
            ExportError::TokenGone => "TOKEN_EXPIRED_OR_CONSUMED",
            ExportError::MemoryLimitExceeded { .. } => "MEMORY_LIMIT_EXCEEDED",
            ExportError::Build(_) => "BUILD_FAILURE",
            ExportError::Store(_) => "INTERNAL",
        }
    }
}

impl From<validator::ValidationErrors> for ExportError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ExportError::Validation(errors.to_string())
    }
}
