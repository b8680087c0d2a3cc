use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::ExportError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Gone: {0}")]
    Gone(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

impl ApiError {
    /// Stable machine-readable code carried in the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "TOKEN_FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Gone(_) => "TOKEN_EXPIRED_OR_CONSUMED",
            ApiError::Validation(_) => "VALIDATION",
            ApiError::RateLimited(_) => "RATE_LIMIT",
            ApiError::Internal(_) => "INTERNAL",
            ApiError::NotImplemented(_) => "FEATURE_DISABLED",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Gone(_) => StatusCode::GONE,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "An internal error occurred".to_string()
            }
            ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::Gone(msg)
            | ApiError::Validation(msg)
            | ApiError::RateLimited(msg)
            | ApiError::NotImplemented(msg) => msg.clone(),
        };

        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.code(),
                message,
            },
        };

        (self.status(), Json(body)).into_response()
    }
}

impl From<ExportError> for ApiError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::Validation(msg) => ApiError::Validation(msg),
            ExportError::RateLimited { .. } => ApiError::RateLimited(err.to_string()),
            ExportError::NotFound => ApiError::NotFound("Export job not found".into()),
            ExportError::NotReady(msg) => ApiError::Conflict(msg),
            ExportError::TokenForbidden => ApiError::Forbidden(err.to_string()),
            ExportError::TokenGone => ApiError::Gone(err.to_string()),
            ExportError::MemoryLimitExceeded { .. } | ExportError::Build(_) => {
                ApiError::Internal(err.to_string())
            }
            ExportError::Store(msg) => ApiError::Internal(format!("Store error: {}", msg)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_envelope_shape() {
        let response = ApiError::NotFound("Export job not found".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "NOT_FOUND");
        assert_eq!(json["error"]["message"], "Export job not found");
    }

    #[tokio::test]
    async fn test_internal_message_is_hidden() {
        let response = ApiError::Internal("connection refused".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "INTERNAL");
        assert_eq!(json["error"]["message"], "An internal error occurred");
    }

    #[test]
    fn test_export_error_status_mapping() {
        let cases = [
            (ExportError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (
                ExportError::RateLimited {
                    active: 5,
                    limit: 5,
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (ExportError::NotFound, StatusCode::NOT_FOUND),
            (ExportError::NotReady("queued".into()), StatusCode::CONFLICT),
            (ExportError::TokenForbidden, StatusCode::FORBIDDEN),
            (ExportError::TokenGone, StatusCode::GONE),
            (ExportError::Store("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_feature_disabled() {
        let err = ApiError::NotImplemented("Exports are disabled".into());
        assert_eq!(err.status(), StatusCode::NOT_IMPLEMENTED);
        assert_eq!(err.code(), "FEATURE_DISABLED");
    }
}
