use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Unprocessable Entity",
    "code": "invalid_jurisdiction",
    "message": "Invalid jurisdiction: 'XX' is not an ISO 3166-1 country",
    "request_id": "req-abc123xyz",
    "timestamp": "2024-12-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Bad Request")
    pub error: String,
    /// Machine-readable error kind
    pub code: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

/// Errors raised at the engine boundary.
///
/// Business outcomes such as a fraud block are never represented here; they
/// travel as fully populated responses.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    /// Malformed input; surfaced verbatim and never dispatched downstream.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No tax regime can legally be resolved for the destination.
    #[error("Invalid jurisdiction: {0}")]
    InvalidJurisdiction(String),

    /// A sub-component missed its bounded deadline.
    #[error("Upstream timeout: {component} exceeded {timeout_ms}ms")]
    UpstreamTimeout {
        component: &'static str,
        timeout_ms: u64,
    },

    /// No exchange rate for a pair.
    #[error("Rate unavailable: no exchange rate for {from}->{to}")]
    RateUnavailable { from: String, to: String },

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::InvalidJurisdiction(_) | Self::RateUnavailable { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidJurisdiction(_) => "invalid_jurisdiction",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::RateUnavailable { .. } => "rate_unavailable",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return a generic message to avoid leaking details.
    pub fn response_message(&self) -> String {
        match self {
            Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Whether the composer must abort the whole intent on this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_) | Self::InvalidJurisdiction(_) | Self::InternalError(_)
        )
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "request failed");
        } else {
            tracing::debug!(code = self.code(), error = %self, "request rejected");
        }

        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            code: self.code().to_string(),
            message: self.response_message(),
            details: None,
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::InvalidRequest(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn error_response_includes_request_id_and_code() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::InvalidJurisdiction("'XX' is not an ISO 3166-1 country".into())
                    .into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
        assert_eq!(payload.code, "invalid_jurisdiction");
    }

    #[test]
    fn status_code_mapping() {
        assert_eq!(
            ServiceError::InvalidRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InvalidJurisdiction("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::UpstreamTimeout {
                component: "tax_resolver",
                timeout_ms: 10
            }
            .status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ServiceError::RateUnavailable {
                from: "EUR".into(),
                to: "XAU".into()
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::InternalError("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_details_are_hidden() {
        assert_eq!(
            ServiceError::InternalError("lock poisoned".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::InvalidRequest("quantity must be positive".into()).response_message(),
            "Invalid request: quantity must be positive"
        );
    }

    #[test]
    fn only_tax_and_input_failures_are_fatal() {
        assert!(ServiceError::InvalidJurisdiction("x".into()).is_fatal());
        assert!(ServiceError::InvalidRequest("x".into()).is_fatal());
        assert!(!ServiceError::UpstreamTimeout {
            component: "fraud_assessor",
            timeout_ms: 5
        }
        .is_fatal());
        assert!(!ServiceError::RateUnavailable {
            from: "EUR".into(),
            to: "USD".into()
        }
        .is_fatal());
    }
}
