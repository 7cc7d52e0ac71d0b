use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::error::{DbErr, SqlErr};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JSON body returned for every failed request
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Conflict")
    pub error: String,
    /// Machine-readable error kind (e.g., "insufficient_stock")
    pub kind: String,
    /// Human-readable error description
    pub message: String,
    /// ISO 8601 timestamp when error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid state: cannot {operation} {entity} {id} while {status}")]
    InvalidState {
        entity: &'static str,
        id: Uuid,
        status: String,
        operation: &'static str,
    },

    #[error("Quotation {quotation_id} expired at {valid_until}")]
    Expired {
        quotation_id: Uuid,
        valid_until: DateTime<Utc>,
    },

    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: Uuid,
        available: i32,
        requested: i32,
    },

    #[error("Invalid quantity for product {product_id}: available {available}, requested {requested}")]
    InvalidQuantity {
        product_id: Uuid,
        available: i32,
        requested: i32,
    },

    #[error("Margin rejected: aggregate margin {total_margin}% is negative")]
    MarginRejected { total_margin: Decimal },

    #[error("Sequence exhausted: {0}")]
    SequenceExhausted(String),

    #[error("Concurrent modification, retry the operation: {0}")]
    Retryable(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Classifies a storage error, separating contention from hard failures.
    pub fn db_error(err: DbErr) -> Self {
        if let Some(SqlErr::UniqueConstraintViolation(detail)) = err.sql_err() {
            return ServiceError::Retryable(detail);
        }
        let text = err.to_string();
        let lowered = text.to_ascii_lowercase();
        if lowered.contains("40001")
            || lowered.contains("could not serialize")
            || lowered.contains("deadlock detected")
            || lowered.contains("database is locked")
        {
            return ServiceError::Retryable(text);
        }
        ServiceError::DatabaseError(err)
    }

    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        ServiceError::NotFound(format!("{} {} not found", entity, id))
    }

    /// Whether the caller may safely retry the whole unit of work.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Retryable(_))
    }

    /// Stable machine-readable kind used in API responses and audit events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database_error",
            Self::NotFound(_) => "not_found",
            Self::ValidationError(_) => "validation_error",
            Self::InvalidState { .. } => "invalid_state",
            Self::Expired { .. } => "expired",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::InvalidQuantity { .. } => "invalid_quantity",
            Self::MarginRejected { .. } => "margin_rejected",
            Self::SequenceExhausted(_) => "sequence_exhausted",
            Self::Retryable(_) => "retryable",
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) | Self::SequenceExhausted(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::InvalidState { .. } | Self::Retryable(_) => StatusCode::CONFLICT,
            Self::Expired { .. } => StatusCode::GONE,
            Self::InsufficientStock { .. }
            | Self::InvalidQuantity { .. }
            | Self::MarginRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Storage errors return a generic message.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            kind: self.kind().to_string(),
            message: self.response_message(),
            timestamp: Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use rust_decimal_macros::dec;

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::InvalidState {
                entity: "quotation",
                id: Uuid::nil(),
                status: "SENT".into(),
                operation: "update",
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::InsufficientStock {
                product_id: Uuid::nil(),
                available: 1,
                requested: 2,
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::MarginRejected {
                total_margin: dec!(-5)
            }
            .status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::Retryable("x".into()).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn quantity_errors_carry_numeric_context() {
        let err = ServiceError::InvalidQuantity {
            product_id: Uuid::nil(),
            available: 5,
            requested: 8,
        };
        let message = err.to_string();
        assert!(message.contains("available 5"));
        assert!(message.contains("requested 8"));
        assert_eq!(err.kind(), "invalid_quantity");
    }

    #[test]
    fn contention_errors_are_retryable() {
        let err = ServiceError::db_error(DbErr::Custom("database is locked".into()));
        assert!(err.is_retryable());

        let err = ServiceError::db_error(DbErr::Custom("syntax error".into()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn only_storage_failures_are_server_errors() {
        let server_side = [
            ServiceError::DatabaseError(DbErr::Custom("x".into())),
            ServiceError::SequenceExhausted("PRES-2026".into()),
        ];
        for err in &server_side {
            assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        }
        let client_side = [
            ServiceError::ValidationError("x".into()),
            ServiceError::NotFound("x".into()),
            ServiceError::Retryable("x".into()),
        ];
        for err in &client_side {
            assert!(err.status_code().is_client_error(), "{}", err.kind());
        }
    }

    #[test]
    fn response_message_hides_database_details() {
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("secret".into())).response_message(),
            "Database error"
        );
    }

    #[tokio::test]
    async fn error_response_carries_kind() {
        let response = ServiceError::Expired {
            quotation_id: Uuid::nil(),
            valid_until: Utc::now(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::GONE);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.kind, "expired");
    }
}
