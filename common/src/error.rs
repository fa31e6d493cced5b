use outbox::StoreError;
use thiserror::Error;
use tonic::Status;
use tracing::error;

/// Failure of a service operation, mapped onto a gRPC status at the
/// boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(e: sqlx::Error) -> Self {
        Self::Internal(format!("Database error: {}", e))
    }
}

impl From<StoreError> for DomainError {
    fn from(e: StoreError) -> Self {
        Self::Internal(format!("Outbox error: {}", e))
    }
}

impl From<DomainError> for Status {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::Validation(msg) => Status::invalid_argument(msg),
            DomainError::NotFound(msg) => Status::not_found(msg),
            DomainError::Conflict(msg) => Status::already_exists(msg),
            DomainError::Unauthorized(msg) => Status::unauthenticated(msg),
            DomainError::Forbidden(msg) => Status::permission_denied(msg),
            DomainError::Internal(cause) => {
                error!(error = %cause, "internal error");
                Status::internal("internal error")
            }
        }
    }
}

/// Whether `e` is a PostgreSQL unique constraint violation.
pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use tonic::Code;

    use super::*;

    #[test]
    fn maps_to_grpc_codes() {
        let cases = [
            (DomainError::validation("bad"), Code::InvalidArgument),
            (DomainError::not_found("gone"), Code::NotFound),
            (DomainError::conflict("taken"), Code::AlreadyExists),
            (DomainError::Unauthorized("who".into()), Code::Unauthenticated),
            (DomainError::Forbidden("no".into()), Code::PermissionDenied),
            (DomainError::internal("boom"), Code::Internal),
        ];
        for (err, code) in cases {
            assert_eq!(Status::from(err).code(), code);
        }
    }

    #[test]
    fn internal_cause_is_not_leaked() {
        let status = Status::from(DomainError::internal("connection refused on 10.0.0.3"));
        assert_eq!(status.message(), "internal error");

        let status = Status::from(DomainError::validation("name is required"));
        assert_eq!(status.message(), "name is required");
    }

    #[test]
    fn row_not_found_is_not_a_unique_violation() {
        assert!(!is_unique_violation(&sqlx::Error::RowNotFound));
    }
}
