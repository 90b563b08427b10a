use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use contact::{ErrorBody, ErrorCode, FieldError};
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    FailedPrecondition(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::MalformedPayload(_)
            | AppError::InvalidArgument(_)
            | AppError::Validation(_) => ErrorCode::InvalidArgument,
            AppError::Unauthenticated => ErrorCode::Unauthenticated,
            AppError::PermissionDenied => ErrorCode::PermissionDenied,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::FailedPrecondition(_) => ErrorCode::FailedPrecondition,
            AppError::Unavailable(_) => ErrorCode::Unavailable,
            AppError::Store(StoreError::Unsupported(_)) => ErrorCode::FailedPrecondition,
            AppError::Store(StoreError::Contention(_)) => ErrorCode::Unavailable,
            AppError::Store(_) => ErrorCode::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.code() {
            ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorCode::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let message = match &self {
            AppError::Store(StoreError::Unsupported(reason)) => reason.clone(),
            AppError::Store(_) => {
                error!("{self}");
                "An internal error occurred. Please try again later.".to_string()
            }
            other => other.to_string(),
        };

        let details = match self {
            AppError::Validation(details) => details,
            _ => Vec::new(),
        };

        (
            status,
            Json(ErrorBody {
                code,
                message,
                details,
            }),
        )
            .into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::MalformedPayload(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::InvalidArgument(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::InvalidArgument(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Validation(vec![]).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::NotFound("Submission".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Store(StoreError::Unsupported("no search".into())).status(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            AppError::Store(StoreError::Corrupt("bad json".into())).code(),
            ErrorCode::Internal
        );
        assert_eq!(
            AppError::Store(StoreError::Contention("submission".into())).code(),
            ErrorCode::Unavailable
        );
    }
}
