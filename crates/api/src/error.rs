// error.rs - API error type rendered as the JSON envelope

use super::response::ApiResponse;
use super::storage::StorageError;
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use database::DbError;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0} already exists")]
    Conflict(&'static str),

    #[error("{0}")]
    InvalidState(String),

    #[error("unsupported media type: {0}")]
    UnsupportedMedia(String),

    #[error("upload exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("{0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Internal(String),
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => ApiError::NotFound(what),
            DbError::Duplicate(what) => ApiError::Conflict(what),
            DbError::Validation(msg) => ApiError::BadRequest(msg),
            e @ DbError::InvalidTransition { .. } => ApiError::InvalidState(e.to_string()),
            e => {
                error!("Database failure: {}", e);
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) | ApiError::InvalidState(_) => StatusCode::CONFLICT,
            ApiError::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Storage(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(ApiResponse::<()>::failure(self.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use database::properties::model::DeletionStatus;

    #[test]
    fn database_errors_map_to_http_statuses() {
        let cases = [
            (DbError::NotFound("property"), StatusCode::NOT_FOUND),
            (DbError::Duplicate("user"), StatusCode::CONFLICT),
            (
                DbError::Validation("title is required".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                DbError::InvalidTransition {
                    from: DeletionStatus::Deleted,
                    to: DeletionStatus::Active,
                },
                StatusCode::CONFLICT,
            ),
        ];
        for (db, status) in cases {
            assert_eq!(ApiError::from(db).status_code(), status);
        }
    }

    #[test]
    fn transition_errors_keep_the_message() {
        let err = ApiError::from(DbError::InvalidTransition {
            from: DeletionStatus::Active,
            to: DeletionStatus::Deleted,
        });
        assert_eq!(
            err.to_string(),
            "cannot move deletion status from active to deleted"
        );
    }
}
