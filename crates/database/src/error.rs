// database/error.rs - error type returned by every query in this crate

use thiserror::Error;

use crate::properties::model::DeletionStatus;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("database error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("failed to encode document: {0}")]
    Bson(#[from] mongodb::bson::ser::Error),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0} already exists")]
    Duplicate(&'static str),

    #[error("cannot move deletion status from {from} to {to}")]
    InvalidTransition {
        from: DeletionStatus,
        to: DeletionStatus,
    },

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("failed to sign token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

impl DbError {
    /// Duplicate key violations surface as write errors with code 11000.
    pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
        use mongodb::error::{ErrorKind, WriteFailure};

        match err.kind.as_ref() {
            ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == 11000,
            ErrorKind::Command(e) => e.code == 11000,
            _ => false,
        }
    }
}
