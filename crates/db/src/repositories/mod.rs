use thiserror::Error;

use enrolla_core::errors::ApplicationError;

pub mod memory;
pub mod sqlite;

pub use memory::{InMemoryCommerceStore, InMemoryCommerceTx};
pub use sqlite::{SqlCommerceStore, SqlCommerceTx};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl RepositoryError {
    /// Unique-constraint violations mean a concurrent writer got there first.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(error) => {
                error.as_database_error().is_some_and(|db| db.is_unique_violation())
            }
            Self::Decode(_) => false,
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        if error.is_unique_violation() {
            return ApplicationError::Conflict(error.to_string());
        }
        ApplicationError::Persistence(error.to_string())
    }
}
