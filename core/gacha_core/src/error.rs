use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),
    #[error("legacy store read failed: {0}")]
    LegacyRead(String),
    #[error("invalid entry '{id}': {reason}")]
    InvalidEntry { id: String, reason: String },
    #[error("unknown game tag '{0}'")]
    UnknownGame(String),
}

impl StoreError {
    /// Short machine code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Persistence(_) => "db_error",
            StoreError::LegacyRead(_) => "legacy_read_error",
            StoreError::InvalidEntry { .. } => "invalid_entry",
            StoreError::UnknownGame(_) => "unknown_game",
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            StoreError::InvalidEntry { .. } | StoreError::UnknownGame(_)
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
