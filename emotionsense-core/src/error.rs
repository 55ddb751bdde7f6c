use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EmotionSenseError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Detector error: {0}")]
    Detector(#[from] crate::detector::DetectorError),

    #[error("Other error: {0}")]
    Other(String),
}

/// Errors raised by an [`crate::store::EmotionStore`] implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("an active {0} already exists for this user")]
    AlreadyActive(&'static str),

    #[error("session {0} is closed")]
    SessionClosed(Uuid),

    #[error("gave up settling the active {0} after concurrent updates")]
    Contention(&'static str),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        StoreError::NotFound { entity, id }
    }
}
