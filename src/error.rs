//! Error types for taskq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied key collides with the engine's reserved namespace.
    #[error("field name {0:?} is reserved for queue metadata")]
    ReservedField(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("malformed task document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when the caller passed something the engine refuses before
    /// talking to the store.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::ReservedField(_) | Error::InvalidArgument(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
