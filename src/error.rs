//! Error types for biocrawl.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("profile not found: {0}")]
    NotFound(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("identity rotation failed: {0}")]
    Rotation(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for failures of the shared lease store. These end the run.
    pub fn is_store_error(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Migration(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
