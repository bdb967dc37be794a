//! Custom error types for the common library
//!
//! This module defines the error types shared by every catalog store
//! implementation and by the settings loader.

use sqlx::Error as SqlxError;
use thiserror::Error;

/// Custom error type for database operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred during database connection
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during database query execution
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// A row with the same unique key already exists
    #[error("Duplicate catalog entry: {0}")]
    Duplicate(String),

    /// Error occurred during database migration
    #[error("Database migration error: {0}")]
    Migration(String),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

impl DatabaseError {
    /// Classify a query error, turning unique violations into `Duplicate`.
    pub fn from_query(err: SqlxError) -> Self {
        match err.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => {
                DatabaseError::Duplicate(db_err.message().to_string())
            }
            _ => DatabaseError::Query(err),
        }
    }
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Errors raised while loading or validating settings.
///
/// These are fatal: the services refuse to start when they occur.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The configuration sources could not be read or deserialized
    #[error("Failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    /// A setting is present but unusable
    #[error("Invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}
