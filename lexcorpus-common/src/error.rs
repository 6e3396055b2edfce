//! Common error types for lexcorpus

use thiserror::Error;

/// Common result type for lexcorpus operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across lexcorpus services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed denormalization mapping registration.
    ///
    /// Fatal by design: a misconfigured mapping must abort the enclosing
    /// transaction rather than produce partially-denormalized rows.
    #[error("Denormalization configuration error: {0}")]
    DenormConfig(String),

    /// A non-null linking value matched zero (or several) source rows
    /// while the strict dangling-reference policy was in effect.
    #[error("Dangling reference: {0}")]
    DanglingReference(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
