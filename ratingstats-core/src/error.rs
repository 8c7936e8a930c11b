//! Error types for ratingstats-core

use thiserror::Error;

/// Main error type for the ratingstats-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error (settings file)
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid rating field configuration
    #[error("invalid rating field configuration: {0}")]
    FieldConfig(String),

    /// A grouping handle that does not exist on the form
    #[error("group by field '{0}' not found in form")]
    GroupFieldNotFound(String),

    /// Writing a statistics cache entry failed
    #[error("cache write failed: {0}")]
    CacheWrite(String),

    /// A required collaborator was not wired in
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// Form not found
    #[error("form not found: {0}")]
    FormNotFound(i64),

    /// Form has no rating fields to report on
    #[error("form {0} does not contain any rating fields")]
    NoRatingFields(i64),

    /// Rating field not found on a form
    #[error("field not found: {0}")]
    FieldNotFound(String),

    /// Job queue error
    #[error("queue error: {0}")]
    Queue(String),
}

/// Result type alias for ratingstats-core
pub type Result<T> = std::result::Result<T, Error>;
