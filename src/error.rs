//! Error types for the moderation pipeline.

use std::time::Duration;

/// Top-level error type for the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Warehouse error: {0}")]
    Warehouse(#[from] WarehouseError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Errors talking to the message warehouse.
#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("Warehouse credentials not configured")]
    NotConfigured,

    #[error("Warehouse request failed: {0}")]
    Transport(String),

    #[error("Write operations are not allowed against the warehouse. Blocked keyword: {0}")]
    Rejected(String),

    #[error("Unexpected warehouse response: {0}")]
    Malformed(String),
}

/// Errors from the external text classifier.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classifier API key not configured")]
    NotConfigured,

    #[error("Classifier call timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Classifier request failed: {0}")]
    Transport(String),

    #[error("Could not parse classifier response: {reason}")]
    Malformed { reason: String },
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
