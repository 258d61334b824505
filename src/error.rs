//! Error types for the car price bot.

use std::time::Duration;

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Inference error: {0}")]
    Inference(#[from] InferenceError),

    #[error("Collection error: {0}")]
    Collection(#[from] CollectionError),

    #[error("Rating error: {0}")]
    Rating(#[from] RatingError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to download file on channel {name}: {reason}")]
    DownloadFailed { name: String, reason: String },

    #[error("No channel registered with name {0}")]
    UnknownChannel(String),
}

/// Prediction adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Prediction service request failed: {0}")]
    RequestFailed(String),

    #[error("Prediction service timed out after {0:?}")]
    Timeout(Duration),

    #[error("Prediction service returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid response from prediction service: {0}")]
    InvalidResponse(String),
}

/// Collection engine errors.
///
/// Validation failures are not errors (they produce a re-prompt); these cover
/// records that cannot be assembled into the typed shape.
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("Field {0} missing from completed session")]
    MissingField(&'static str),

    #[error("Field {field} has unparseable value {value:?}")]
    Unparseable { field: &'static str, value: String },
}

/// Rating ledger errors.
#[derive(Debug, thiserror::Error)]
pub enum RatingError {
    #[error("Rating {0} is out of range (expected 1..=5)")]
    InvalidRating(i64),

    #[error("Rating storage unavailable: {0}")]
    Storage(#[from] DatabaseError),
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
