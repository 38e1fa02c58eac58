//! Error types for Onboardly.

use uuid::Uuid;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid cron schedule '{schedule}': {message}")]
    InvalidSchedule { schedule: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Invalid step content for kind {kind}: {message}")]
    InvalidStepContent { kind: String, message: String },
}

/// Outbound notification errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Channel {channel} is not configured")]
    ChannelDisabled { channel: String },

    #[error("Send via {channel} failed: {reason}")]
    SendFailed { channel: String, reason: String },

    #[error("Missing recipient for {channel} notification")]
    MissingRecipient { channel: String },
}

/// Webhook delivery errors. Logged and swallowed by the notifier —
/// webhook delivery is fire-and-forget and never aborts an engine pass.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Webhook POST to {url} failed: {reason}")]
    PostFailed { url: String, reason: String },

    #[error("Webhook POST to {url} returned status {status}")]
    BadStatus { url: String, status: u16 },
}

/// Flow engine errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Enrollment {id}: step index {index} out of range (flow has {len} steps)")]
    StepIndexOutOfRange { id: Uuid, index: usize, len: usize },
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
