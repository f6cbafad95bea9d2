use thiserror::Error;

/// Main error type for the agreement bot
#[derive(Error, Debug)]
pub enum AgbotError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Unsupported agreement protocol: {0}")]
    UnsupportedProtocol(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Persistence errors
    #[error("Agreement already exists: {0}")]
    DuplicateAgreement(String),

    #[error("Agreement not found: {0}")]
    AgreementNotFound(String),

    #[error("Agreement already terminated: {0}")]
    AgreementTerminated(String),

    // Device communication errors
    #[error("Unable to resolve endpoint for device {device_id}: {reason}")]
    EndpointResolution { device_id: String, reason: String },

    #[error("Unable to create message target for device {device_id}: {reason}")]
    MessageTarget { device_id: String, reason: String },

    #[error("Message delivery failed: {0}")]
    MessageDelivery(String),

    // Protocol errors
    #[error("Protocol recording failed: {0}")]
    ProtocolRecord(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    // Worker pool errors
    #[error("Work queue closed")]
    WorkQueueClosed,

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for AgbotError
pub type Result<T> = std::result::Result<T, AgbotError>;
