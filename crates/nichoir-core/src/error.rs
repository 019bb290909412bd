use thiserror::Error;

/// Top-level error type for the Nichoir ingestion system.
///
/// The per-message variants (`Persist`, `Store`, `Parse`) are contained to
/// the message that produced them; only `Connection` is fatal to the
/// receive loop.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NichoirError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Broker connection error: {0}")]
    Connection(String),

    #[error("Persist error: {0}")]
    Persist(String),

    #[error("Storage error: {0}")]
    Store(String),

    #[error("Telemetry parse error: {0}")]
    Parse(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for NichoirError {
    fn from(err: toml::de::Error) -> Self {
        NichoirError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for NichoirError {
    fn from(err: serde_json::Error) -> Self {
        NichoirError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Nichoir operations.
pub type Result<T> = std::result::Result<T, NichoirError>;
