use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Surrogate identifier assigned by the record store.
pub type RecordId = i64;

/// A persisted image ingestion record.
///
/// `file_path` referenced an existing file when the record was created but
/// may dangle afterwards; startup reconciliation removes such records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: RecordId,
    /// Absolute path of the image on disk.
    pub file_path: String,
    /// Ingestion time (not sender-supplied).
    pub captured_at: DateTime<Utc>,
    /// Telemetry reading cached when the image arrived, if any.
    pub telemetry_level: Option<f64>,
    pub comment: Option<String>,
}

/// The minimal projection used by reconciliation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRef {
    pub id: RecordId,
    pub file_path: String,
}

/// Application log level.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}
