//! Error types for the Ascent round engine
//!
//! Participant-facing rejections live in [`crate::games::BetError`]; this module
//! holds the process-level errors raised while configuring, persisting and
//! driving rounds.

use std::fmt;

/// Root error type for all Ascent operations
#[derive(Debug)]
pub enum AscentError {
    /// Configuration related errors
    Configuration(ConfigurationError),

    /// Round journal errors
    Storage(StorageError),

    /// Round engine errors
    Engine(EngineError),
}

/// Configuration and validation errors
#[derive(Debug)]
pub enum ConfigurationError {
    ValidationFailed(String),
    MissingRequired(String),
    InvalidValue { field: String, value: String, reason: String },
    LoadFailed(String),
    SaveFailed(String),
}

/// Round journal errors
#[derive(Debug)]
pub enum StorageError {
    OpenFailed(String),
    ReadFailed(String),
    WriteFailed(String),
    CorruptedData(String),
}

/// Round engine errors
#[derive(Debug)]
pub enum EngineError {
    /// The scheduler task stopped unexpectedly
    SchedulerFailed(String),
    /// Metric registration or encoding failed
    MetricsFailed(String),
}

impl fmt::Display for AscentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AscentError::Configuration(e) => write!(f, "Configuration error: {}", e),
            AscentError::Storage(e) => write!(f, "Storage error: {}", e),
            AscentError::Engine(e) => write!(f, "Engine error: {}", e),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::ValidationFailed(msg) => write!(f, "Validation failed: {}", msg),
            ConfigurationError::MissingRequired(field) => write!(f, "Missing required field: {}", field),
            ConfigurationError::InvalidValue { field, value, reason } => {
                write!(f, "Invalid value for {}: '{}' ({})", field, value, reason)
            }
            ConfigurationError::LoadFailed(msg) => write!(f, "Failed to load configuration: {}", msg),
            ConfigurationError::SaveFailed(msg) => write!(f, "Failed to save configuration: {}", msg),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::OpenFailed(msg) => write!(f, "Journal open failed: {}", msg),
            StorageError::ReadFailed(msg) => write!(f, "Read failed: {}", msg),
            StorageError::WriteFailed(msg) => write!(f, "Write failed: {}", msg),
            StorageError::CorruptedData(msg) => write!(f, "Corrupted data: {}", msg),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::SchedulerFailed(msg) => write!(f, "Scheduler failed: {}", msg),
            EngineError::MetricsFailed(msg) => write!(f, "Metrics failed: {}", msg),
        }
    }
}

impl std::error::Error for AscentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AscentError::Configuration(e) => Some(e),
            AscentError::Storage(e) => Some(e),
            AscentError::Engine(e) => Some(e),
        }
    }
}

impl std::error::Error for ConfigurationError {}
impl std::error::Error for StorageError {}
impl std::error::Error for EngineError {}

impl From<ConfigurationError> for AscentError {
    fn from(e: ConfigurationError) -> Self {
        AscentError::Configuration(e)
    }
}

impl From<StorageError> for AscentError {
    fn from(e: StorageError) -> Self {
        AscentError::Storage(e)
    }
}

impl From<EngineError> for AscentError {
    fn from(e: EngineError) -> Self {
        AscentError::Engine(e)
    }
}

// External error conversions
impl From<rocksdb::Error> for AscentError {
    fn from(e: rocksdb::Error) -> Self {
        AscentError::Storage(StorageError::WriteFailed(e.to_string()))
    }
}

impl From<bincode::Error> for AscentError {
    fn from(e: bincode::Error) -> Self {
        AscentError::Storage(StorageError::CorruptedData(e.to_string()))
    }
}

impl From<prometheus::Error> for AscentError {
    fn from(e: prometheus::Error) -> Self {
        AscentError::Engine(EngineError::MetricsFailed(e.to_string()))
    }
}

impl From<std::io::Error> for AscentError {
    fn from(e: std::io::Error) -> Self {
        AscentError::Storage(StorageError::ReadFailed(e.to_string()))
    }
}

/// Convenience type alias for Results
pub type AscentResult<T> = Result<T, AscentError>;
