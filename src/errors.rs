// src/errors.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodeboxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML config: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("Code cannot be empty")]
    EmptyCode,

    #[error("Timeout must be between 1 and {max} seconds, got {requested}")]
    TimeoutOutOfRange { requested: u64, max: u64 },

    #[error("Batch of {size} submissions exceeds the limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("Invalid project name: '{0}'")]
    InvalidProjectName(String),

    #[error("Invalid file name: '{0}'")]
    InvalidFileName(String),

    #[error("Project '{0}' not found")]
    ProjectNotFound(String),

    #[error("Job '{0}' not found")]
    JobNotFound(String),

    #[error("Workspace quota exceeded: {used_mb:.1} MB of {limit_mb} MB")]
    QuotaExceeded { used_mb: f64, limit_mb: u64 },

    #[error("Sandbox backend '{backend}' is unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("Invalid request: {0}")]
    InvalidBody(String),

    #[error("Request too large: {0}")]
    PayloadTooLarge(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Not authenticated")]
    Unauthorized,
}

impl CodeboxError {
    /// HTTP status a handler should answer with for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            CodeboxError::UnsupportedLanguage(_)
            | CodeboxError::EmptyCode
            | CodeboxError::TimeoutOutOfRange { .. }
            | CodeboxError::BatchTooLarge { .. }
            | CodeboxError::InvalidProjectName(_)
            | CodeboxError::InvalidFileName(_)
            | CodeboxError::QuotaExceeded { .. }
            | CodeboxError::InvalidBody(_)
            | CodeboxError::JsonParse(_) => 400,
            CodeboxError::InvalidCredentials | CodeboxError::Unauthorized => 401,
            CodeboxError::ProjectNotFound(_) | CodeboxError::JobNotFound(_) => 404,
            CodeboxError::PayloadTooLarge(_) => 413,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, CodeboxError>;
