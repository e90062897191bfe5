use serde::Serialize;

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Warming task failed: {0}")]
    Task(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CacheError {
    /// Storage and serialization failures never reach business logic;
    /// the store boundary downgrades them to a logged miss.
    pub fn is_swallowed_at_store(&self) -> bool {
        matches!(self, CacheError::Storage(_) | CacheError::Serialization(_))
    }
}

// Add From implementations for common error types
impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Storage(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(format!("JSON error: {}", err))
    }
}

impl From<regex::Error> for CacheError {
    fn from(err: regex::Error) -> Self {
        CacheError::Config(format!("Pattern error: {}", err))
    }
}

/// Error kind label used in metrics and structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Storage,
    Serialization,
    Network,
    Task,
    Config,
}

impl CacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CacheError::Storage(_) => ErrorKind::Storage,
            CacheError::Serialization(_) => ErrorKind::Serialization,
            CacheError::Network(_) => ErrorKind::Network,
            CacheError::Task(_) => ErrorKind::Task,
            CacheError::Config(_) => ErrorKind::Config,
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
