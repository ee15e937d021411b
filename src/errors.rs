use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Job id space exhausted after {attempts} attempts")]
    JidSpaceExhausted { attempts: u32 },

    #[error("Config error: {0}")]
    Config(String),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => CacheError::PermissionDenied(err.to_string()),
            _ => CacheError::Storage(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<globset::Error> for CacheError {
    fn from(err: globset::Error) -> Self {
        CacheError::Validation(err.to_string())
    }
}
