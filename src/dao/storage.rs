use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by blob stores regardless of the underlying medium.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying medium rejected the operation.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Human-readable description of the failed operation.
        message: String,
        /// Backend failure that triggered the error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A stored blob exists but cannot be decoded.
    #[error("stored blob under `{key}` is corrupt")]
    Corrupt {
        /// Key the unreadable blob was stored under.
        key: String,
        /// Decoding failure that triggered the error.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a corrupt-blob error for the given key.
    pub fn corrupt(key: &str, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Corrupt {
            key: key.to_string(),
            source: Box::new(source),
        }
    }
}
