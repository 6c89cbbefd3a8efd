//! Error types for the consensus engine

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the consensus engine
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Probe errors
    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    #[error("Probe timed out after {0}ms")]
    ProbeTimeout(u64),

    #[error("Probe failure: {0}")]
    ProbeFailure(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    // Delivery errors
    #[error("Alert delivery failed: {0}")]
    AlertDelivery(String),

    // Persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Check if this error is retryable (transient)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::TransientFetch(_) | Error::ProbeTimeout(_) | Error::Rpc(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Error::Serialization(e.to_string())
        } else {
            Error::TransientFetch(e.to_string())
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::TransientFetch("502".into()).is_retryable());
        assert!(Error::ProbeTimeout(15_000).is_retryable());
        assert!(!Error::ProbeFailure("account missing".into()).is_retryable());
        assert!(!Error::Config("bad".into()).is_retryable());
    }

    #[test]
    fn test_persistence_errors_convert() {
        let io: Error = std::io::Error::new(std::io::ErrorKind::Other, "disk full").into();
        assert!(matches!(io, Error::Io(_)));
        let db: Error = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(db, Error::Storage(_)));
        assert!(!db.is_retryable());
    }
}
