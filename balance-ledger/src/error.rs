//! Error types for the balance ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// A declined `take` is not an error: it resolves to `Ok(false)` so callers
/// can tell "insufficient balance" apart from "store is down".
#[derive(Error, Debug)]
pub enum Error {
    /// Rejected before any store interaction (negative amount, bad table name)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Connection could not be acquired or the statement failed
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The create-if-not-exists step failed
    #[error("Schema initialization failed: {0}")]
    SchemaInitialization(String),

    /// Result does not fit the value type or column
    #[error("Overflow: {0}")]
    Overflow(String),

    /// Worker pool closed or a worker dropped its result
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid_argument",
            Error::StoreUnavailable(_) => "store_unavailable",
            Error::SchemaInitialization(_) => "schema_initialization",
            Error::Overflow(_) => "overflow",
            Error::Concurrency(_) => "concurrency",
            Error::Config(_) => "config",
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::StoreUnavailable(err.to_string())
    }
}

impl From<::config::ConfigError> for Error {
    fn from(err: ::config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlx_errors_map_to_store_unavailable() {
        let err: Error = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert_eq!(err.kind(), "store_unavailable");
    }

    #[test]
    fn test_display() {
        let err = Error::InvalidArgument("amount < 0".to_string());
        assert_eq!(err.to_string(), "Invalid argument: amount < 0");
    }
}
