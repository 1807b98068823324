//! Error types

use spv_core::ErrorCategory;

/// Wallet API errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Keys, addresses, transactions and payment requests
    #[error(transparent)]
    Core(#[from] spv_core::Error),

    /// Header chain
    #[error(transparent)]
    Chain(#[from] spv_chain::Error),

    /// Server connectivity
    #[error(transparent)]
    Net(#[from] spv_net::Error),

    /// Synchronization
    #[error(transparent)]
    Sync(#[from] spv_sync::Error),

    /// Snapshot persistence
    #[error(transparent)]
    Storage(#[from] spv_storage::Error),

    /// Network parameters
    #[error(transparent)]
    Params(#[from] spv_params::Error),

    /// Configuration file I/O
    #[error("Configuration I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file format
    #[error("Configuration format error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// The session was closed
    #[error("Wallet session is closed")]
    Closed,
}

impl Error {
    /// Whether the caller must decide how to proceed (vs an internal failure)
    pub fn is_user_error(&self) -> bool {
        match self {
            Error::Core(e) | Error::Sync(spv_sync::Error::Core(e)) => e.is_user_error(),
            Error::Storage(spv_storage::Error::WrongPassphrase | spv_storage::Error::NotFound(_)) => {
                true
            }
            Error::Config(_) | Error::Closed => true,
            _ => false,
        }
    }

    /// Stable category for logging and front-end handling
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Core(e) | Error::Sync(spv_sync::Error::Core(e)) => e.category(),
            Error::Net(_) | Error::Sync(_) => ErrorCategory::Network,
            Error::Chain(_) => ErrorCategory::Chain,
            Error::Storage(_) => ErrorCategory::Storage,
            Error::Closed | Error::Config(_) | Error::Params(_) | Error::Io(_) | Error::Serialization(_) => {
                ErrorCategory::Wallet
            }
        }
    }
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors() {
        let funds = Error::from(spv_core::Error::InsufficientFunds {
            required: 10,
            available: 5,
        });
        assert!(funds.is_user_error());
        assert_eq!(funds.category(), ErrorCategory::Amount);

        let wrong = Error::from(spv_storage::Error::WrongPassphrase);
        assert!(wrong.is_user_error());
        assert_eq!(wrong.category(), ErrorCategory::Storage);

        let down = Error::from(spv_net::Error::unavailable("a:1", "refused"));
        assert!(!down.is_user_error());
        assert_eq!(down.category(), ErrorCategory::Network);

        let unsignable = Error::from(spv_core::Error::MissingKey("m/44'/2'/0'/0/0".to_string()));
        assert!(unsignable.is_user_error());
        assert_eq!(unsignable.category(), ErrorCategory::Keys);
    }
}
