//! Error types for server communication

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The server could not be reached, dropped the connection or missed a
    /// deadline
    #[error("Server {server} unavailable: {reason}")]
    ServerUnavailable {
        /// Server address
        server: String,
        /// What went wrong
        reason: String,
    },

    /// No server is configured or every server is banned
    #[error("No servers available")]
    NoServers,

    /// The server answered with a JSON-RPC error
    #[error("Server error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message
        message: String,
    },

    /// The server sent something that is not valid JSON-RPC
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Operation cancelled
    #[error("Cancelled")]
    Cancelled,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Server unreachable for `reason`
    pub fn unavailable(server: &str, reason: impl Into<String>) -> Self {
        Error::ServerUnavailable {
            server: server.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether another attempt (possibly on another server) may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ServerUnavailable { .. } | Error::Io(_) | Error::Protocol(_)
        )
    }
}
