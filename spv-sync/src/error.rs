//! Error types for sync operations

use spv_core::Hash256;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A server's merkle proof did not link the transaction to the active chain
    #[error("Inclusion verification failed for {txid} at height {height}")]
    InclusionVerificationFailed {
        /// Transaction id
        txid: Hash256,
        /// Height the server claimed
        height: u32,
    },

    /// A server returned data that does not match what was asked for
    #[error("Server {server} sent invalid data: {reason}")]
    InvalidServerData {
        /// Server address
        server: String,
        /// What was wrong
        reason: String,
    },

    /// Network error
    #[error("Network error: {0}")]
    Net(#[from] spv_net::Error),

    /// Header chain error
    #[error("Chain error: {0}")]
    Chain(#[from] spv_chain::Error),

    /// Wallet core error
    #[error("Wallet error: {0}")]
    Core(#[from] spv_core::Error),

    /// Operation cancelled
    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    /// Whether the error is attributable to the server that sent the data
    pub fn is_server_fault(&self) -> bool {
        match self {
            Error::InclusionVerificationFailed { .. } | Error::InvalidServerData { .. } => true,
            Error::Chain(e) => e.is_peer_fault(),
            _ => false,
        }
    }
}
