//! Error types for header chain operations

use spv_core::Hash256;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Header chain errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Header hash does not meet its target, or the target is wrong
    #[error("Invalid proof of work: {0}")]
    InvalidProofOfWork(String),

    /// Parent is unknown; the header was buffered until it arrives
    #[error("Orphan header: parent {0} unknown")]
    OrphanHeader(Hash256),

    /// Orphan buffer was full; the oldest buffered headers were dropped to
    /// make room for this one
    #[error("Orphan buffer full: dropped {evicted} headers to buffer child of {parent}")]
    OrphanOverflow {
        /// Unknown parent of the buffered header
        parent: Hash256,
        /// Headers dropped
        evicted: usize,
    },

    /// Header fails a non-work validity rule
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Chain root could not be built
    #[error("Invalid chain root: {0}")]
    InvalidRoot(String),

    /// Parameter error
    #[error("Parameter error: {0}")]
    Params(#[from] spv_params::Error),

    /// Wire decoding error
    #[error("Decode error: {0}")]
    Decode(#[from] spv_core::Error),
}

impl Error {
    /// Whether the peer that sent the header supplied invalid data
    pub fn is_peer_fault(&self) -> bool {
        matches!(
            self,
            Error::InvalidProofOfWork(_) | Error::InvalidHeader(_) | Error::Decode(_)
        )
    }
}
