//! Error types for the wallet core
//!
//! Covers key derivation, transaction building and signing, and payment
//! request validation.

use crate::payment_request::InvalidReason;
use std::fmt;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Wallet core errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Derivation step not possible from the available key material
    #[error("Invalid derivation: {0}")]
    InvalidDerivation(String),

    /// No private key is available for a required derivation path
    #[error("Missing key: {0}")]
    MissingKey(String),

    /// Insufficient funds for transaction
    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Outputs plus estimated fee
        required: u64,
        /// Sum of every spendable output
        available: u64,
    },

    /// Payment request failed validation
    #[error("Payment request invalid: {0}")]
    RequestInvalid(InvalidReason),

    /// Invalid address format
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Amount overflow
    #[error("Amount overflow: {0}")]
    AmountOverflow(String),

    /// Fee too low
    #[error("Fee too low: {0}")]
    FeeTooLow(String),

    /// Fee too high
    #[error("Fee too high: {0}")]
    FeeTooHigh(String),

    /// Transaction building error
    #[error("Transaction build error: {0}")]
    TransactionBuild(String),

    /// Transaction signing error
    #[error("Transaction signing error: {0}")]
    TransactionSigning(String),

    /// Wire data could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid key
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Invalid mnemonic
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// Invalid seed
    #[error("Invalid seed: {0}")]
    InvalidSeed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<bip32::Error> for Error {
    fn from(e: bip32::Error) -> Self {
        match e {
            bip32::Error::SeedLength => Error::InvalidSeed(e.to_string()),
            bip32::Error::ChildNumber => Error::InvalidDerivation(e.to_string()),
            _ => Error::InvalidKey(e.to_string()),
        }
    }
}

impl From<secp256k1::Error> for Error {
    fn from(e: secp256k1::Error) -> Self {
        Error::InvalidKey(e.to_string())
    }
}

impl Error {
    /// Check if error is a user-facing error (vs internal error)
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::InsufficientFunds { .. }
                | Error::InvalidAddress(_)
                | Error::InvalidAmount(_)
                | Error::FeeTooLow(_)
                | Error::FeeTooHigh(_)
                | Error::InvalidMnemonic(_)
                | Error::MissingKey(_)
                | Error::InvalidDerivation(_)
                | Error::RequestInvalid(_)
        )
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Error::InsufficientFunds { .. } => {
                "You don't have enough funds for this transaction. Please check your balance and try again.".to_string()
            }
            Error::InvalidAddress(_) => {
                "The recipient address is invalid. Please check and try again.".to_string()
            }
            Error::InvalidAmount(_) => {
                "The amount is invalid. Please enter a valid amount.".to_string()
            }
            Error::InvalidMnemonic(_) => {
                "The recovery phrase is invalid. Please check and try again.".to_string()
            }
            Error::MissingKey(_) => {
                "This wallet cannot sign for one of the selected coins.".to_string()
            }
            Error::RequestInvalid(reason) => {
                format!("The payment request was rejected: {}", reason)
            }
            _ => self.to_string(),
        }
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InsufficientFunds { .. } | Error::InvalidAmount(_) | Error::AmountOverflow(_) => {
                ErrorCategory::Amount
            }
            Error::InvalidAddress(_) => ErrorCategory::Address,
            Error::FeeTooLow(_) | Error::FeeTooHigh(_) => ErrorCategory::Fee,
            Error::TransactionBuild(_) | Error::TransactionSigning(_) | Error::Decode(_) => {
                ErrorCategory::Transaction
            }
            Error::InvalidDerivation(_) | Error::MissingKey(_) | Error::InvalidKey(_) => {
                ErrorCategory::Keys
            }
            Error::RequestInvalid(_) => ErrorCategory::PaymentRequest,
            Error::InvalidMnemonic(_) | Error::InvalidSeed(_) => ErrorCategory::Wallet,
            Error::Serialization(_) => ErrorCategory::Internal,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Amount-related errors
    Amount,
    /// Address-related errors
    Address,
    /// Fee-related errors
    Fee,
    /// Transaction-related errors
    Transaction,
    /// Key-related errors
    Keys,
    /// Payment request errors
    PaymentRequest,
    /// Wallet-related errors
    Wallet,
    /// Server and connectivity errors
    Network,
    /// Header chain errors
    Chain,
    /// Snapshot and passphrase errors
    Storage,
    /// Internal/system errors
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Amount => write!(f, "Amount"),
            ErrorCategory::Address => write!(f, "Address"),
            ErrorCategory::Fee => write!(f, "Fee"),
            ErrorCategory::Transaction => write!(f, "Transaction"),
            ErrorCategory::Keys => write!(f, "Keys"),
            ErrorCategory::PaymentRequest => write!(f, "PaymentRequest"),
            ErrorCategory::Wallet => write!(f, "Wallet"),
            ErrorCategory::Network => write!(f, "Network"),
            ErrorCategory::Chain => write!(f, "Chain"),
            ErrorCategory::Storage => write!(f, "Storage"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}
