//! SPV wallet API
//!
//! Ties the wallet crates together behind one [`WalletSession`]:
//! - Wallet creation from a seed, a mnemonic or an account xpub
//! - Encrypted snapshot save and restore
//! - Sync, balance and address queries
//! - Transaction building, signing and broadcast
//! - Payment request verification

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod session;

pub use config::WalletConfig;
pub use error::{Error, Result};
pub use session::WalletSession;

pub use spv_core::{
    AddressRole, DerivationScheme, ErrorCategory, FeePolicy, Hash256, PaymentOutput,
    UnsignedTransaction, VerifiedRequest,
};
pub use spv_params::NetworkType;
pub use spv_storage::KdfParams;
pub use spv_sync::{Balance, SyncConfig, SyncReport, SyncStatus};
