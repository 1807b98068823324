//! SPV synchronizer
//!
//! Reconciles the wallet's UTXO set with server-reported address
//! histories. Nothing a server says is applied until its merkle proof
//! verifies against the locally validated header chain.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod cancel;
pub mod config;
pub mod error;
pub mod progress;
pub mod store;
pub mod synchronizer;
mod writer;

pub use api::{ServerApi, ServerEvent, ServerEvents};
pub use cancel::CancelToken;
pub use config::SyncConfig;
pub use error::{Error, Result};
pub use progress::{SyncProgress, SyncStage, SyncStatus, SyncWarning};
pub use store::{
    Applied, Balance, HistoryItem, Owner, ReorgImpact, SpentOutput, TxRecord, UtxoSet, UtxoStore,
};
pub use synchronizer::{HeaderSync, SyncReport, Synchronizer};
pub use writer::owner_of;
