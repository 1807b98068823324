//! Encrypted wallet snapshots
//!
//! Provides:
//! - Argon2id passphrase keys and ChaCha20-Poly1305 sealing
//! - A versioned JSON snapshot of everything needed to resume sync
//! - Atomic snapshot writes

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod security;
pub mod snapshot;

pub use error::{Error, Result};
pub use security::{random_salt, KdfParams, SealingKey, SALT_LEN};
pub use snapshot::{StoredKeys, WalletSnapshot, SNAPSHOT_VERSION};
