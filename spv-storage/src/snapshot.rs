//! On-disk wallet snapshot
//!
//! One JSON document holds everything needed to resume a wallet without
//! rescanning: derivation scheme, the sealed seed (or the account xpub of
//! a watch-only wallet), the active header branch, the UTXO set with its
//! history cache, and the address book with its gap counters. Only the
//! seed is secret; it is sealed under a passphrase key.

use crate::security::{random_salt, KdfParams, SealingKey};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spv_chain::ChainSnapshot;
use spv_core::{AddressBookState, DerivationScheme};
use spv_params::NetworkType;
use spv_sync::UtxoSet;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Format version written by this build
pub const SNAPSHOT_VERSION: u32 = 1;

/// Key material as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredKeys {
    /// Seed sealed under a passphrase key
    Seed {
        /// Argon2id cost the key was derived with
        kdf: KdfParams,
        /// Derivation salt
        #[serde(with = "base64_bytes")]
        salt: Vec<u8>,
        /// Sealed seed
        #[serde(with = "base64_bytes")]
        sealed: Vec<u8>,
    },
    /// Account extended public key of a watch-only wallet
    WatchOnly {
        /// Base58 xpub
        xpub: String,
    },
}

impl StoredKeys {
    /// Seal `seed` under `passphrase` with a fresh salt
    pub fn seal_seed(seed: &[u8], passphrase: &str, kdf: KdfParams) -> Result<Self> {
        let salt = random_salt();
        let key = SealingKey::derive(passphrase, &salt, &kdf)?;
        Ok(StoredKeys::Seed {
            kdf,
            salt: salt.to_vec(),
            sealed: key.seal(seed)?,
        })
    }

    /// Recover the seed
    pub fn open_seed(&self, passphrase: &str) -> Result<Zeroizing<Vec<u8>>> {
        match self {
            StoredKeys::Seed { kdf, salt, sealed } => {
                SealingKey::derive(passphrase, salt, kdf)?.open(sealed)
            }
            StoredKeys::WatchOnly { .. } => Err(Error::NoSeed),
        }
    }

    /// Whether spending keys are stored
    pub fn is_watch_only(&self) -> bool {
        matches!(self, StoredKeys::WatchOnly { .. })
    }
}

/// Persisted wallet state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletSnapshot {
    /// Format version
    pub version: u32,
    /// Network the wallet belongs to
    pub network: NetworkType,
    /// Key layout
    pub scheme: DerivationScheme,
    /// Seed or xpub
    pub keys: StoredKeys,
    /// Active header branch
    pub chain: ChainSnapshot,
    /// Active tip height when saved
    pub headers_height: u32,
    /// UTXO set and history cache
    pub utxos: UtxoSet,
    /// Derived addresses and gap counters
    pub addresses: AddressBookState,
    /// When the snapshot was taken
    pub saved_at: DateTime<Utc>,
}

impl WalletSnapshot {
    /// Snapshot stamped with the current format version and time
    pub fn new(
        network: NetworkType,
        scheme: DerivationScheme,
        keys: StoredKeys,
        chain: ChainSnapshot,
        headers_height: u32,
        utxos: UtxoSet,
        addresses: AddressBookState,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            network,
            scheme,
            keys,
            chain,
            headers_height,
            utxos,
            addresses,
            saved_at: Utc::now(),
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse JSON, rejecting unknown format versions before anything else
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let found = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .ok_or_else(|| Error::Corrupt("missing format version".to_string()))?;
        if found != u64::from(SNAPSHOT_VERSION) {
            return Err(Error::UnsupportedVersion {
                found,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Write atomically: a temp file beside `path`, synced, then renamed over it
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = temp_path(path);
        {
            let mut file = create_private(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        info!(
            path = %path.display(),
            height = self.headers_height,
            utxos = self.utxos.len(),
            "Saved wallet snapshot"
        );
        Ok(())
    }

    /// Read a snapshot from `path`
    pub fn load(path: &Path) -> Result<Self> {
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(path.to_path_buf()))
            }
            Err(e) => return Err(e.into()),
        };
        let snapshot = Self::from_json(&json)?;
        debug!(path = %path.display(), height = snapshot.headers_height, "Loaded wallet snapshot");
        Ok(snapshot)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn create_private(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::fast_params;

    #[test]
    fn test_seed_round_trip() {
        let keys = StoredKeys::seal_seed(&[3u8; 64], "hunter22", fast_params()).unwrap();
        assert!(!keys.is_watch_only());
        assert_eq!(&keys.open_seed("hunter22").unwrap()[..], &[3u8; 64][..]);
        assert!(matches!(keys.open_seed("hunter23"), Err(Error::WrongPassphrase)));
    }

    #[test]
    fn test_watch_only_has_no_seed() {
        let keys = StoredKeys::WatchOnly {
            xpub: "tpubexample".to_string(),
        };
        assert!(keys.is_watch_only());
        assert!(matches!(keys.open_seed("anything"), Err(Error::NoSeed)));
    }

    #[test]
    fn test_stored_keys_json_shape() {
        let keys = StoredKeys::seal_seed(b"seed", "pass", fast_params()).unwrap();
        let json = serde_json::to_value(&keys).unwrap();
        assert_eq!(json["kind"], "seed");
        assert!(json["salt"].is_string());
        assert_eq!(serde_json::from_value::<StoredKeys>(json).unwrap(), keys);
    }

    #[test]
    fn test_temp_path_beside_target() {
        let tmp = temp_path(Path::new("/data/wallet.json"));
        assert_eq!(tmp, PathBuf::from("/data/wallet.json.tmp"));
    }
}
