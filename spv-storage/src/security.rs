//! Passphrase key derivation and sealing
//!
//! Keys come from Argon2id over the passphrase and a random salt. Sealed
//! data uses ChaCha20-Poly1305 with the layout
//! `[version(1)][algorithm(1)][nonce(12)][ciphertext]`.

use crate::{Error, Result};
use argon2::{Argon2, ParamsBuilder, Version};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Layout version of sealed data
const SEAL_VERSION: u8 = 1;
/// Algorithm tag for ChaCha20-Poly1305
const ALGORITHM_CHACHA20: u8 = 1;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 2 + NONCE_LEN;

/// Salt length for passphrase derivation
pub const SALT_LEN: usize = 16;

/// Argon2id cost parameters, stored next to the data they protect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory in KiB
    pub memory_kib: u32,
    /// Passes over memory
    pub iterations: u32,
    /// Parallel lanes
    pub lanes: u32,
}

impl Default for KdfParams {
    /// 64 MiB, 3 iterations, 4 lanes
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            lanes: 4,
        }
    }
}

/// Fresh random salt
pub fn random_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Symmetric key derived from a passphrase
pub struct SealingKey {
    key: Zeroizing<[u8; 32]>,
}

impl SealingKey {
    /// Derive with Argon2id
    pub fn derive(passphrase: &str, salt: &[u8], params: &KdfParams) -> Result<Self> {
        if salt.len() < SALT_LEN {
            return Err(Error::Encryption("Salt too short".to_string()));
        }
        let params = ParamsBuilder::new()
            .m_cost(params.memory_kib)
            .t_cost(params.iterations)
            .p_cost(params.lanes)
            .output_len(32)
            .build()
            .map_err(|e| Error::Encryption(e.to_string()))?;
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; 32]);
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut *key)
            .map_err(|e| Error::Encryption(e.to_string()))?;
        Ok(Self { key })
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.key[..]))
    }

    /// Encrypt under a fresh random nonce
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher()
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| Error::Encryption(e.to_string()))?;

        let mut sealed = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        sealed.push(SEAL_VERSION);
        sealed.push(ALGORITHM_CHACHA20);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypt data produced by [`SealingKey::seal`]
    pub fn open(&self, sealed: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if sealed.len() < HEADER_LEN {
            return Err(Error::Corrupt("sealed data too short".to_string()));
        }
        if sealed[0] != SEAL_VERSION {
            return Err(Error::Corrupt(format!(
                "unsupported sealing version {}",
                sealed[0]
            )));
        }
        if sealed[1] != ALGORITHM_CHACHA20 {
            return Err(Error::Corrupt(format!("unknown cipher {}", sealed[1])));
        }
        let nonce = Nonce::from_slice(&sealed[2..HEADER_LEN]);
        self.cipher()
            .decrypt(nonce, &sealed[HEADER_LEN..])
            .map(Zeroizing::new)
            .map_err(|_| Error::WrongPassphrase)
    }
}

impl std::fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SealingKey(..)")
    }
}

#[cfg(test)]
pub(crate) fn fast_params() -> KdfParams {
    KdfParams {
        memory_kib: 64,
        iterations: 1,
        lanes: 1,
    }
}
