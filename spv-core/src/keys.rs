//! Key derivation and management
//!
//! Implements BIP-32/BIP-39/BIP-44 hierarchical deterministic key derivation.
//! Seed material and private scalars stay inside [`KeyChain`]; callers get
//! public keys and signatures, never secrets.

use crate::address::AddressRole;
use crate::{Error, Result};
use bip32::{ChildNumber, Prefix};
use bip39::{Language, Mnemonic};
use secp256k1::ecdsa::Signature;
use secp256k1::{All, Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use spv_params::Network;
use std::fmt;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Extended private key over libsecp256k1 keys
pub type XPrv = bip32::ExtendedPrivateKey<SecretKey>;
/// Extended public key over libsecp256k1 keys
pub type XPub = bip32::ExtendedPublicKey<PublicKey>;

/// Bit marking a hardened child index
pub const HARDENED_FLAG: u32 = 1 << 31;

/// One step of a derivation path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathStep {
    /// Child index without the hardened bit
    pub index: u32,
    /// Whether the step uses hardened derivation
    pub hardened: bool,
}

impl PathStep {
    /// Normal (public-derivable) step
    pub const fn normal(index: u32) -> Self {
        Self {
            index,
            hardened: false,
        }
    }

    /// Hardened step
    pub const fn hardened(index: u32) -> Self {
        Self {
            index,
            hardened: true,
        }
    }

    fn child_number(&self) -> Result<ChildNumber> {
        ChildNumber::new(self.index, self.hardened)
            .map_err(|_| Error::InvalidDerivation(format!("child index {} out of range", self.index)))
    }
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.hardened {
            write!(f, "{}'", self.index)
        } else {
            write!(f, "{}", self.index)
        }
    }
}

/// Ordered sequence of derivation steps from the master key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct KeyPath(Vec<PathStep>);

impl KeyPath {
    /// The master key itself (`m`)
    pub fn master() -> Self {
        Self(Vec::new())
    }

    /// Build from steps
    pub fn from_steps(steps: Vec<PathStep>) -> Self {
        Self(steps)
    }

    /// Steps in order
    pub fn steps(&self) -> &[PathStep] {
        &self.0
    }

    /// Path extended by one step
    pub fn child(&self, step: PathStep) -> Self {
        let mut steps = self.0.clone();
        steps.push(step);
        Self(steps)
    }

    /// Steps remaining after `prefix`, if this path starts with it
    pub fn strip_prefix(&self, prefix: &KeyPath) -> Option<&[PathStep]> {
        self.0.strip_prefix(prefix.0.as_slice())
    }

    /// Number of steps
    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for step in &self.0 {
            write!(f, "/{}", step)?;
        }
        Ok(())
    }
}

impl FromStr for KeyPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('/');
        if parts.next() != Some("m") {
            return Err(Error::InvalidDerivation(format!("path must start with m: {s}")));
        }
        let mut steps = Vec::new();
        for part in parts {
            let (digits, hardened) = match part.strip_suffix('\'').or_else(|| part.strip_suffix('h')) {
                Some(d) => (d, true),
                None => (part, false),
            };
            let index: u32 = digits
                .parse()
                .map_err(|_| Error::InvalidDerivation(format!("bad path component: {part}")))?;
            if index >= HARDENED_FLAG {
                return Err(Error::InvalidDerivation(format!("index too large: {part}")));
            }
            steps.push(PathStep { index, hardened });
        }
        Ok(Self(steps))
    }
}

impl Serialize for KeyPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for KeyPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// How account keys are laid out under the master key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerivationScheme {
    /// `m/44'/coin'/account'/role/index`
    Bip44 {
        /// Account number
        account: u32,
    },
    /// `m/0'/role/index`, as used by early single-account wallets
    Legacy,
}

impl DerivationScheme {
    /// Path of the account node for this scheme on `network`
    pub fn account_path(&self, network: &Network) -> KeyPath {
        match self {
            DerivationScheme::Bip44 { account } => KeyPath::from_steps(vec![
                PathStep::hardened(44),
                PathStep::hardened(network.coin_type),
                PathStep::hardened(*account),
            ]),
            DerivationScheme::Legacy => KeyPath::from_steps(vec![PathStep::hardened(0)]),
        }
    }
}

impl Default for DerivationScheme {
    fn default() -> Self {
        DerivationScheme::Bip44 { account: 0 }
    }
}

impl fmt::Display for DerivationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DerivationScheme::Bip44 { account } => write!(f, "bip44:{}", account),
            DerivationScheme::Legacy => f.write_str("legacy"),
        }
    }
}

impl FromStr for DerivationScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "legacy" {
            return Ok(DerivationScheme::Legacy);
        }
        if s == "bip44" {
            return Ok(DerivationScheme::default());
        }
        match s.strip_prefix("bip44:").map(str::parse::<u32>) {
            Some(Ok(account)) if account < HARDENED_FLAG => Ok(DerivationScheme::Bip44 { account }),
            _ => Err(Error::InvalidDerivation(format!("unknown derivation scheme: {s}"))),
        }
    }
}

impl Serialize for DerivationScheme {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DerivationScheme {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A derived key. The private half, when present, never leaves this module.
pub struct KeyPair {
    path: KeyPath,
    public_key: PublicKey,
    secret: Option<SecretKey>,
}

impl KeyPair {
    /// Derivation path this key was produced from
    pub fn path(&self) -> &KeyPath {
        &self.path
    }

    /// Public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Compressed SEC1 public key
    pub fn public_key_bytes(&self) -> [u8; 33] {
        self.public_key.serialize()
    }

    /// Whether the private half is available
    pub fn can_sign(&self) -> bool {
        self.secret.is_some()
    }

    fn sign_digest(&self, secp: &Secp256k1<All>, digest: &[u8; 32]) -> Result<Signature> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| Error::MissingKey(self.path.to_string()))?;
        let msg = Message::from_slice(digest)?;
        let mut sig = secp.sign_ecdsa(&msg, secret);
        sig.normalize_s();
        Ok(sig)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("path", &self.path.to_string())
            .field("public_key", &hex::encode(self.public_key.serialize()))
            .field("can_sign", &self.can_sign())
            .finish()
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        if let Some(secret) = self.secret.as_mut() {
            secret.non_secure_erase();
        }
    }
}

/// Generate new random mnemonic
///
/// # Arguments
/// * `word_count` - Number of words in mnemonic (12, 18, or 24). Defaults to 24.
pub fn generate_mnemonic(word_count: Option<u32>) -> Result<String> {
    let entropy_size = match word_count.unwrap_or(24) {
        12 => 16,
        18 => 24,
        24 => 32,
        other => {
            return Err(Error::InvalidMnemonic(format!(
                "unsupported word count {other}"
            )))
        }
    };

    let mut entropy = Zeroizing::new(vec![0u8; entropy_size]);
    use rand::RngCore;
    rand::thread_rng().fill_bytes(&mut entropy);

    let mnemonic =
        Mnemonic::from_entropy(&entropy).map_err(|e| Error::InvalidMnemonic(e.to_string()))?;
    Ok(mnemonic.to_string())
}

/// Check a mnemonic's words and checksum
pub fn validate_mnemonic(phrase: &str) -> Result<()> {
    Mnemonic::parse_in_normalized(Language::English, phrase)
        .map(|_| ())
        .map_err(|e| Error::InvalidMnemonic(e.to_string()))
}

/// BIP-39 seed from a mnemonic and optional passphrase
pub fn mnemonic_to_seed(phrase: &str, passphrase: &str) -> Result<Zeroizing<Vec<u8>>> {
    let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase)
        .map_err(|e| Error::InvalidMnemonic(e.to_string()))?;
    Ok(Zeroizing::new(mnemonic.to_seed(passphrase).to_vec()))
}

/// Verify a signature against a public key and digest
pub fn verify_signature(public_key: &PublicKey, digest: &[u8; 32], signature: &Signature) -> bool {
    let secp = Secp256k1::verification_only();
    match Message::from_slice(digest) {
        Ok(msg) => secp.verify_ecdsa(&msg, signature, public_key).is_ok(),
        Err(_) => false,
    }
}

/// Deterministic key tree for one wallet account.
///
/// Holds either the full seed (spending wallet) or only the account
/// extended public key (watch-only wallet).
pub struct KeyChain {
    network: Network,
    scheme: DerivationScheme,
    account_path: KeyPath,
    seed: Option<Zeroizing<Vec<u8>>>,
    account_xprv: Option<XPrv>,
    account_xpub: XPub,
    secp: Secp256k1<All>,
}

impl KeyChain {
    /// Build a spending key chain from raw seed bytes (16, 32 or 64 bytes)
    pub fn from_seed(seed: &[u8], scheme: DerivationScheme, network: Network) -> Result<Self> {
        let master = XPrv::new(seed)?;
        let account_path = scheme.account_path(&network);
        let account_xprv = derive_private(master, account_path.steps())?;
        let account_xpub = account_xprv.public_key();

        tracing::debug!("Key chain ready for account {}", account_path);

        Ok(Self {
            network,
            scheme,
            account_path,
            seed: Some(Zeroizing::new(seed.to_vec())),
            account_xprv: Some(account_xprv),
            account_xpub,
            secp: Secp256k1::new(),
        })
    }

    /// Build a spending key chain from a BIP-39 mnemonic
    pub fn from_mnemonic(
        phrase: &str,
        passphrase: &str,
        scheme: DerivationScheme,
        network: Network,
    ) -> Result<Self> {
        let seed = mnemonic_to_seed(phrase, passphrase)?;
        Self::from_seed(&seed, scheme, network)
    }

    /// Build a watch-only key chain from an account extended public key
    pub fn watch_only(xpub: &str, scheme: DerivationScheme, network: Network) -> Result<Self> {
        let account_xpub = parse_xpub(xpub, &network)?;
        let account_path = scheme.account_path(&network);

        Ok(Self {
            network,
            scheme,
            account_path,
            seed: None,
            account_xprv: None,
            account_xpub,
            secp: Secp256k1::new(),
        })
    }

    /// Network this key chain encodes for
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Derivation scheme
    pub fn scheme(&self) -> DerivationScheme {
        self.scheme
    }

    /// Path of the account node
    pub fn account_path(&self) -> &KeyPath {
        &self.account_path
    }

    /// Whether private keys are unavailable
    pub fn is_watch_only(&self) -> bool {
        self.account_xprv.is_none()
    }

    /// Account extended public key, encoded for this network
    pub fn account_xpub(&self) -> String {
        let prefix = if self.network.is_test_network() {
            Prefix::TPUB
        } else {
            Prefix::XPUB
        };
        self.account_xpub.to_string(prefix)
    }

    /// Path of the address at `index` in the given role's chain
    pub fn address_path(&self, role: AddressRole, index: u32) -> KeyPath {
        self.account_path
            .child(PathStep::normal(role.chain_index()))
            .child(PathStep::normal(index))
    }

    /// Derive the key pair at `path`.
    ///
    /// Pure and deterministic: the same path always yields the same key.
    /// Fails with [`Error::InvalidDerivation`] when a hardened step would have
    /// to be taken from a public-only key.
    pub fn derive(&self, path: &KeyPath) -> Result<KeyPair> {
        if let Some(rel) = path.strip_prefix(&self.account_path) {
            if let Some(xprv) = &self.account_xprv {
                let child = derive_private(xprv.clone(), rel)?;
                return Ok(private_pair(path.clone(), &child));
            }
            if let Some(step) = rel.iter().find(|s| s.hardened) {
                return Err(Error::InvalidDerivation(format!(
                    "hardened step {} in {} needs a private key",
                    step, path
                )));
            }
            let child = derive_public(self.account_xpub.clone(), rel)?;
            return Ok(KeyPair {
                path: path.clone(),
                public_key: *child.public_key(),
                secret: None,
            });
        }

        match &self.seed {
            Some(seed) => {
                let master = XPrv::new(seed.as_slice())?;
                let child = derive_private(master, path.steps())?;
                Ok(private_pair(path.clone(), &child))
            }
            None => Err(Error::InvalidDerivation(format!(
                "{} is outside account {} and only the account public key is known",
                path, self.account_path
            ))),
        }
    }

    /// Derive the receiving or change key at `index`
    pub fn derive_address_key(&self, role: AddressRole, index: u32) -> Result<KeyPair> {
        self.derive(&self.address_path(role, index))
    }

    /// Sign a 32-byte digest with the key at `path`.
    ///
    /// Fails with [`Error::MissingKey`] when this chain holds no private key
    /// for the path.
    pub fn sign(&self, path: &KeyPath, digest: &[u8; 32]) -> Result<Signature> {
        if self.is_watch_only() {
            return Err(Error::MissingKey(format!(
                "{} (watch-only wallet)",
                path
            )));
        }
        if path.strip_prefix(&self.account_path).is_none() {
            return Err(Error::MissingKey(format!(
                "{} is not part of account {}",
                path, self.account_path
            )));
        }
        let pair = self.derive(path)?;
        pair.sign_digest(&self.secp, digest)
    }

    /// Run `f` with scoped access to the seed bytes.
    ///
    /// Returns `None` for watch-only or closed key chains.
    pub fn with_seed<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        self.seed.as_ref().map(|seed| f(seed.as_slice()))
    }

    /// Erase the seed and private keys; the chain degrades to watch-only
    pub fn close(&mut self) {
        self.seed = None;
        self.account_xprv = None;
        tracing::debug!("Key chain closed, private material dropped");
    }
}

impl fmt::Debug for KeyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyChain")
            .field("network", &self.network.name)
            .field("scheme", &self.scheme)
            .field("watch_only", &self.is_watch_only())
            .finish()
    }
}

/// Parse an extended public key encoded for `network`
pub(crate) fn parse_xpub(xpub: &str, network: &Network) -> Result<XPub> {
    let extended = bip32::ExtendedKey::from_str(xpub.trim())?;
    if !extended.prefix.is_public() {
        return Err(Error::InvalidKey(
            "expected an extended public key".to_string(),
        ));
    }
    if extended.prefix.to_bytes() != network.xpub_version {
        return Err(Error::InvalidKey(format!(
            "extended key prefix {} does not match network {}",
            extended.prefix.as_str(),
            network.name
        )));
    }
    Ok(XPub::try_from(extended)?)
}

fn derive_private(mut key: XPrv, steps: &[PathStep]) -> Result<XPrv> {
    for step in steps {
        key = key.derive_child(step.child_number()?)?;
    }
    Ok(key)
}

pub(crate) fn derive_public(mut key: XPub, steps: &[PathStep]) -> Result<XPub> {
    for step in steps {
        if step.hardened {
            return Err(Error::InvalidDerivation(format!(
                "hardened step {} from public key",
                step
            )));
        }
        key = key.derive_child(step.child_number()?)?;
    }
    Ok(key)
}

fn private_pair(path: KeyPath, xprv: &XPrv) -> KeyPair {
    let secret = *xprv.private_key();
    KeyPair {
        path,
        public_key: PublicKey::from_secret_key(&Secp256k1::signing_only(), &secret),
        secret: Some(secret),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn chain() -> KeyChain {
        KeyChain::from_mnemonic(PHRASE, "", DerivationScheme::default(), Network::mainnet()).unwrap()
    }

    #[test]
    fn test_generate_mnemonic() {
        let mnemonic = generate_mnemonic(None).unwrap();
        assert_eq!(mnemonic.split_whitespace().count(), 24);
        let short = generate_mnemonic(Some(12)).unwrap();
        assert_eq!(short.split_whitespace().count(), 12);
        assert!(validate_mnemonic(&short).is_ok());
        assert!(generate_mnemonic(Some(13)).is_err());
    }

    #[test]
    fn test_invalid_mnemonic() {
        assert!(validate_mnemonic("abandon abandon").is_err());
        assert!(KeyChain::from_mnemonic("not a phrase", "", DerivationScheme::Legacy, Network::mainnet()).is_err());
    }

    #[test]
    fn test_path_parse_display() {
        let path: KeyPath = "m/44'/2'/0'/0/5".parse().unwrap();
        assert_eq!(path.depth(), 5);
        assert_eq!(path.steps()[0], PathStep::hardened(44));
        assert_eq!(path.steps()[4], PathStep::normal(5));
        assert_eq!(path.to_string(), "m/44'/2'/0'/0/5");
        assert_eq!("m/1h".parse::<KeyPath>().unwrap().to_string(), "m/1'");
        assert!("44'/0".parse::<KeyPath>().is_err());
        assert!("m/x".parse::<KeyPath>().is_err());
    }

    #[test]
    fn test_scheme_roundtrip() {
        for scheme in [DerivationScheme::Legacy, DerivationScheme::Bip44 { account: 3 }] {
            let parsed: DerivationScheme = scheme.to_string().parse().unwrap();
            assert_eq!(parsed, scheme);
        }
        assert!("bip84:0".parse::<DerivationScheme>().is_err());
    }

    #[test]
    fn test_derive_is_deterministic() {
        let a = chain();
        let b = chain();
        let path = a.address_path(AddressRole::Receiving, 7);
        assert_eq!(
            a.derive(&path).unwrap().public_key_bytes(),
            b.derive(&path).unwrap().public_key_bytes()
        );
        assert_ne!(
            a.derive_address_key(AddressRole::Receiving, 0).unwrap().public_key_bytes(),
            a.derive_address_key(AddressRole::Change, 0).unwrap().public_key_bytes()
        );
    }

    #[test]
    fn test_watch_only_matches_spending_chain() {
        let full = chain();
        let watch = KeyChain::watch_only(&full.account_xpub(), full.scheme(), Network::mainnet()).unwrap();
        assert!(watch.is_watch_only());

        let path = full.address_path(AddressRole::Change, 3);
        let from_full = full.derive(&path).unwrap();
        let from_watch = watch.derive(&path).unwrap();
        assert_eq!(from_full.public_key_bytes(), from_watch.public_key_bytes());
        assert!(from_full.can_sign());
        assert!(!from_watch.can_sign());
    }

    #[test]
    fn test_hardened_from_public_fails() {
        let full = chain();
        let watch = KeyChain::watch_only(&full.account_xpub(), full.scheme(), Network::mainnet()).unwrap();
        let hardened = full.account_path().child(PathStep::hardened(1));
        assert!(matches!(watch.derive(&hardened), Err(Error::InvalidDerivation(_))));

        let outside: KeyPath = "m/45'/0".parse().unwrap();
        assert!(matches!(watch.derive(&outside), Err(Error::InvalidDerivation(_))));
    }

    #[test]
    fn test_watch_only_rejects_wrong_network() {
        let full = chain();
        assert!(KeyChain::watch_only(&full.account_xpub(), full.scheme(), Network::testnet()).is_err());
    }

    #[test]
    fn test_sign_and_verify() {
        let kc = chain();
        let path = kc.address_path(AddressRole::Receiving, 0);
        let digest = crate::hash::sha256d(b"message");
        let sig = kc.sign(&path, &digest).unwrap();
        let pair = kc.derive(&path).unwrap();
        assert!(verify_signature(pair.public_key(), &digest, &sig));
        assert!(!verify_signature(pair.public_key(), &crate::hash::sha256d(b"other"), &sig));
    }

    #[test]
    fn test_sign_missing_key() {
        let full = chain();
        let watch = KeyChain::watch_only(&full.account_xpub(), full.scheme(), Network::mainnet()).unwrap();
        let path = full.address_path(AddressRole::Receiving, 0);
        assert!(matches!(watch.sign(&path, &[1u8; 32]), Err(Error::MissingKey(_))));

        let foreign: KeyPath = "m/44'/2'/9'/0/0".parse().unwrap();
        assert!(matches!(full.sign(&foreign, &[1u8; 32]), Err(Error::MissingKey(_))));
    }

    #[test]
    fn test_close_drops_secrets() {
        let mut kc = chain();
        assert!(kc.with_seed(|s| s.len()).is_some());
        kc.close();
        assert!(kc.is_watch_only());
        assert!(kc.with_seed(|s| s.len()).is_none());
        let path = kc.address_path(AddressRole::Receiving, 0);
        assert!(matches!(kc.sign(&path, &[1u8; 32]), Err(Error::MissingKey(_))));
        assert!(kc.derive(&path).is_ok());
    }

    #[test]
    fn test_seed_length_checked() {
        assert!(KeyChain::from_seed(&[0u8; 10], DerivationScheme::Legacy, Network::mainnet()).is_err());
        assert!(KeyChain::from_seed(&[7u8; 32], DerivationScheme::Legacy, Network::mainnet()).is_ok());
    }
}
