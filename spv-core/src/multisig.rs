//! m-of-n P2SH multisig accounts
//!
//! A [`MultisigAccount`] is built from every cosigner's account extended
//! public key. Each address is the P2SH hash of a redeem script over the
//! cosigners' keys at the same receiving or change index, sorted so that
//! every cosigner derives the same script regardless of the order the keys
//! were entered in.
//!
//! Spending goes through a [`PartialTransaction`]: each cosigner signs the
//! inputs it holds keys for, partial transactions are combined, and the
//! result is finalized once every input carries `threshold` signatures.

use crate::address::{Address, AddressRole};
use crate::builder::SignedTransaction;
use crate::hash::Hash256;
use crate::keys::{derive_public, parse_xpub, verify_signature, KeyChain, PathStep, XPub};
use crate::script::Script;
use crate::transaction::{Transaction, SIGHASH_ALL};
use crate::utxo::Utxo;
use crate::{Error, Result};
use secp256k1::ecdsa::Signature;
use secp256k1::PublicKey;
use spv_params::Network;
use std::collections::BTreeMap;

/// Most cosigners a standard redeem script can hold
pub const MAX_COSIGNERS: usize = 15;

/// Shared wallet over several cosigners' account keys
#[derive(Clone)]
pub struct MultisigAccount {
    network: Network,
    threshold: usize,
    total: usize,
    cosigners: Vec<XPub>,
}

impl MultisigAccount {
    /// Account waiting for `total` cosigner keys, `threshold` of which must
    /// sign
    pub fn new(network: Network, threshold: usize, total: usize) -> Result<Self> {
        if threshold == 0 || threshold > total || total > MAX_COSIGNERS {
            return Err(Error::InvalidKey(format!(
                "{threshold}-of-{total} is not a valid multisig policy"
            )));
        }
        Ok(Self {
            network,
            threshold,
            total,
            cosigners: Vec::with_capacity(total),
        })
    }

    /// Account with every cosigner key supplied up front
    pub fn from_xpubs(network: Network, threshold: usize, xpubs: &[String]) -> Result<Self> {
        let mut account = Self::new(network, threshold, xpubs.len())?;
        for xpub in xpubs {
            account.add_cosigner(xpub)?;
        }
        Ok(account)
    }

    /// Add one cosigner's account extended public key
    pub fn add_cosigner(&mut self, xpub: &str) -> Result<()> {
        if self.is_complete() {
            return Err(Error::InvalidKey(format!(
                "all {} cosigners are already known",
                self.total
            )));
        }
        let key = parse_xpub(xpub, &self.network)?;
        if self.cosigners.iter().any(|k| k.public_key() == key.public_key()) {
            return Err(Error::InvalidKey("cosigner key added twice".to_string()));
        }
        self.cosigners.push(key);
        tracing::debug!(
            added = self.cosigners.len(),
            total = self.total,
            "Added multisig cosigner"
        );
        Ok(())
    }

    /// Cosigner keys still to be added
    pub fn missing_cosigners(&self) -> usize {
        self.total - self.cosigners.len()
    }

    /// Whether every cosigner key is known
    pub fn is_complete(&self) -> bool {
        self.missing_cosigners() == 0
    }

    /// Signatures required per input
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Number of cosigners
    pub fn total(&self) -> usize {
        self.total
    }

    /// Wallet type label, `m-of-n`
    pub fn label(&self) -> String {
        format!("{}of{}", self.threshold, self.total)
    }

    /// Redeem script of the address at `index` in `role`'s chain
    pub fn redeem_script(&self, role: AddressRole, index: u32) -> Result<Script> {
        if !self.is_complete() {
            return Err(Error::InvalidDerivation(format!(
                "{} cosigner keys missing",
                self.missing_cosigners()
            )));
        }
        let steps = [PathStep::normal(role.chain_index()), PathStep::normal(index)];
        let mut keys = self
            .cosigners
            .iter()
            .map(|xpub| Ok(derive_public(xpub.clone(), &steps)?.public_key().serialize()))
            .collect::<Result<Vec<[u8; 33]>>>()?;
        keys.sort_unstable();
        Script::multisig(self.threshold, &keys)
            .ok_or_else(|| Error::InvalidKey(format!("cannot build {} redeem script", self.label())))
    }

    /// P2SH address at `index` in `role`'s chain
    pub fn address(&self, role: AddressRole, index: u32) -> Result<Address> {
        Ok(Address::from_redeem_script(&self.redeem_script(role, index)?))
    }

    /// Start a partial transaction spending `inputs` (each paying one of
    /// this account's addresses) in `tx`'s input order.
    ///
    /// Every input's derivation path must end in its role and index.
    pub fn prepare(&self, tx: &Transaction, inputs: &[Utxo], fee: u64) -> Result<PartialTransaction> {
        if tx.inputs.len() != inputs.len() {
            return Err(Error::TransactionSigning(format!(
                "{} inputs but {} spent outputs",
                tx.inputs.len(),
                inputs.len()
            )));
        }
        let mut prepared = Vec::with_capacity(inputs.len());
        for (txin, utxo) in tx.inputs.iter().zip(inputs) {
            if txin.previous_output != utxo.outpoint {
                return Err(Error::TransactionSigning(format!(
                    "input spends {} but {} was supplied",
                    txin.previous_output, utxo.outpoint
                )));
            }
            let (role, index) = address_position(utxo)?;
            let redeem_script = self.redeem_script(role, index)?;
            if utxo.script_pubkey.p2sh_hash() != Some(crate::hash::hash160(redeem_script.as_bytes())) {
                return Err(Error::MissingKey(format!(
                    "{} does not pay this {} account at {role}/{index}",
                    utxo.outpoint,
                    self.label()
                )));
            }
            prepared.push(MultisigInput {
                role,
                index,
                redeem_script,
                signatures: BTreeMap::new(),
            });
        }
        Ok(PartialTransaction {
            tx: tx.clone(),
            threshold: self.threshold,
            inputs: prepared,
            fee,
        })
    }
}

impl std::fmt::Debug for MultisigAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultisigAccount")
            .field("network", &self.network.name)
            .field("policy", &self.label())
            .field("cosigners", &self.cosigners.len())
            .finish()
    }
}

fn address_position(utxo: &Utxo) -> Result<(AddressRole, u32)> {
    let path = utxo
        .path
        .as_ref()
        .ok_or_else(|| Error::MissingKey(format!("no derivation path for {}", utxo.outpoint)))?;
    match path.steps() {
        [.., chain, index] if !chain.hardened && !index.hardened => {
            let role = match chain.index {
                0 => AddressRole::Receiving,
                1 => AddressRole::Change,
                other => {
                    return Err(Error::InvalidDerivation(format!("unknown address chain {other}")))
                }
            };
            Ok((role, index.index))
        }
        _ => Err(Error::InvalidDerivation(format!(
            "{path} does not end in an address position"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct MultisigInput {
    role: AddressRole,
    index: u32,
    redeem_script: Script,
    /// DER signatures plus hash type, by compressed public key
    signatures: BTreeMap<[u8; 33], Vec<u8>>,
}

impl MultisigInput {
    fn keys(&self) -> Vec<[u8; 33]> {
        self.redeem_script
            .parse_multisig()
            .map(|(_, keys)| keys)
            .unwrap_or_default()
    }
}

/// A multisig spend collecting cosigner signatures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialTransaction {
    tx: Transaction,
    threshold: usize,
    inputs: Vec<MultisigInput>,
    fee: u64,
}

impl PartialTransaction {
    /// Transaction being signed
    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    /// Id of the transaction before unlocking scripts are attached
    pub fn unsigned_txid(&self) -> Hash256 {
        self.tx.txid()
    }

    /// Signatures collected for input `index`
    pub fn signature_count(&self, index: usize) -> usize {
        self.inputs.get(index).map_or(0, |i| i.signatures.len())
    }

    /// Whether every input has enough signatures
    pub fn is_complete(&self) -> bool {
        self.inputs.iter().all(|i| i.signatures.len() >= self.threshold)
    }

    /// Sign every input `keys` holds a cosigner key for.
    ///
    /// Returns the number of signatures added. Fails with
    /// [`Error::MissingKey`] when `keys` cannot sign any input.
    pub fn sign_with(&mut self, keys: &KeyChain) -> Result<usize> {
        let mut added = Vec::new();
        for (position, input) in self.inputs.iter().enumerate() {
            let pair = keys.derive_address_key(input.role, input.index)?;
            let public_key = pair.public_key_bytes();
            if !input.keys().contains(&public_key) || input.signatures.contains_key(&public_key) {
                continue;
            }
            let digest = self.tx.signature_hash(position, &input.redeem_script, SIGHASH_ALL)?;
            let signature = keys.sign(pair.path(), &digest)?;
            let mut bytes = signature.serialize_der().to_vec();
            bytes.push(SIGHASH_ALL as u8);
            added.push((position, public_key, bytes));
        }

        if added.is_empty() && !self.is_complete() {
            return Err(Error::MissingKey(format!(
                "key chain for account {} is not a cosigner",
                keys.account_path()
            )));
        }
        let count = added.len();
        for (position, public_key, bytes) in added {
            self.inputs[position].signatures.insert(public_key, bytes);
        }
        tracing::debug!(added = count, complete = self.is_complete(), "Signed multisig inputs");
        Ok(count)
    }

    /// Take the signatures another cosigner added to the same spend.
    ///
    /// Every incoming signature is checked against its key and the input's
    /// signature hash.
    pub fn combine(&mut self, other: &PartialTransaction) -> Result<()> {
        if other.tx != self.tx || other.inputs.len() != self.inputs.len() {
            return Err(Error::TransactionSigning(
                "partial transactions spend different transactions".to_string(),
            ));
        }
        for (position, theirs) in other.inputs.iter().enumerate() {
            let ours = &self.inputs[position];
            if theirs.redeem_script != ours.redeem_script {
                return Err(Error::TransactionSigning(format!(
                    "input {position} has a different redeem script"
                )));
            }
            let digest = self.tx.signature_hash(position, &ours.redeem_script, SIGHASH_ALL)?;
            for (key, bytes) in &theirs.signatures {
                if !check_signature(key, &digest, bytes) {
                    return Err(Error::TransactionSigning(format!(
                        "input {position} carries an invalid signature"
                    )));
                }
            }
        }
        for (position, theirs) in other.inputs.iter().enumerate() {
            for (key, bytes) in &theirs.signatures {
                self.inputs[position]
                    .signatures
                    .entry(*key)
                    .or_insert_with(|| bytes.clone());
            }
        }
        Ok(())
    }

    /// Attach unlocking scripts once every input has enough signatures.
    ///
    /// Signatures are ordered as their keys appear in the redeem script.
    pub fn finalize(&self) -> Result<SignedTransaction> {
        let mut tx = self.tx.clone();
        for (position, input) in self.inputs.iter().enumerate() {
            if input.signatures.len() < self.threshold {
                return Err(Error::MissingKey(format!(
                    "input {position} has {} of {} signatures",
                    input.signatures.len(),
                    self.threshold
                )));
            }
            let signatures: Vec<Vec<u8>> = input
                .keys()
                .iter()
                .filter_map(|key| input.signatures.get(key).cloned())
                .take(self.threshold)
                .collect();
            tx.inputs[position].script_sig = Script::multisig_unlock(&signatures, &input.redeem_script);
        }
        let signed = SignedTransaction::from_parts(tx, self.fee);
        tracing::info!("Finalized multisig transaction {}", signed.txid());
        Ok(signed)
    }
}

fn check_signature(key: &[u8; 33], digest: &[u8; 32], bytes: &[u8]) -> bool {
    let Some((hash_type, der)) = bytes.split_last() else {
        return false;
    };
    if *hash_type != SIGHASH_ALL as u8 {
        return false;
    }
    match (PublicKey::from_slice(key), Signature::from_der(der)) {
        (Ok(public_key), Ok(signature)) => verify_signature(&public_key, digest, &signature),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{DerivationScheme, KeyPath};
    use crate::transaction::{OutPoint, TxIn, TxOut};
    use crate::utxo::UtxoStatus;

    fn cosigner(tag: u8) -> KeyChain {
        KeyChain::from_seed(&[tag; 32], DerivationScheme::default(), Network::regtest()).unwrap()
    }

    fn two_of_three() -> (Vec<KeyChain>, MultisigAccount) {
        let chains = vec![cosigner(1), cosigner(2), cosigner(3)];
        let xpubs: Vec<String> = chains.iter().map(KeyChain::account_xpub).collect();
        let account = MultisigAccount::from_xpubs(Network::regtest(), 2, &xpubs).unwrap();
        (chains, account)
    }

    fn funded(account: &MultisigAccount, index: u32, value: u64) -> Utxo {
        let address = account.address(AddressRole::Receiving, index).unwrap();
        Utxo {
            outpoint: OutPoint::new(Hash256::digest(&index.to_le_bytes()), 0),
            value,
            script_pubkey: address.script_pubkey(),
            address,
            address_id: None,
            path: Some(KeyPath::from_steps(vec![
                PathStep::normal(0),
                PathStep::normal(index),
            ])),
            status: UtxoStatus::Confirmed { height: 5 },
        }
    }

    fn spend(inputs: &[Utxo]) -> Transaction {
        let mut tx = Transaction::new();
        for utxo in inputs {
            tx.inputs.push(TxIn::new(utxo.outpoint));
        }
        tx.outputs.push(TxOut {
            value: 40_000,
            script_pubkey: Address::P2pkh([0x44; 20]).script_pubkey(),
        });
        tx
    }

    #[test]
    fn test_policy_bounds() {
        assert!(MultisigAccount::new(Network::regtest(), 0, 2).is_err());
        assert!(MultisigAccount::new(Network::regtest(), 3, 2).is_err());
        assert!(MultisigAccount::new(Network::regtest(), 2, 16).is_err());
        assert_eq!(MultisigAccount::new(Network::regtest(), 2, 3).unwrap().label(), "2of3");
    }

    #[test]
    fn test_cosigners_added_one_at_a_time() {
        let chains = [cosigner(1), cosigner(2)];
        let mut account = MultisigAccount::new(Network::regtest(), 2, 2).unwrap();
        assert_eq!(account.missing_cosigners(), 2);
        assert!(account.address(AddressRole::Receiving, 0).is_err());

        account.add_cosigner(&chains[0].account_xpub()).unwrap();
        assert!(account.add_cosigner(&chains[0].account_xpub()).is_err());
        account.add_cosigner(&chains[1].account_xpub()).unwrap();
        assert!(account.is_complete());
        assert!(account.add_cosigner(&cosigner(3).account_xpub()).is_err());

        let mainnet = cosigner(4);
        let mut other = MultisigAccount::new(Network::mainnet(), 1, 1).unwrap();
        assert!(other.add_cosigner(&mainnet.account_xpub()).is_err());
    }

    #[test]
    fn test_address_independent_of_cosigner_order() {
        let (chains, account) = two_of_three();
        let mut reversed: Vec<String> = chains.iter().map(KeyChain::account_xpub).collect();
        reversed.reverse();
        let other = MultisigAccount::from_xpubs(Network::regtest(), 2, &reversed).unwrap();

        let a = account.address(AddressRole::Receiving, 3).unwrap();
        assert_eq!(a, other.address(AddressRole::Receiving, 3).unwrap());
        assert!(matches!(a, Address::P2sh(_)));
        assert_ne!(a, account.address(AddressRole::Change, 3).unwrap());

        let (m, keys) = account.redeem_script(AddressRole::Receiving, 3).unwrap().parse_multisig().unwrap();
        assert_eq!(m, 2);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        let own = chains[1].derive_address_key(AddressRole::Receiving, 3).unwrap();
        assert!(keys.contains(&own.public_key_bytes()));
    }

    #[test]
    fn test_two_cosigners_complete_spend() {
        let (chains, account) = two_of_three();
        let inputs = vec![funded(&account, 0, 25_000), funded(&account, 1, 25_000)];
        let tx = spend(&inputs);

        let mut first = account.prepare(&tx, &inputs, 10_000).unwrap();
        assert_eq!(first.sign_with(&chains[0]).unwrap(), 2);
        assert!(!first.is_complete());
        assert!(matches!(first.finalize(), Err(Error::MissingKey(_))));

        let mut second = account.prepare(&tx, &inputs, 10_000).unwrap();
        second.sign_with(&chains[2]).unwrap();
        first.combine(&second).unwrap();
        assert!(first.is_complete());
        assert_eq!(first.signature_count(0), 2);

        let signed = first.finalize().unwrap();
        assert_eq!(signed.fee(), 10_000);
        let parsed = Transaction::parse(&signed.serialize()).unwrap();
        assert_eq!(parsed.txid(), signed.txid());
        let script_sig = parsed.inputs[0].script_sig.as_bytes();
        assert_eq!(script_sig[0], 0x00);
        let redeem = account.redeem_script(AddressRole::Receiving, 0).unwrap();
        assert!(script_sig.ends_with(redeem.as_bytes()));
    }

    #[test]
    fn test_outsider_cannot_sign() {
        let (_, account) = two_of_three();
        let inputs = vec![funded(&account, 0, 25_000)];
        let mut partial = account.prepare(&spend(&inputs), &inputs, 1_000).unwrap();
        assert!(matches!(partial.sign_with(&cosigner(9)), Err(Error::MissingKey(_))));

        let watch = KeyChain::watch_only(
            &cosigner(1).account_xpub(),
            DerivationScheme::default(),
            Network::regtest(),
        )
        .unwrap();
        assert!(matches!(partial.sign_with(&watch), Err(Error::MissingKey(_))));
        assert_eq!(partial.signature_count(0), 0);
    }

    #[test]
    fn test_forged_signature_not_combined() {
        let (chains, account) = two_of_three();
        let inputs = vec![funded(&account, 0, 25_000)];
        let tx = spend(&inputs);
        let mut ours = account.prepare(&tx, &inputs, 1_000).unwrap();
        ours.sign_with(&chains[0]).unwrap();

        let mut theirs = account.prepare(&tx, &inputs, 1_000).unwrap();
        theirs.sign_with(&chains[1]).unwrap();
        for bytes in theirs.inputs[0].signatures.values_mut() {
            bytes[10] ^= 0x01;
        }
        assert!(matches!(ours.combine(&theirs), Err(Error::TransactionSigning(_))));
        assert_eq!(ours.signature_count(0), 1);
    }

    #[test]
    fn test_prepare_rejects_foreign_output() {
        let (_, account) = two_of_three();
        let mut utxo = funded(&account, 0, 25_000);
        utxo.path = Some(KeyPath::from_steps(vec![PathStep::normal(0), PathStep::normal(7)]));
        let tx = spend(std::slice::from_ref(&utxo));
        assert!(matches!(account.prepare(&tx, &[utxo], 1_000), Err(Error::MissingKey(_))));
    }
}
