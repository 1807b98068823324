//! Transaction building and signing
//!
//! [`TransactionBuilder`] turns payment outputs and the wallet's spendable
//! outputs into an [`UnsignedTransaction`]; [`UnsignedTransaction::sign`]
//! produces an immutable [`SignedTransaction`]. Signing computes every
//! signature before any is attached, so a failure leaves no partially signed
//! transaction behind.

use crate::address::Address;
use crate::fees::{output_size, FeePolicy, DEFAULT_FEE_RATE, DUST_THRESHOLD};
use crate::hash::Hash256;
use crate::keys::{KeyChain, KeyPath};
use crate::script::Script;
use crate::selection::CoinSelector;
use crate::transaction::{Transaction, TxIn, TxOut, SIGHASH_ALL};
use crate::utxo::Utxo;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use spv_params::Network;

/// A payment output requested by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOutput {
    /// Locking script of the recipient
    pub script_pubkey: Script,
    /// Amount in base units
    pub amount: u64,
}

impl PaymentOutput {
    /// Pay `amount` to `address`
    pub fn to_address(address: &Address, amount: u64) -> Self {
        Self {
            script_pubkey: address.script_pubkey(),
            amount,
        }
    }
}

/// Where change goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeTarget {
    /// Change address
    pub address: Address,
    /// Derivation path of the change key
    pub path: KeyPath,
}

/// Change output of a built transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeOutput {
    /// Output index in the transaction
    pub index: usize,
    /// Amount in base units
    pub value: u64,
    /// Change address
    pub address: Address,
}

/// Transaction builder
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    network: Network,
    outputs: Vec<PaymentOutput>,
    fee_policy: FeePolicy,
    base_fee_rate: u64,
    lock_time: u32,
}

impl TransactionBuilder {
    /// Create new builder
    pub fn new(network: Network) -> Self {
        Self {
            network,
            outputs: Vec::new(),
            fee_policy: FeePolicy::Standard,
            base_fee_rate: DEFAULT_FEE_RATE,
            lock_time: 0,
        }
    }

    /// Add a payment to an encoded address
    pub fn add_address_output(&mut self, address: &str, amount: u64) -> Result<&mut Self> {
        let address = Address::decode(address, &self.network)?;
        self.add_output(PaymentOutput::to_address(&address, amount))
    }

    /// Add a payment output
    pub fn add_output(&mut self, output: PaymentOutput) -> Result<&mut Self> {
        if output.amount == 0 {
            return Err(Error::InvalidAmount("Amount must be greater than zero".to_string()));
        }
        if output.amount < DUST_THRESHOLD {
            return Err(Error::InvalidAmount(format!(
                "Amount {} is below the dust threshold {}",
                output.amount, DUST_THRESHOLD
            )));
        }
        if output.script_pubkey.is_empty() {
            return Err(Error::InvalidAddress("empty output script".to_string()));
        }
        self.outputs.push(output);
        Ok(self)
    }

    /// Set fee policy
    pub fn with_fee_policy(&mut self, policy: FeePolicy) -> &mut Self {
        self.fee_policy = policy;
        self
    }

    /// Set the base fee rate the policy scales (base units per byte)
    pub fn with_base_fee_rate(&mut self, rate: u64) -> &mut Self {
        self.base_fee_rate = rate;
        self
    }

    /// Set lock time
    pub fn with_lock_time(&mut self, lock_time: u32) -> &mut Self {
        self.lock_time = lock_time;
        self
    }

    /// Sum of payment outputs
    pub fn total_output(&self) -> Result<u64> {
        self.outputs.iter().try_fold(0u64, |acc, o| {
            acc.checked_add(o.amount)
                .ok_or_else(|| Error::AmountOverflow("payment sum".to_string()))
        })
    }

    /// Build an unsigned transaction spending from `available`.
    ///
    /// `available` is only read; the caller's UTXO view is untouched whether
    /// or not selection succeeds.
    pub fn build(&self, available: &[Utxo], change: &ChangeTarget) -> Result<UnsignedTransaction> {
        if self.outputs.is_empty() {
            return Err(Error::TransactionBuild("No outputs specified".to_string()));
        }

        let target = self.total_output()?;
        let calculator = self.fee_policy.calculator(self.base_fee_rate);
        let output_sizes: Vec<usize> = self
            .outputs
            .iter()
            .map(|o| output_size(o.script_pubkey.len()))
            .collect();

        let selection = CoinSelector::new(calculator).select(available, &output_sizes, target)?;
        calculator.validate_fee(selection.fee, selection.estimated_size)?;

        let mut tx = Transaction::new();
        tx.lock_time = self.lock_time;
        for utxo in &selection.utxos {
            tx.inputs.push(TxIn::new(utxo.outpoint));
        }
        for output in &self.outputs {
            tx.outputs.push(TxOut {
                value: output.amount,
                script_pubkey: output.script_pubkey.clone(),
            });
        }

        let change_output = if selection.has_change() {
            tx.outputs.push(TxOut {
                value: selection.change,
                script_pubkey: change.address.script_pubkey(),
            });
            Some(ChangeOutput {
                index: tx.outputs.len() - 1,
                value: selection.change,
                address: change.address,
            })
        } else {
            None
        };

        tracing::info!(
            "Built transaction: {} inputs, {} outputs, fee={}, rate={}",
            tx.inputs.len(),
            tx.outputs.len(),
            selection.fee,
            calculator.rate()
        );

        Ok(UnsignedTransaction {
            tx,
            inputs: selection.utxos,
            fee: selection.fee,
            fee_rate: calculator.rate(),
            change: change_output,
        })
    }
}

/// A built transaction awaiting signatures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    tx: Transaction,
    inputs: Vec<Utxo>,
    fee: u64,
    fee_rate: u64,
    change: Option<ChangeOutput>,
}

impl UnsignedTransaction {
    /// Transaction with empty unlocking scripts
    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    /// Outputs being spent, in input order
    pub fn inputs(&self) -> &[Utxo] {
        &self.inputs
    }

    /// Fee in base units
    pub fn fee(&self) -> u64 {
        self.fee
    }

    /// Fee rate used for the estimate
    pub fn fee_rate(&self) -> u64 {
        self.fee_rate
    }

    /// Change output, if any
    pub fn change(&self) -> Option<&ChangeOutput> {
        self.change.as_ref()
    }

    /// Sum of spent values
    pub fn input_value(&self) -> u64 {
        self.inputs.iter().map(|u| u.value).fold(0, u64::saturating_add)
    }

    /// Sign every input with the key at its recorded derivation path.
    ///
    /// Each signature commits to the script of the output its input spends.
    /// Fails with [`Error::MissingKey`] if any input has no recorded path or
    /// the key chain cannot sign for it; in that case nothing is signed.
    pub fn sign(&self, keys: &KeyChain) -> Result<SignedTransaction> {
        let mut script_sigs = Vec::with_capacity(self.inputs.len());

        for (index, utxo) in self.inputs.iter().enumerate() {
            let path = utxo
                .path
                .as_ref()
                .ok_or_else(|| Error::MissingKey(format!("no derivation path for {}", utxo.outpoint)))?;

            let owner = utxo.script_pubkey.p2pkh_hash().ok_or_else(|| {
                Error::TransactionSigning(format!("{} is not a P2PKH output", utxo.outpoint))
            })?;

            let pair = keys.derive(path)?;
            let public_key = pair.public_key_bytes();
            if crate::hash::hash160(&public_key) != owner {
                return Err(Error::MissingKey(format!(
                    "key at {} does not own {}",
                    path, utxo.outpoint
                )));
            }

            let digest = self.tx.signature_hash(index, &utxo.script_pubkey, SIGHASH_ALL)?;
            let signature = keys.sign(path, &digest)?;

            let mut sig_bytes = signature.serialize_der().to_vec();
            sig_bytes.push(SIGHASH_ALL as u8);
            script_sigs.push(Script::p2pkh_unlock(&sig_bytes, &public_key));
        }

        let mut tx = self.tx.clone();
        for (input, script_sig) in tx.inputs.iter_mut().zip(script_sigs) {
            input.script_sig = script_sig;
        }

        let txid = tx.txid();
        tracing::info!("Signed transaction {} ({} inputs)", txid, tx.inputs.len());

        Ok(SignedTransaction {
            tx,
            txid,
            fee: self.fee,
        })
    }
}

/// A fully signed transaction. Immutable; rebuild to change anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    tx: Transaction,
    txid: Hash256,
    fee: u64,
}

impl SignedTransaction {
    pub(crate) fn from_parts(tx: Transaction, fee: u64) -> Self {
        let txid = tx.txid();
        Self { tx, txid, fee }
    }

    /// The signed transaction
    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    /// Transaction id
    pub fn txid(&self) -> Hash256 {
        self.txid
    }

    /// Fee in base units
    pub fn fee(&self) -> u64 {
        self.fee
    }

    /// Wire encoding
    pub fn serialize(&self) -> Vec<u8> {
        self.tx.serialize()
    }

    /// Wire encoding as hex, as servers expect for broadcast
    pub fn to_hex(&self) -> String {
        hex::encode(self.serialize())
    }

    /// Serialized size in bytes
    pub fn size(&self) -> usize {
        self.tx.legacy_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::AddressRole;
    use crate::keys::DerivationScheme;
    use crate::transaction::OutPoint;
    use crate::utxo::UtxoStatus;

    fn keys() -> KeyChain {
        KeyChain::from_seed(&[7u8; 32], DerivationScheme::default(), Network::regtest()).unwrap()
    }

    fn owned_utxo(keys: &KeyChain, index: u32, value: u64, height: u32) -> Utxo {
        let pair = keys.derive_address_key(AddressRole::Receiving, index).unwrap();
        let address = Address::from_public_key(&pair.public_key_bytes());
        Utxo {
            outpoint: OutPoint::new(Hash256::digest(&index.to_le_bytes()), index),
            value,
            script_pubkey: address.script_pubkey(),
            address,
            address_id: None,
            path: Some(pair.path().clone()),
            status: UtxoStatus::Confirmed { height },
        }
    }

    fn change_target(keys: &KeyChain) -> ChangeTarget {
        let pair = keys.derive_address_key(AddressRole::Change, 0).unwrap();
        ChangeTarget {
            address: Address::from_public_key(&pair.public_key_bytes()),
            path: pair.path().clone(),
        }
    }

    fn recipient() -> Address {
        Address::P2pkh([0x55; 20])
    }

    #[test]
    fn test_builder_rejects_zero_and_dust() {
        let mut builder = TransactionBuilder::new(Network::regtest());
        assert!(builder
            .add_output(PaymentOutput::to_address(&recipient(), 0))
            .is_err());
        assert!(builder
            .add_output(PaymentOutput::to_address(&recipient(), DUST_THRESHOLD - 1))
            .is_err());
        assert!(builder
            .add_output(PaymentOutput::to_address(&recipient(), DUST_THRESHOLD))
            .is_ok());
    }

    #[test]
    fn test_build_no_outputs() {
        let keys = keys();
        let builder = TransactionBuilder::new(Network::regtest());
        let utxos = vec![owned_utxo(&keys, 0, 100_000, 1)];
        assert!(matches!(
            builder.build(&utxos, &change_target(&keys)),
            Err(Error::TransactionBuild(_))
        ));
    }

    #[test]
    fn test_build_with_change_balances() {
        let keys = keys();
        let utxos = vec![owned_utxo(&keys, 0, 1_000_000, 1)];
        let mut builder = TransactionBuilder::new(Network::regtest());
        builder
            .add_output(PaymentOutput::to_address(&recipient(), 400_000))
            .unwrap();

        let unsigned = builder.build(&utxos, &change_target(&keys)).unwrap();
        let change = unsigned.change().unwrap();
        assert_eq!(change.index, 1);
        assert_eq!(
            unsigned.input_value(),
            400_000 + unsigned.fee() + change.value
        );
        assert_eq!(unsigned.fee(), 2_260);
    }

    #[test]
    fn test_sign_and_roundtrip() {
        let keys = keys();
        let utxos = vec![
            owned_utxo(&keys, 0, 30_000, 1),
            owned_utxo(&keys, 1, 30_000, 2),
        ];
        let mut builder = TransactionBuilder::new(Network::regtest());
        builder
            .add_output(PaymentOutput::to_address(&recipient(), 50_000))
            .unwrap();
        let unsigned = builder.build(&utxos, &change_target(&keys)).unwrap();
        let signed = unsigned.sign(&keys).unwrap();

        for input in &signed.transaction().inputs {
            assert!(!input.script_sig.is_empty());
        }
        let parsed = Transaction::parse(&signed.serialize()).unwrap();
        assert_eq!(&parsed, signed.transaction());
        assert_eq!(parsed.txid(), signed.txid());
    }

    #[test]
    fn test_signature_commits_to_input_script() {
        let keys = keys();
        let utxo = owned_utxo(&keys, 0, 100_000, 1);
        let mut builder = TransactionBuilder::new(Network::regtest());
        builder
            .add_output(PaymentOutput::to_address(&recipient(), 50_000))
            .unwrap();
        let unsigned = builder.build(&[utxo.clone()], &change_target(&keys)).unwrap();
        let signed = unsigned.sign(&keys).unwrap();

        let script_sig = signed.transaction().inputs[0].script_sig.as_bytes();
        let sig_len = script_sig[0] as usize;
        let der = &script_sig[1..sig_len];
        assert_eq!(script_sig[sig_len], SIGHASH_ALL as u8);
        let signature = secp256k1::ecdsa::Signature::from_der(der).unwrap();

        let pair = keys.derive(utxo.path.as_ref().unwrap()).unwrap();
        let digest = unsigned
            .transaction()
            .signature_hash(0, &utxo.script_pubkey, SIGHASH_ALL)
            .unwrap();
        assert!(crate::keys::verify_signature(pair.public_key(), &digest, &signature));

        let other = Script::p2pkh(&[0u8; 20]);
        let wrong = unsigned
            .transaction()
            .signature_hash(0, &other, SIGHASH_ALL)
            .unwrap();
        assert!(!crate::keys::verify_signature(pair.public_key(), &wrong, &signature));
    }

    #[test]
    fn test_missing_path_is_missing_key() {
        let keys = keys();
        let mut orphan = owned_utxo(&keys, 0, 60_000, 1);
        orphan.path = None;
        let utxos = vec![owned_utxo(&keys, 1, 60_000, 1), orphan];
        let mut builder = TransactionBuilder::new(Network::regtest());
        builder
            .add_output(PaymentOutput::to_address(&recipient(), 100_000))
            .unwrap();
        let unsigned = builder.build(&utxos, &change_target(&keys)).unwrap();
        let before = unsigned.clone();

        let err = unsigned.sign(&keys).unwrap_err();
        assert!(matches!(err, Error::MissingKey(_)));
        assert_eq!(unsigned, before);
        assert!(unsigned
            .transaction()
            .inputs
            .iter()
            .all(|i| i.script_sig.is_empty()));
    }

    #[test]
    fn test_watch_only_cannot_sign() {
        let keys = keys();
        let watch = KeyChain::watch_only(
            &keys.account_xpub(),
            DerivationScheme::default(),
            Network::regtest(),
        )
        .unwrap();
        let utxos = vec![owned_utxo(&keys, 0, 100_000, 1)];
        let mut builder = TransactionBuilder::new(Network::regtest());
        builder
            .add_output(PaymentOutput::to_address(&recipient(), 50_000))
            .unwrap();
        let unsigned = builder.build(&utxos, &change_target(&watch)).unwrap();
        assert!(matches!(unsigned.sign(&watch), Err(Error::MissingKey(_))));
    }
}
