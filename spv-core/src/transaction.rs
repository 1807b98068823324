//! Transaction wire format
//!
//! Legacy serialization with optional segregated-witness data on parse, so
//! that history transactions fetched from servers decode whatever their
//! format. Wallet-built transactions are always legacy P2PKH spends.

use crate::encoding::{compact_size_len, write_compact_size, write_var_bytes, Reader};
use crate::hash::Hash256;
use crate::script::Script;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sign all inputs and outputs
pub const SIGHASH_ALL: u32 = 0x01;

/// Final sequence number
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// Reference to a transaction output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    /// Transaction id
    pub txid: Hash256,
    /// Output index
    pub vout: u32,
}

impl OutPoint {
    /// Create new outpoint
    pub const fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// The null outpoint spent by coinbase inputs
    pub fn is_null(&self) -> bool {
        self.txid == Hash256::ZERO && self.vout == u32::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    /// Output being spent
    pub previous_output: OutPoint,
    /// Unlocking script
    pub script_sig: Script,
    /// Sequence number
    pub sequence: u32,
    /// Witness stack (empty for legacy inputs)
    pub witness: Vec<Vec<u8>>,
}

impl TxIn {
    /// Unsigned input spending `previous_output`
    pub fn new(previous_output: OutPoint) -> Self {
        Self {
            previous_output,
            script_sig: Script::empty(),
            sequence: SEQUENCE_FINAL,
            witness: Vec::new(),
        }
    }
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    /// Amount in base units
    pub value: u64,
    /// Locking script
    pub script_pubkey: Script,
}

/// A transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Version
    pub version: i32,
    /// Inputs
    pub inputs: Vec<TxIn>,
    /// Outputs
    pub outputs: Vec<TxOut>,
    /// Lock time
    pub lock_time: u32,
}

impl Transaction {
    /// Empty version-2 transaction
    pub fn new() -> Self {
        Self {
            version: 2,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
        }
    }

    /// Whether any input carries witness data
    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|i| !i.witness.is_empty())
    }

    /// Coinbase transactions spend the null outpoint
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    /// Full serialization, including witness data when present
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.legacy_size());
        self.encode(&mut out, self.has_witness());
        out
    }

    /// Serialization without witness data
    pub fn serialize_legacy(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.legacy_size());
        self.encode(&mut out, false);
        out
    }

    /// Transaction id: double SHA-256 of the witness-stripped encoding
    pub fn txid(&self) -> Hash256 {
        Hash256::digest(&self.serialize_legacy())
    }

    /// Size of the witness-stripped encoding
    pub fn legacy_size(&self) -> usize {
        let mut size = 4 + 4;
        size += compact_size_len(self.inputs.len() as u64);
        for input in &self.inputs {
            size += 36 + compact_size_len(input.script_sig.len() as u64) + input.script_sig.len() + 4;
        }
        size += compact_size_len(self.outputs.len() as u64);
        for output in &self.outputs {
            size += 8
                + compact_size_len(output.script_pubkey.len() as u64)
                + output.script_pubkey.len();
        }
        size
    }

    fn encode(&self, out: &mut Vec<u8>, with_witness: bool) {
        out.extend_from_slice(&self.version.to_le_bytes());
        if with_witness {
            out.extend_from_slice(&[0x00, 0x01]);
        }
        write_compact_size(out, self.inputs.len() as u64);
        for input in &self.inputs {
            out.extend_from_slice(input.previous_output.txid.as_bytes());
            out.extend_from_slice(&input.previous_output.vout.to_le_bytes());
            write_var_bytes(out, input.script_sig.as_bytes());
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_compact_size(out, self.outputs.len() as u64);
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            write_var_bytes(out, output.script_pubkey.as_bytes());
        }
        if with_witness {
            for input in &self.inputs {
                write_compact_size(out, input.witness.len() as u64);
                for item in &input.witness {
                    write_var_bytes(out, item);
                }
            }
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
    }

    /// Parse a complete transaction; trailing bytes are an error
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let tx = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(tx)
    }

    /// Parse a transaction from hex
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim()).map_err(|e| Error::Decode(format!("bad tx hex: {e}")))?;
        Self::parse(&bytes)
    }

    /// Read one transaction from `reader`
    pub fn read(reader: &mut Reader<'_>) -> Result<Self> {
        let version = reader.read_i32()?;

        let mut segwit = false;
        if reader.peek_u8() == Some(0x00) {
            let marker = reader.read_array::<2>()?;
            if marker[1] != 0x01 {
                return Err(Error::Decode(format!("bad witness flag {:#04x}", marker[1])));
            }
            segwit = true;
        }

        let input_count = read_count(reader, 41)?;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            let txid = Hash256::from_bytes(reader.read_array()?);
            let vout = reader.read_u32()?;
            let script_sig = Script::from_bytes(reader.read_var_bytes()?.to_vec());
            let sequence = reader.read_u32()?;
            inputs.push(TxIn {
                previous_output: OutPoint::new(txid, vout),
                script_sig,
                sequence,
                witness: Vec::new(),
            });
        }

        let output_count = read_count(reader, 9)?;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            let value = reader.read_u64()?;
            let script_pubkey = Script::from_bytes(reader.read_var_bytes()?.to_vec());
            outputs.push(TxOut {
                value,
                script_pubkey,
            });
        }

        if segwit {
            for input in inputs.iter_mut() {
                let items = read_count(reader, 1)?;
                for _ in 0..items {
                    input.witness.push(reader.read_var_bytes()?.to_vec());
                }
            }
            if inputs.iter().all(|i| i.witness.is_empty()) {
                return Err(Error::Decode("witness flag set but no witness data".to_string()));
            }
        }

        let lock_time = reader.read_u32()?;

        if inputs.is_empty() {
            return Err(Error::Decode("transaction has no inputs".to_string()));
        }

        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }

    /// Legacy signature hash for input `index` spending `prev_script`.
    ///
    /// Every other input's script is blanked, the signed input carries the
    /// script of the output it spends, and the hash type is appended.
    pub fn signature_hash(&self, index: usize, prev_script: &Script, sighash_type: u32) -> Result<[u8; 32]> {
        if index >= self.inputs.len() {
            return Err(Error::TransactionSigning(format!(
                "input {} out of range ({} inputs)",
                index,
                self.inputs.len()
            )));
        }
        let mut copy = self.clone();
        for (i, input) in copy.inputs.iter_mut().enumerate() {
            input.witness.clear();
            input.script_sig = if i == index {
                prev_script.clone()
            } else {
                Script::empty()
            };
        }
        let mut data = copy.serialize_legacy();
        data.extend_from_slice(&sighash_type.to_le_bytes());
        Ok(crate::hash::sha256d(&data))
    }

    /// Sum of output values
    pub fn output_value(&self) -> Result<u64> {
        self.outputs.iter().try_fold(0u64, |acc, o| {
            acc.checked_add(o.value)
                .ok_or_else(|| Error::AmountOverflow("output sum".to_string()))
        })
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

/// Read an element count, rejecting counts the remaining bytes cannot hold
fn read_count(reader: &mut Reader<'_>, min_element_size: usize) -> Result<usize> {
    let count = reader.read_compact_size()?;
    if count > (reader.remaining() / min_element_size.max(1)) as u64 {
        return Err(Error::Decode(format!(
            "element count {} exceeds remaining data",
            count
        )));
    }
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Transaction {
        let mut tx = Transaction::new();
        tx.inputs.push(TxIn::new(OutPoint::new(Hash256::digest(b"prev"), 1)));
        tx.outputs.push(TxOut {
            value: 50_000,
            script_pubkey: Script::p2pkh(&[3u8; 20]),
        });
        tx.outputs.push(TxOut {
            value: 12_345,
            script_pubkey: Script::p2sh(&[4u8; 20]),
        });
        tx
    }

    #[test]
    fn test_serialize_parse() {
        let tx = sample();
        let bytes = tx.serialize();
        assert_eq!(bytes.len(), tx.legacy_size());
        assert_eq!(Transaction::parse(&bytes).unwrap(), tx);
    }

    #[test]
    fn test_witness_roundtrip_and_txid() {
        let mut tx = sample();
        let legacy_txid = tx.txid();
        tx.inputs[0].witness = vec![vec![1, 2, 3], vec![4; 33]];
        let bytes = tx.serialize();
        assert_eq!(&bytes[4..6], &[0x00, 0x01]);
        let parsed = Transaction::parse(&bytes).unwrap();
        assert_eq!(parsed, tx);
        assert_eq!(parsed.txid(), legacy_txid);
    }

    #[test]
    fn test_truncated_rejected() {
        let bytes = sample().serialize();
        assert!(Transaction::parse(&bytes[..bytes.len() - 1]).is_err());
        let mut extra = bytes.clone();
        extra.push(0);
        assert!(Transaction::parse(&extra).is_err());
    }

    #[test]
    fn test_huge_count_rejected() {
        // version, then an input count far beyond the data
        let bytes = [2, 0, 0, 0, 0xfe, 0xff, 0xff, 0xff, 0x0f];
        assert!(Transaction::parse(&bytes).is_err());
    }

    #[test]
    fn test_signature_hash_depends_on_input() {
        let mut tx = sample();
        tx.inputs.push(TxIn::new(OutPoint::new(Hash256::digest(b"other"), 0)));
        let script = Script::p2pkh(&[5u8; 20]);
        let h0 = tx.signature_hash(0, &script, SIGHASH_ALL).unwrap();
        let h1 = tx.signature_hash(1, &script, SIGHASH_ALL).unwrap();
        assert_ne!(h0, h1);
        let other_script = Script::p2pkh(&[6u8; 20]);
        assert_ne!(h0, tx.signature_hash(0, &other_script, SIGHASH_ALL).unwrap());
        assert!(tx.signature_hash(2, &script, SIGHASH_ALL).is_err());
    }

    #[test]
    fn test_known_txid() {
        // Bitcoin genesis coinbase
        let raw = "01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff4d04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73ffffffff0100f2052a01000000434104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac00000000";
        let tx = Transaction::from_hex(raw).unwrap();
        assert!(tx.is_coinbase());
        assert_eq!(
            tx.txid().to_string(),
            "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"
        );
    }
}
