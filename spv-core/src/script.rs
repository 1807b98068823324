//! Script templates for the address kinds the wallet understands

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Push the next N bytes (1..=75 are direct pushes)
const OP_PUSHBYTES_20: u8 = 0x14;
const OP_PUSHBYTES_33: u8 = 0x21;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_0: u8 = 0x00;
/// OP_1 through OP_16 are OP_1 - 1 + n
const OP_1: u8 = 0x51;
const OP_CHECKMULTISIG: u8 = 0xae;
const OP_DUP: u8 = 0x76;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_HASH160: u8 = 0xa9;
const OP_CHECKSIG: u8 = 0xac;

/// Raw script bytes
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Script(Vec<u8>);

impl Script {
    /// Wrap raw bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Empty script
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the script has no bytes
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `OP_DUP OP_HASH160 <hash> OP_EQUALVERIFY OP_CHECKSIG`
    pub fn p2pkh(hash: &[u8; 20]) -> Self {
        let mut s = Vec::with_capacity(25);
        s.extend_from_slice(&[OP_DUP, OP_HASH160, OP_PUSHBYTES_20]);
        s.extend_from_slice(hash);
        s.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        Self(s)
    }

    /// `OP_HASH160 <hash> OP_EQUAL`
    pub fn p2sh(hash: &[u8; 20]) -> Self {
        let mut s = Vec::with_capacity(23);
        s.extend_from_slice(&[OP_HASH160, OP_PUSHBYTES_20]);
        s.extend_from_slice(hash);
        s.push(OP_EQUAL);
        Self(s)
    }

    /// Unlocking script for a P2PKH output: `<sig+hashtype> <pubkey>`
    pub fn p2pkh_unlock(signature_with_hashtype: &[u8], public_key: &[u8]) -> Self {
        let mut s = Vec::with_capacity(signature_with_hashtype.len() + public_key.len() + 2);
        push_data(&mut s, signature_with_hashtype);
        push_data(&mut s, public_key);
        Self(s)
    }

    /// `OP_m <pubkey>... OP_n OP_CHECKMULTISIG`, keys in the given order.
    ///
    /// `None` unless 1 <= m <= n <= 16.
    pub fn multisig(threshold: usize, public_keys: &[[u8; 33]]) -> Option<Self> {
        let n = public_keys.len();
        if threshold == 0 || threshold > n || n > 16 {
            return None;
        }
        let mut s = Vec::with_capacity(3 + 34 * n);
        s.push(OP_1 - 1 + threshold as u8);
        for key in public_keys {
            s.push(OP_PUSHBYTES_33);
            s.extend_from_slice(key);
        }
        s.push(OP_1 - 1 + n as u8);
        s.push(OP_CHECKMULTISIG);
        Some(Self(s))
    }

    /// Threshold and keys of a bare multisig script
    pub fn parse_multisig(&self) -> Option<(usize, Vec<[u8; 33]>)> {
        let s = &self.0;
        let (&first, rest) = s.split_first()?;
        let (&last, rest) = rest.split_last()?;
        let (&count, body) = rest.split_last()?;
        if last != OP_CHECKMULTISIG || !(OP_1..OP_1 + 16).contains(&first) {
            return None;
        }
        if !(OP_1..OP_1 + 16).contains(&count) {
            return None;
        }
        let (m, n) = ((first - OP_1 + 1) as usize, (count - OP_1 + 1) as usize);
        if m > n || body.len() != 34 * n {
            return None;
        }
        let mut keys = Vec::with_capacity(n);
        for chunk in body.chunks_exact(34) {
            if chunk[0] != OP_PUSHBYTES_33 {
                return None;
            }
            let mut key = [0u8; 33];
            key.copy_from_slice(&chunk[1..]);
            keys.push(key);
        }
        Some((m, keys))
    }

    /// Unlocking script for a P2SH multisig output:
    /// `OP_0 <sig+hashtype>... <redeem script>`
    pub fn multisig_unlock(signatures_with_hashtype: &[Vec<u8>], redeem_script: &Script) -> Self {
        let mut s = vec![OP_0];
        for signature in signatures_with_hashtype {
            push_data(&mut s, signature);
        }
        push_data(&mut s, redeem_script.as_bytes());
        Self(s)
    }

    /// Public key hash if this is a P2PKH locking script
    pub fn p2pkh_hash(&self) -> Option<[u8; 20]> {
        let s = &self.0;
        if s.len() == 25
            && s[0] == OP_DUP
            && s[1] == OP_HASH160
            && s[2] == OP_PUSHBYTES_20
            && s[23] == OP_EQUALVERIFY
            && s[24] == OP_CHECKSIG
        {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&s[3..23]);
            Some(hash)
        } else {
            None
        }
    }

    /// Script hash if this is a P2SH locking script
    pub fn p2sh_hash(&self) -> Option<[u8; 20]> {
        let s = &self.0;
        if s.len() == 23 && s[0] == OP_HASH160 && s[1] == OP_PUSHBYTES_20 && s[22] == OP_EQUAL {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&s[2..22]);
            Some(hash)
        } else {
            None
        }
    }
}

fn push_data(out: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len < OP_PUSHDATA1 as usize {
        out.push(len as u8);
    } else if len <= u8::MAX as usize {
        out.push(OP_PUSHDATA1);
        out.push(len as u8);
    } else {
        // Redeem scripts are capped at 520 bytes
        out.push(OP_PUSHDATA2);
        out.extend_from_slice(&(len as u16).to_le_bytes());
    }
    out.extend_from_slice(data);
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Script({})", hex::encode(&self.0))
    }
}

impl Serialize for Script {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Script {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map(Script).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_p2pkh_template() {
        let script = Script::p2pkh(&[0x11; 20]);
        assert_eq!(script.len(), 25);
        assert_eq!(script.p2pkh_hash(), Some([0x11; 20]));
        assert_eq!(script.p2sh_hash(), None);
    }

    #[test]
    fn test_p2sh_template() {
        let script = Script::p2sh(&[0x22; 20]);
        assert_eq!(script.len(), 23);
        assert_eq!(script.p2sh_hash(), Some([0x22; 20]));
        assert_eq!(script.p2pkh_hash(), None);
    }

    #[test]
    fn test_multisig_template() {
        let keys = [[0x02; 33], [0x03; 33], [0x02; 33]];
        let script = Script::multisig(2, &keys).unwrap();
        assert_eq!(script.len(), 3 + 3 * 34);
        assert_eq!(script.as_bytes()[0], 0x52);
        assert_eq!(script.as_bytes()[script.len() - 2], 0x53);
        assert_eq!(script.parse_multisig(), Some((2, keys.to_vec())));

        assert!(Script::multisig(0, &keys).is_none());
        assert!(Script::multisig(4, &keys).is_none());
        assert_eq!(Script::p2pkh(&[1; 20]).parse_multisig(), None);
    }

    #[test]
    fn test_multisig_unlock_uses_wide_push_for_large_redeem() {
        let redeem = Script::multisig(1, &[[0x02; 33]; 15]).unwrap();
        assert_eq!(redeem.len(), 513);
        let unlock = Script::multisig_unlock(&[vec![0x30; 71]], &redeem);
        let bytes = unlock.as_bytes();
        assert_eq!(bytes[0], 0x00);
        assert_eq!(bytes[1], 71);
        assert_eq!(&bytes[73..76], &[0x4d, 0x01, 0x02]);
        assert_eq!(unlock.len(), 1 + 72 + 3 + 513);
    }

    #[test]
    fn test_unlock_pushes() {
        let sig = vec![0x30; 72];
        let pk = vec![0x02; 33];
        let script = Script::p2pkh_unlock(&sig, &pk);
        assert_eq!(script.as_bytes()[0], 72);
        assert_eq!(script.as_bytes()[73], 33);
        assert_eq!(script.len(), 1 + 72 + 1 + 33);
    }
}
