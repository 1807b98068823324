//! 80-byte block header

use crate::pow::{bits_to_target, block_work};
use crate::u256::U256;
use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use spv_core::encoding::Reader;
use spv_core::Hash256;

/// Serialized header size
pub const HEADER_SIZE: usize = 80;

/// Block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Block version
    pub version: i32,
    /// Hash of the previous header
    pub prev_hash: Hash256,
    /// Merkle root of the block's transactions
    pub merkle_root: Hash256,
    /// Timestamp (unix seconds)
    pub time: u32,
    /// Compact difficulty target
    pub bits: u32,
    /// Nonce
    pub nonce: u32,
}

impl BlockHeader {
    /// Wire encoding
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..36].copy_from_slice(self.prev_hash.as_bytes());
        out[36..68].copy_from_slice(self.merkle_root.as_bytes());
        out[68..72].copy_from_slice(&self.time.to_le_bytes());
        out[72..76].copy_from_slice(&self.bits.to_le_bytes());
        out[76..80].copy_from_slice(&self.nonce.to_le_bytes());
        out
    }

    /// Decode exactly one header
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HEADER_SIZE {
            return Err(Error::InvalidHeader(format!(
                "header is {} bytes, expected {}",
                bytes.len(),
                HEADER_SIZE
            )));
        }
        let mut reader = Reader::new(bytes);
        Ok(Self {
            version: reader.read_i32()?,
            prev_hash: Hash256::from_bytes(reader.read_array()?),
            merkle_root: Hash256::from_bytes(reader.read_array()?),
            time: reader.read_u32()?,
            bits: reader.read_u32()?,
            nonce: reader.read_u32()?,
        })
    }

    /// Decode a run of concatenated headers
    pub fn decode_many(bytes: &[u8]) -> Result<Vec<Self>> {
        if bytes.len() % HEADER_SIZE != 0 {
            return Err(Error::InvalidHeader(format!(
                "{} bytes is not a whole number of headers",
                bytes.len()
            )));
        }
        bytes.chunks_exact(HEADER_SIZE).map(Self::decode).collect()
    }

    /// Decode from hex
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| Error::InvalidHeader(format!("bad header hex: {e}")))?;
        Self::decode(&bytes)
    }

    /// Hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.encode())
    }

    /// Block hash: double SHA-256 of the encoding
    pub fn hash(&self) -> Hash256 {
        Hash256::digest(&self.encode())
    }

    /// Expanded target
    pub fn target(&self) -> Result<U256> {
        bits_to_target(self.bits)
    }

    /// Expected number of hashes to produce this header
    pub fn work(&self) -> Result<U256> {
        Ok(block_work(self.target()?))
    }
}

impl Serialize for BlockHeader {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlockHeader {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BlockHeader::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Litecoin mainnet genesis header
    pub(crate) const LTC_GENESIS: &str = "010000000000000000000000000000000000000000000000000000000000000000000000d9ced4ed1130f7b7faad9be25323ffafa33232a17c3edf6cfd97bee6bafbdd97b9aa8e4ef0ff0f1ecd513f7c";

    #[test]
    fn test_genesis_decode() {
        let header = BlockHeader::from_hex(LTC_GENESIS).unwrap();
        assert_eq!(header.version, 1);
        assert_eq!(header.prev_hash, Hash256::ZERO);
        assert_eq!(header.time, 1_317_972_665);
        assert_eq!(header.bits, 0x1e0f_fff0);
        assert_eq!(header.nonce, 2_084_524_493);
        assert_eq!(
            header.merkle_root.to_string(),
            "97ddfbbae6be97fd6cdf3e7ca13232a3afff2353e29badfab7f73011edd4ced9"
        );
        assert_eq!(
            header.hash().to_string(),
            "12a765e31ffd4059bada1e25190f6e98c99d9714d334efa41a195a7e7e04bfe2"
        );
        assert_eq!(header.to_hex(), LTC_GENESIS);
    }

    #[test]
    fn test_decode_many() {
        let bytes = hex::decode(LTC_GENESIS).unwrap();
        let mut two = bytes.clone();
        two.extend_from_slice(&bytes);
        assert_eq!(BlockHeader::decode_many(&two).unwrap().len(), 2);
        assert!(BlockHeader::decode_many(&two[..100]).is_err());
        assert!(BlockHeader::decode(&bytes[..79]).is_err());
    }

    #[test]
    fn test_serde_hex() {
        let header = BlockHeader::from_hex(LTC_GENESIS).unwrap();
        let json = serde_json::to_string(&header).unwrap();
        assert_eq!(json, format!("\"{}\"", LTC_GENESIS));
        let back: BlockHeader = serde_json::from_str(&json).unwrap();
        assert_eq!(back, header);
    }
}
