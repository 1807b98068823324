//! Network definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Network type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Mainnet
    Mainnet,
    /// Testnet
    Testnet,
    /// Regtest (local development)
    Regtest,
}

impl NetworkType {
    /// Short name used in config files and on the command line
    pub const fn name(&self) -> &'static str {
        match self {
            NetworkType::Mainnet => "mainnet",
            NetworkType::Testnet => "testnet",
            NetworkType::Regtest => "regtest",
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NetworkType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(NetworkType::Mainnet),
            "testnet" | "test" => Ok(NetworkType::Testnet),
            "regtest" => Ok(NetworkType::Regtest),
            other => Err(crate::Error::InvalidNetwork(other.to_string())),
        }
    }
}

/// Network configuration
#[derive(Debug, Clone)]
pub struct Network {
    /// Network type
    pub network_type: NetworkType,
    /// Human-readable name
    pub name: &'static str,
    /// Coin type (BIP-44)
    pub coin_type: u32,
    /// Base58Check version byte for pay-to-pubkey-hash addresses
    pub p2pkh_version: u8,
    /// Base58Check version byte for pay-to-script-hash addresses
    pub p2sh_version: u8,
    /// WIF private key prefix
    pub wif_prefix: u8,
    /// Extended private key version bytes
    pub xprv_version: [u8; 4],
    /// Extended public key version bytes
    pub xpub_version: [u8; 4],
    /// Default server port
    pub default_port: u16,
    /// Servers tried when the user configures none
    pub default_servers: &'static [&'static str],
}

const MAINNET_SERVERS: &[&str] = &[
    "electrum-ltc.bysh.me:50001",
    "electrum.ltc.xurious.com:50001",
    "backup.electrum-ltc.org:50001",
];

const TESTNET_SERVERS: &[&str] = &["electrum-ltc.bysh.me:51001", "electrum.ltc.xurious.com:51001"];

const REGTEST_SERVERS: &[&str] = &["127.0.0.1:50001"];

impl Network {
    /// Get mainnet parameters
    pub const fn mainnet() -> Self {
        Self {
            network_type: NetworkType::Mainnet,
            name: "mainnet",
            coin_type: 2,
            p2pkh_version: 0x30,
            p2sh_version: 0x32,
            wif_prefix: 0xb0,
            xprv_version: [0x04, 0x88, 0xad, 0xe4],
            xpub_version: [0x04, 0x88, 0xb2, 0x1e],
            default_port: 50001,
            default_servers: MAINNET_SERVERS,
        }
    }

    /// Get testnet parameters
    pub const fn testnet() -> Self {
        Self {
            network_type: NetworkType::Testnet,
            name: "testnet",
            coin_type: 1,
            p2pkh_version: 0x6f,
            p2sh_version: 0x3a,
            wif_prefix: 0xef,
            xprv_version: [0x04, 0x35, 0x83, 0x94],
            xpub_version: [0x04, 0x35, 0x87, 0xcf],
            default_port: 51001,
            default_servers: TESTNET_SERVERS,
        }
    }

    /// Get regtest parameters
    pub const fn regtest() -> Self {
        Self {
            network_type: NetworkType::Regtest,
            name: "regtest",
            coin_type: 1,
            p2pkh_version: 0x6f,
            p2sh_version: 0x3a,
            wif_prefix: 0xef,
            xprv_version: [0x04, 0x35, 0x83, 0x94],
            xpub_version: [0x04, 0x35, 0x87, 0xcf],
            default_port: 50001,
            default_servers: REGTEST_SERVERS,
        }
    }

    /// Get network by type
    pub const fn from_type(network_type: NetworkType) -> Self {
        match network_type {
            NetworkType::Mainnet => Self::mainnet(),
            NetworkType::Testnet => Self::testnet(),
            NetworkType::Regtest => Self::regtest(),
        }
    }

    /// Whether this network uses testnet-style address and key prefixes
    pub const fn is_test_network(&self) -> bool {
        !matches!(self.network_type, NetworkType::Mainnet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mainnet_params() {
        let net = Network::mainnet();
        assert_eq!(net.network_type, NetworkType::Mainnet);
        assert_eq!(net.coin_type, 2);
        assert_eq!(net.p2pkh_version, 0x30);
        assert!(!net.is_test_network());
        assert!(!net.default_servers.is_empty());
    }

    #[test]
    fn test_network_from_type() {
        let net = Network::from_type(NetworkType::Testnet);
        assert_eq!(net.name, "testnet");
        assert_eq!(net.p2pkh_version, 0x6f);
        assert!(net.is_test_network());
    }

    #[test]
    fn test_network_type_parse() {
        assert_eq!("mainnet".parse::<NetworkType>().unwrap(), NetworkType::Mainnet);
        assert_eq!("TEST".parse::<NetworkType>().unwrap(), NetworkType::Testnet);
        assert!("signet".parse::<NetworkType>().is_err());
        assert_eq!(NetworkType::Regtest.to_string(), "regtest");
    }

    #[test]
    fn test_network_type_serde() {
        let json = serde_json::to_string(&NetworkType::Regtest).unwrap();
        assert_eq!(json, "\"regtest\"");
        let back: NetworkType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, NetworkType::Regtest);
    }
}
