//! Consensus parameters used by header verification

use crate::network::{Network, NetworkType};
use serde::{Deserialize, Serialize};

/// Hash function a header's proof of work is measured with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowAlgorithm {
    /// scrypt(N=1024, r=1, p=1) over the 80-byte header
    Scrypt,
    /// Double SHA-256 over the 80-byte header
    Sha256d,
}

/// An algorithm a multi-algorithm chain selects through header version bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgorithmSlot {
    /// Value of the masked version bits that selects this slot
    pub version_bits: u32,
    /// Hash function for headers in this slot
    pub algorithm: PowAlgorithm,
    /// Easiest allowed target for this algorithm, in compact form
    pub pow_limit_bits: u32,
}

/// How a header's proof-of-work hash function is chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowSelection {
    /// Every header uses [`ConsensusParams::pow_algorithm`]
    Fixed,
    /// `version & mask` picks a slot; unmatched headers use the default
    /// algorithm and pow limit
    VersionBits {
        /// Bits of the header version that carry the algorithm
        mask: u32,
        /// Known algorithms
        slots: Vec<AlgorithmSlot>,
    },
}

/// Algorithm and pow limit that apply to one header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowRule {
    /// Hash function
    pub algorithm: PowAlgorithm,
    /// Easiest allowed target, in compact form
    pub pow_limit_bits: u32,
}

/// Rule that decides the compact target a header must carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DifficultyRule {
    /// Windowed retarget every [`ConsensusParams::retarget_interval`] blocks
    Retarget,
    /// Kimoto Gravity Well: a per-block retarget over a window that grows
    /// until the observed block rate leaves the event horizon
    KimotoGravityWell {
        /// Target seconds between blocks
        spacing: u32,
        /// Fewest past blocks considered
        past_blocks_min: u32,
        /// Most past blocks considered
        past_blocks_max: u32,
    },
}

impl DifficultyRule {
    /// KGW over half a day to two weeks of history at `spacing`
    pub const fn kimoto_gravity_well(spacing: u32) -> Self {
        const DAY: u32 = 24 * 60 * 60;
        DifficultyRule::KimotoGravityWell {
            spacing,
            past_blocks_min: DAY / 2 / spacing,
            past_blocks_max: DAY * 14 / spacing,
        }
    }
}

/// A difficulty rule in force from `from_height` on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifficultyEra {
    /// First height the rule applies to
    pub from_height: u32,
    /// The rule
    pub rule: DifficultyRule,
}

/// Consensus parameters
#[derive(Debug, Clone)]
pub struct ConsensusParams {
    /// Network configuration
    pub network: Network,
    /// Easiest allowed target, in compact form
    pub pow_limit_bits: u32,
    /// Expected duration of one retarget window in seconds
    pub target_timespan: u32,
    /// Target block time in seconds
    pub target_spacing: u32,
    /// Testnet rule: blocks may fall back to the pow limit between retargets
    pub allow_min_difficulty: bool,
    /// Regtest rule: difficulty never changes
    pub no_retargeting: bool,
    /// Proof-of-work hash function
    pub pow_algorithm: PowAlgorithm,
    /// Per-header algorithm dispatch
    pub pow_selection: PowSelection,
    /// Difficulty rules by height, ascending; empty means
    /// [`DifficultyRule::Retarget`] throughout
    pub difficulty_eras: Vec<DifficultyEra>,
    /// Number of previous blocks whose median time a new block must exceed
    pub median_time_span: usize,
    /// Coinbase maturity (blocks)
    pub coinbase_maturity: u32,
    /// Maximum supply in base units
    pub max_money: u64,
}

const LITOSHI_PER_COIN: u64 = 100_000_000;

impl ConsensusParams {
    /// Create consensus params for mainnet
    pub fn mainnet() -> Self {
        Self {
            network: Network::mainnet(),
            pow_limit_bits: 0x1e0f_fff0,
            target_timespan: 302_400, // 3.5 days
            target_spacing: 150,      // 2.5 minutes
            allow_min_difficulty: false,
            no_retargeting: false,
            pow_algorithm: PowAlgorithm::Scrypt,
            pow_selection: PowSelection::Fixed,
            difficulty_eras: Vec::new(),
            median_time_span: 11,
            coinbase_maturity: 100,
            max_money: 84_000_000 * LITOSHI_PER_COIN,
        }
    }

    /// Create consensus params for testnet
    pub fn testnet() -> Self {
        Self {
            network: Network::testnet(),
            allow_min_difficulty: true,
            ..Self::mainnet()
        }
    }

    /// Create consensus params for regtest
    pub fn regtest() -> Self {
        Self {
            network: Network::regtest(),
            pow_limit_bits: 0x207f_ffff,
            allow_min_difficulty: true,
            no_retargeting: true,
            ..Self::mainnet()
        }
    }

    /// Get consensus params by network type
    pub fn from_network(network_type: NetworkType) -> Self {
        match network_type {
            NetworkType::Mainnet => Self::mainnet(),
            NetworkType::Testnet => Self::testnet(),
            NetworkType::Regtest => Self::regtest(),
        }
    }

    /// Replace the proof-of-work hash function
    pub fn with_pow_algorithm(mut self, algorithm: PowAlgorithm) -> Self {
        self.pow_algorithm = algorithm;
        self
    }

    /// Select the algorithm per header from the version bits under `mask`
    pub fn with_version_bit_algorithms(mut self, mask: u32, slots: Vec<AlgorithmSlot>) -> Self {
        self.pow_selection = PowSelection::VersionBits { mask, slots };
        self
    }

    /// Switch to `rule` from `from_height` on
    pub fn with_difficulty_era(mut self, from_height: u32, rule: DifficultyRule) -> Self {
        self.difficulty_eras.push(DifficultyEra { from_height, rule });
        self.difficulty_eras.sort_by_key(|era| era.from_height);
        self
    }

    /// Algorithm and pow limit for a header with `version`
    pub fn pow_rule(&self, version: i32) -> PowRule {
        let default = PowRule {
            algorithm: self.pow_algorithm,
            pow_limit_bits: self.pow_limit_bits,
        };
        match &self.pow_selection {
            PowSelection::Fixed => default,
            PowSelection::VersionBits { mask, slots } => {
                let selected = version as u32 & mask;
                slots
                    .iter()
                    .find(|slot| slot.version_bits == selected)
                    .map_or(default, |slot| PowRule {
                        algorithm: slot.algorithm,
                        pow_limit_bits: slot.pow_limit_bits,
                    })
            }
        }
    }

    /// Difficulty rule for a header at `height`
    pub fn difficulty_rule(&self, height: u32) -> DifficultyRule {
        self.difficulty_eras
            .iter()
            .rev()
            .find(|era| era.from_height <= height)
            .map_or(DifficultyRule::Retarget, |era| era.rule)
    }

    /// Number of blocks between difficulty adjustments
    pub fn retarget_interval(&self) -> u32 {
        self.target_timespan / self.target_spacing
    }

    /// Whether a difficulty adjustment happens at this height
    pub fn is_retarget_height(&self, height: u32) -> bool {
        !self.no_retargeting && height > 0 && height % self.retarget_interval() == 0
    }

    /// Check if amount is valid (within max supply)
    pub fn is_valid_amount(&self, amount: u64) -> bool {
        amount <= self.max_money
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mainnet_consensus() {
        let params = ConsensusParams::mainnet();
        assert_eq!(params.target_spacing, 150);
        assert_eq!(params.retarget_interval(), 2016);
        assert_eq!(params.pow_algorithm, PowAlgorithm::Scrypt);
        assert!(!params.allow_min_difficulty);
    }

    #[test]
    fn test_retarget_heights() {
        let params = ConsensusParams::mainnet();
        assert!(!params.is_retarget_height(0));
        assert!(!params.is_retarget_height(2015));
        assert!(params.is_retarget_height(2016));
        assert!(params.is_retarget_height(4032));

        let regtest = ConsensusParams::regtest();
        assert!(!regtest.is_retarget_height(2016));
    }

    #[test]
    fn test_pow_override() {
        let params = ConsensusParams::regtest().with_pow_algorithm(PowAlgorithm::Sha256d);
        assert_eq!(params.pow_algorithm, PowAlgorithm::Sha256d);
        assert_eq!(params.pow_limit_bits, 0x207f_ffff);
    }

    #[test]
    fn test_version_bits_select_algorithm() {
        let params = ConsensusParams::mainnet().with_version_bit_algorithms(
            7 << 9,
            vec![AlgorithmSlot {
                version_bits: 1 << 9,
                algorithm: PowAlgorithm::Sha256d,
                pow_limit_bits: 0x1d00_ffff,
            }],
        );
        let sha = params.pow_rule(2 | (1 << 9));
        assert_eq!(sha.algorithm, PowAlgorithm::Sha256d);
        assert_eq!(sha.pow_limit_bits, 0x1d00_ffff);

        // Unknown algorithm values fall back to the default
        for version in [2, 2 | (2 << 9), 0x2000_0000] {
            let rule = params.pow_rule(version);
            assert_eq!(rule.algorithm, PowAlgorithm::Scrypt);
            assert_eq!(rule.pow_limit_bits, 0x1e0f_fff0);
        }
        assert_eq!(
            ConsensusParams::mainnet().pow_rule(2 | (1 << 9)).algorithm,
            PowAlgorithm::Scrypt
        );
    }

    #[test]
    fn test_difficulty_eras() {
        let kgw = DifficultyRule::kimoto_gravity_well(300);
        assert_eq!(
            kgw,
            DifficultyRule::KimotoGravityWell {
                spacing: 300,
                past_blocks_min: 144,
                past_blocks_max: 4032,
            }
        );

        let params = ConsensusParams::mainnet()
            .with_difficulty_era(225_001, DifficultyRule::Retarget)
            .with_difficulty_era(5_401, kgw);
        assert_eq!(params.difficulty_rule(0), DifficultyRule::Retarget);
        assert_eq!(params.difficulty_rule(5_400), DifficultyRule::Retarget);
        assert_eq!(params.difficulty_rule(5_401), kgw);
        assert_eq!(params.difficulty_rule(225_000), kgw);
        assert_eq!(params.difficulty_rule(225_001), DifficultyRule::Retarget);
    }

    #[test]
    fn test_valid_amount() {
        let params = ConsensusParams::mainnet();
        assert!(params.is_valid_amount(1_000_000));
        assert!(params.is_valid_amount(params.max_money));
        assert!(!params.is_valid_amount(params.max_money + 1));
    }
}
