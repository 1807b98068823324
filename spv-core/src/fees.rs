//! Transaction fee calculation
//!
//! Fees are serialized size times a fee rate in base units per byte.

use crate::encoding::compact_size_len;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Minimum relay fee rate (base units per byte)
pub const MIN_FEE_RATE: u64 = 1;

/// Default fee rate (base units per byte)
pub const DEFAULT_FEE_RATE: u64 = 10;

/// Maximum absolute fee accepted (safety limit, 0.1 coin)
pub const MAX_FEE: u64 = 10_000_000;

/// Outputs below this value are uneconomical to spend
pub const DUST_THRESHOLD: u64 = 546;

/// Size of a P2PKH output: value 8 + script length 1 + script 25
pub const P2PKH_OUTPUT_SIZE: usize = 34;

/// Version, lock time
const TX_FIXED_OVERHEAD: usize = 8;

/// Estimate the serialized size of a transaction
///
/// # Arguments
/// * `input_sizes` - Estimated size of each input
/// * `output_sizes` - Size of each output
pub fn estimate_size(input_sizes: &[usize], output_sizes: &[usize]) -> usize {
    TX_FIXED_OVERHEAD
        + compact_size_len(input_sizes.len() as u64)
        + input_sizes.iter().sum::<usize>()
        + compact_size_len(output_sizes.len() as u64)
        + output_sizes.iter().sum::<usize>()
}

/// Serialized size of an output with the given script length
pub fn output_size(script_len: usize) -> usize {
    8 + compact_size_len(script_len as u64) + script_len
}

/// Fee calculator for a fixed rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeCalculator {
    rate: u64,
}

impl FeeCalculator {
    /// Calculator charging `rate` base units per byte
    pub fn new(rate: u64) -> Self {
        Self { rate }
    }

    /// Rate in base units per byte
    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Fee for a transaction of `size` bytes
    pub fn fee_for_size(&self, size: usize) -> Result<u64> {
        (size as u64)
            .checked_mul(self.rate)
            .ok_or_else(|| Error::AmountOverflow(format!("fee for {} bytes", size)))
    }

    /// Validate fee is within acceptable range
    pub fn validate_fee(&self, fee: u64, size: usize) -> Result<()> {
        let min = (size as u64).saturating_mul(MIN_FEE_RATE);
        if fee < min {
            return Err(Error::FeeTooLow(format!(
                "Fee {} is below minimum relay fee {} for {} bytes",
                fee, min, size
            )));
        }

        if fee > MAX_FEE {
            return Err(Error::FeeTooHigh(format!(
                "Fee {} exceeds maximum {}",
                fee, MAX_FEE
            )));
        }

        Ok(())
    }
}

impl Default for FeeCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_FEE_RATE)
    }
}

/// Fee policy for dynamic fee adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeePolicy {
    /// Half the base rate (slow confirmation)
    Economy,
    /// Base rate (normal confirmation)
    Standard,
    /// Double the base rate (fast confirmation)
    Priority,
    /// Explicit rate in base units per byte
    Custom(u64),
}

impl FeePolicy {
    /// Get fee multiplier
    pub fn multiplier(&self) -> f64 {
        match self {
            FeePolicy::Economy => 0.5,
            FeePolicy::Standard => 1.0,
            FeePolicy::Priority => 2.0,
            FeePolicy::Custom(_) => 1.0,
        }
    }

    /// Fee rate for this policy given the base rate, never below relay minimum
    pub fn rate(&self, base_rate: u64) -> u64 {
        let rate = match self {
            FeePolicy::Custom(rate) => *rate,
            _ => ((base_rate as f64) * self.multiplier()) as u64,
        };
        rate.max(MIN_FEE_RATE)
    }

    /// Calculator for this policy
    pub fn calculator(&self, base_rate: u64) -> FeeCalculator {
        FeeCalculator::new(self.rate(base_rate))
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        FeePolicy::Standard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_estimate_one_in_two_out() {
        // 8 + 1 + 148 + 1 + 2 * 34
        assert_eq!(estimate_size(&[148], &[34, 34]), 226);
        assert_eq!(output_size(25), P2PKH_OUTPUT_SIZE);
    }

    #[test]
    fn test_fee_scales_with_size() {
        let calc = FeeCalculator::new(10);
        assert_eq!(calc.fee_for_size(226).unwrap(), 2_260);
        assert!(FeeCalculator::new(u64::MAX).fee_for_size(2).is_err());
    }

    #[test]
    fn test_fee_validation() {
        let calc = FeeCalculator::default();
        assert!(calc.validate_fee(226, 226).is_ok());
        assert!(calc.validate_fee(225, 226).is_err());
        assert!(calc.validate_fee(MAX_FEE + 1, 226).is_err());
    }

    #[test]
    fn test_fee_policy() {
        assert_eq!(FeePolicy::Economy.rate(10), 5);
        assert_eq!(FeePolicy::Standard.rate(10), 10);
        assert_eq!(FeePolicy::Priority.rate(10), 20);
        assert_eq!(FeePolicy::Custom(3).rate(10), 3);
        assert_eq!(FeePolicy::Economy.rate(1), MIN_FEE_RATE);
        assert_eq!(FeePolicy::Custom(0).rate(10), MIN_FEE_RATE);
    }

    #[test]
    fn test_policy_serde() {
        let json = serde_json::to_string(&FeePolicy::Custom(7)).unwrap();
        assert_eq!(json, r#"{"custom":7}"#);
        let back: FeePolicy = serde_json::from_str(r#""priority""#).unwrap();
        assert_eq!(back, FeePolicy::Priority);
    }
}
