//! Proof-of-work arithmetic
//!
//! Compact target encoding, pow hashing, block work and the difficulty
//! rules: the windowed retarget and Kimoto Gravity Well.

use crate::header::BlockHeader;
use crate::u256::U256;
use crate::{Error, Result};
use spv_core::Hash256;
use spv_params::{ConsensusParams, PowAlgorithm};

/// scrypt cost parameter log2(N) for N = 1024
const SCRYPT_LOG_N: u8 = 10;

/// Expand a compact target.
///
/// Negative or overflowing encodings are rejected.
pub fn bits_to_target(bits: u32) -> Result<U256> {
    let exponent = bits >> 24;
    let mantissa = bits & 0x007f_ffff;

    if mantissa != 0 && bits & 0x0080_0000 != 0 {
        return Err(Error::InvalidProofOfWork(format!("negative target {bits:#010x}")));
    }
    let overflow = mantissa != 0
        && (exponent > 34
            || (mantissa > 0xff && exponent > 33)
            || (mantissa > 0xffff && exponent > 32));
    if overflow {
        return Err(Error::InvalidProofOfWork(format!("target {bits:#010x} overflows")));
    }

    let target = if exponent <= 3 {
        U256::from_u64((mantissa >> (8 * (3 - exponent))) as u64)
    } else {
        U256::from_u64(mantissa as u64).shl_bits(8 * (exponent - 3))
    };
    Ok(target)
}

/// Compress a target; the mantissa's sign bit is kept clear
pub fn target_to_bits(target: U256) -> u32 {
    let mut size = (target.bits() + 7) / 8;
    let mut compact = if size <= 3 {
        (target.low_u64() << (8 * (3 - size))) as u32
    } else {
        target.shr_bits(8 * (size - 3)).low_u64() as u32
    };
    if compact & 0x0080_0000 != 0 {
        compact >>= 8;
        size += 1;
    }
    compact | (size << 24)
}

/// Expected hashes for a block at `target`: 2^256 / (target + 1)
pub fn block_work(target: U256) -> U256 {
    match target.checked_add(U256::ONE) {
        // (2^256 - target - 1) / (target + 1) + 1 == 2^256 / (target + 1)
        Some(denominator) => (!target)
            .checked_div(denominator)
            .unwrap_or(U256::ZERO)
            .saturating_add(U256::ONE),
        None => U256::ONE,
    }
}

/// Hash a header is measured against its target with
pub fn pow_hash(header: &BlockHeader, algorithm: PowAlgorithm) -> Result<Hash256> {
    let bytes = header.encode();
    match algorithm {
        PowAlgorithm::Sha256d => Ok(Hash256::digest(&bytes)),
        PowAlgorithm::Scrypt => {
            let params = scrypt::Params::new(SCRYPT_LOG_N, 1, 1, 32)
                .map_err(|e| Error::InvalidProofOfWork(format!("scrypt parameters: {e}")))?;
            let mut out = [0u8; 32];
            scrypt::scrypt(&bytes, &bytes, &params, &mut out)
                .map_err(|e| Error::InvalidProofOfWork(format!("scrypt: {e}")))?;
            Ok(Hash256::from_bytes(out))
        }
    }
}

/// Check a header's hash against its own compact target and the pow limit.
///
/// The hash function and limit come from the header's version when the
/// chain selects algorithms by version bits. Returns the expanded target.
pub fn check_proof_of_work(header: &BlockHeader, params: &ConsensusParams) -> Result<U256> {
    let rule = params.pow_rule(header.version);
    let target = bits_to_target(header.bits)?;
    let limit = bits_to_target(rule.pow_limit_bits)?;
    if target.is_zero() || target > limit {
        return Err(Error::InvalidProofOfWork(format!(
            "target {:#010x} outside (0, pow limit]",
            header.bits
        )));
    }

    let hash = pow_hash(header, rule.algorithm)?;
    if U256::from_le_bytes(hash.as_bytes()) > target {
        return Err(Error::InvalidProofOfWork(format!(
            "header {} pow hash {} above target",
            header.hash(),
            hash
        )));
    }
    Ok(target)
}

/// Compact target required after a retarget window.
///
/// `actual_timespan` is the time between the window's first and last
/// headers; it is clamped to a factor of four either way.
pub fn next_bits(last_bits: u32, actual_timespan: i64, params: &ConsensusParams) -> Result<u32> {
    let target_timespan = params.target_timespan as i64;
    let clamped = actual_timespan.clamp(target_timespan / 4, target_timespan * 4) as u64;

    let limit = bits_to_target(params.pow_limit_bits)?;
    let last = bits_to_target(last_bits)?;
    let timespan = target_timespan as u64;
    // Easy targets overflow the product; dividing first loses less than one
    // mantissa step. Still out of range only above any 256-bit limit.
    let next = scale_target(last, clamped, timespan).unwrap_or(limit);

    Ok(target_to_bits(if next > limit { limit } else { next }))
}

/// Scale `target` by `numerator / denominator`, dividing first when the
/// product would not fit
fn scale_target(target: U256, numerator: u64, denominator: u64) -> Option<U256> {
    match target.checked_mul_u64(numerator) {
        Some(product) => product.checked_div_u64(denominator),
        None => target
            .checked_div_u64(denominator)
            .and_then(|t| t.checked_mul_u64(numerator)),
    }
}

/// Move `average` toward `sample` by a `count`th of the gap, truncating
/// toward zero either way
fn running_mean(average: U256, sample: U256, count: u64) -> U256 {
    if sample >= average {
        let step = sample
            .checked_sub(average)
            .and_then(|gap| gap.checked_div_u64(count))
            .unwrap_or(U256::ZERO);
        average.saturating_add(step)
    } else {
        let step = average
            .checked_sub(sample)
            .and_then(|gap| gap.checked_div_u64(count))
            .unwrap_or(U256::ZERO);
        average.checked_sub(step).unwrap_or(U256::ZERO)
    }
}

/// Compact target from the Kimoto Gravity Well rule.
///
/// `window` holds `(time, bits)` of the parent and its ancestors, newest
/// first. Returns `None` when the window runs out before the rule settles
/// and `window_complete` is false, i.e. the history needed lies below the
/// chain root.
pub fn kgw_next_bits(
    window: &[(u32, u32)],
    window_complete: bool,
    spacing: u32,
    past_blocks_min: u32,
    params: &ConsensusParams,
) -> Result<Option<u32>> {
    let limit = bits_to_target(params.pow_limit_bits)?;
    let Some(&(last_time, _)) = window.first() else {
        return Ok(Some(params.pow_limit_bits));
    };

    let mut average = U256::ZERO;
    let mut actual_seconds = 0u64;
    let mut target_seconds = 0u64;
    let mut settled = false;
    for (i, &(time, bits)) in window.iter().enumerate() {
        let mass = i as u64 + 1;
        let target = bits_to_target(bits)?;
        average = if mass == 1 {
            target
        } else {
            running_mean(average, target, mass)
        };

        actual_seconds = (last_time as i64 - time as i64).max(0) as u64;
        target_seconds = spacing as u64 * mass;
        let ratio = if actual_seconds != 0 && target_seconds != 0 {
            target_seconds as f64 / actual_seconds as f64
        } else {
            1.0
        };
        let horizon = 1.0 + 0.7084 * (mass as f64 / 144.0).powf(-1.228);
        if mass >= past_blocks_min as u64 && (ratio <= 1.0 / horizon || ratio >= horizon) {
            settled = true;
            break;
        }
    }
    if !settled && !window_complete {
        return Ok(None);
    }

    let next = if actual_seconds != 0 && target_seconds != 0 {
        scale_target(average, actual_seconds, target_seconds).unwrap_or(limit)
    } else {
        average
    };
    Ok(Some(target_to_bits(if next > limit { limit } else { next })))
}

/// Median of a set of timestamps
pub fn median_time(times: &[u32]) -> u32 {
    let mut sorted = times.to_vec();
    sorted.sort_unstable();
    sorted.get(sorted.len() / 2).copied().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::tests::LTC_GENESIS;

    fn bitcoin_like() -> ConsensusParams {
        ConsensusParams {
            pow_limit_bits: 0x1d00_ffff,
            target_timespan: 14 * 24 * 60 * 60,
            target_spacing: 600,
            ..ConsensusParams::mainnet()
        }
    }

    #[test]
    fn test_compact_roundtrip() {
        for bits in [0x1d00_ffff, 0x1e0f_fff0, 0x207f_ffff, 0x1b04_64be, 0x0300_8000] {
            let target = bits_to_target(bits).unwrap();
            assert_eq!(target_to_bits(target), bits, "bits {bits:#x}");
        }
    }

    #[test]
    fn test_compact_rejects_negative_and_overflow() {
        assert!(bits_to_target(0x0480_0001).is_err());
        assert!(bits_to_target(0xff12_3456).is_err());
        assert!(bits_to_target(0x2301_0000).is_err());
    }

    #[test]
    fn test_block_work() {
        let work = block_work(bits_to_target(0x1d00_ffff).unwrap());
        assert_eq!(work, U256::from_u64(4_295_032_833));
        assert_eq!(block_work(bits_to_target(0x207f_ffff).unwrap()), U256::from_u64(2));
    }

    #[test]
    fn test_scrypt_genesis_meets_target() {
        let header = BlockHeader::from_hex(LTC_GENESIS).unwrap();
        let hash = pow_hash(&header, PowAlgorithm::Scrypt).unwrap();
        assert_eq!(
            hash.to_string(),
            "0000050c34a64b415b6b15b37f2216634b5b1669cb9a2e38d76f7213b0671e00"
        );
        assert!(check_proof_of_work(&header, &ConsensusParams::mainnet()).is_ok());
        // The block hash itself would not meet the target
        let sha = ConsensusParams::mainnet().with_pow_algorithm(PowAlgorithm::Sha256d);
        assert!(check_proof_of_work(&header, &sha).is_err());
    }

    #[test]
    fn test_target_above_limit_rejected() {
        let mut header = BlockHeader::from_hex(LTC_GENESIS).unwrap();
        header.bits = 0x1f00_ffff;
        assert!(matches!(
            check_proof_of_work(&header, &ConsensusParams::mainnet()),
            Err(Error::InvalidProofOfWork(_))
        ));
    }

    #[test]
    fn test_retarget_vectors() {
        let params = bitcoin_like();
        // Bitcoin blocks 30240..32255
        assert_eq!(
            next_bits(0x1d00_ffff, 1_262_152_739 - 1_261_130_161, &params).unwrap(),
            0x1d00_d86a
        );
        // Clamped at the pow limit
        assert_eq!(
            next_bits(0x1d00_ffff, 1_233_061_996 - 1_231_006_505, &params).unwrap(),
            0x1d00_ffff
        );
        // Lower clamp of a quarter timespan
        assert_eq!(
            next_bits(0x1c05_a3f4, 1_279_297_671 - 1_279_008_237, &params).unwrap(),
            0x1c01_68fd
        );
        // Upper clamp of four timespans
        assert_eq!(
            next_bits(0x1c38_7f6f, 1_269_211_443 - 1_263_163_443, &params).unwrap(),
            0x1d00_e1fd
        );
    }

    #[test]
    fn test_retarget_near_pow_limit() {
        let params = ConsensusParams {
            target_timespan: 600,
            target_spacing: 150,
            ..ConsensusParams::regtest()
        };
        // 0x7fffff << 232 times 225 does not fit in 256 bits
        assert_eq!(next_bits(0x207f_ffff, 225, &params).unwrap(), 0x202f_ffff);
        // Slower than planned stays at the limit
        assert_eq!(next_bits(0x207f_ffff, 2_400, &params).unwrap(), 0x207f_ffff);
    }

    fn steady_window(len: u32, bits: u32, step: u32) -> Vec<(u32, u32)> {
        (0..len).map(|i| (1_000_000 - i * step, bits)).collect()
    }

    #[test]
    fn test_kgw_on_schedule() {
        let params = ConsensusParams::mainnet();
        let window = steady_window(10, 0x1d00_ffff, 300);
        // Ten blocks span nine intervals, so the target eases by a tenth
        assert_eq!(
            kgw_next_bits(&window, true, 300, 2, &params).unwrap(),
            Some(0x1d00_e665)
        );
        // The rule never settled, so history below the window matters
        assert_eq!(kgw_next_bits(&window, false, 300, 2, &params).unwrap(), None);
    }

    #[test]
    fn test_kgw_fast_blocks_settle_early() {
        let params = ConsensusParams::mainnet();
        let window = steady_window(10, 0x1d00_ffff, 1);
        let expected = target_to_bits(
            bits_to_target(0x1d00_ffff)
                .unwrap()
                .checked_div_u64(600)
                .unwrap(),
        );
        assert_eq!(kgw_next_bits(&window, false, 300, 2, &params).unwrap(), Some(expected));
    }

    #[test]
    fn test_kgw_capped_at_pow_limit() {
        let params = ConsensusParams::mainnet();
        let window = steady_window(20, params.pow_limit_bits, 3_000);
        assert_eq!(
            kgw_next_bits(&window, true, 300, 2, &params).unwrap(),
            Some(params.pow_limit_bits)
        );
        assert_eq!(
            kgw_next_bits(&[], true, 300, 2, &params).unwrap(),
            Some(params.pow_limit_bits)
        );
    }

    #[test]
    fn test_version_bits_pick_hash_function() {
        let mut header = BlockHeader::from_hex(LTC_GENESIS).unwrap();
        let params = ConsensusParams::mainnet().with_version_bit_algorithms(
            7 << 9,
            vec![spv_params::AlgorithmSlot {
                version_bits: 1 << 9,
                algorithm: PowAlgorithm::Sha256d,
                pow_limit_bits: 0x1e0f_fff0,
            }],
        );
        assert!(check_proof_of_work(&header, &params).is_ok());
        // Same bytes but flagged as a double-SHA256 block
        header.version |= 1 << 9;
        let hash = pow_hash(&header, PowAlgorithm::Scrypt).unwrap();
        let sha = pow_hash(&header, PowAlgorithm::Sha256d).unwrap();
        let target = bits_to_target(header.bits).unwrap();
        assert_eq!(
            check_proof_of_work(&header, &params).is_ok(),
            U256::from_le_bytes(sha.as_bytes()) <= target
        );
        assert_ne!(hash, sha);
    }

    #[test]
    fn test_median_time() {
        assert_eq!(median_time(&[5, 1, 3]), 3);
        assert_eq!(median_time(&[4, 1, 3, 2]), 3);
        assert_eq!(median_time(&[]), 0);
    }
}
