//! Coin selection for transaction building
//!
//! Greedy selection: confirmed outputs before unconfirmed ones, older
//! confirmations first, then larger values, with the outpoint as the final
//! tie-break so the same wallet state always yields the same selection.
//! Outputs pending reverification after a reorg are never selected.

use crate::fees::{estimate_size, FeeCalculator, DUST_THRESHOLD, P2PKH_OUTPUT_SIZE};
use crate::utxo::{Utxo, UtxoStatus};
use crate::{Error, Result};
use std::cmp::Ordering;

/// Coin selection result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionResult {
    /// Selected outputs, in selection order
    pub utxos: Vec<Utxo>,
    /// Total value of selected outputs
    pub total_value: u64,
    /// Fee paid, including any leftover folded in
    pub fee: u64,
    /// Change amount; zero when no change output is added
    pub change: u64,
    /// Estimated serialized size of the final transaction
    pub estimated_size: usize,
}

impl SelectionResult {
    /// Whether a change output is part of the transaction
    pub fn has_change(&self) -> bool {
        self.change > 0
    }
}

/// Greedy coin selector
#[derive(Debug, Clone, Copy)]
pub struct CoinSelector {
    fee: FeeCalculator,
    dust_threshold: u64,
}

impl CoinSelector {
    /// Create selector charging fees with `fee`
    pub fn new(fee: FeeCalculator) -> Self {
        Self {
            fee,
            dust_threshold: DUST_THRESHOLD,
        }
    }

    /// Override the dust threshold
    pub fn with_dust_threshold(mut self, dust_threshold: u64) -> Self {
        self.dust_threshold = dust_threshold;
        self
    }

    /// Dust threshold in use
    pub fn dust_threshold(&self) -> u64 {
        self.dust_threshold
    }

    /// Select outputs covering `target` plus fee.
    ///
    /// `output_sizes` are the serialized sizes of the payment outputs. A change
    /// output is priced in only when the leftover after paying for it exceeds
    /// the dust threshold; otherwise the leftover goes to the fee.
    ///
    /// `available` is never modified. On failure nothing is selected.
    pub fn select(
        &self,
        available: &[Utxo],
        output_sizes: &[usize],
        target: u64,
    ) -> Result<SelectionResult> {
        let mut candidates: Vec<&Utxo> = available
            .iter()
            .filter(|u| u.status.is_spendable())
            .collect();
        candidates.sort_by(|a, b| selection_order(a, b));

        tracing::debug!(
            "Selecting coins: target={}, candidates={}, rate={}",
            target,
            candidates.len(),
            self.fee.rate()
        );

        let mut with_change_sizes = output_sizes.to_vec();
        with_change_sizes.push(P2PKH_OUTPUT_SIZE);

        let mut selected: Vec<Utxo> = Vec::new();
        let mut input_sizes = Vec::new();
        let mut total = 0u64;

        for utxo in candidates {
            selected.push(utxo.clone());
            input_sizes.push(utxo.address.input_size_estimate());
            total = total
                .checked_add(utxo.value)
                .ok_or_else(|| Error::AmountOverflow("input sum".to_string()))?;

            let size_without_change = estimate_size(&input_sizes, output_sizes);
            let fee_without_change = self.fee.fee_for_size(size_without_change)?;
            let required = target
                .checked_add(fee_without_change)
                .ok_or_else(|| Error::AmountOverflow("target plus fee".to_string()))?;
            if total < required {
                continue;
            }

            let size_with_change = estimate_size(&input_sizes, &with_change_sizes);
            let fee_with_change = self.fee.fee_for_size(size_with_change)?;
            let change = total.saturating_sub(target).saturating_sub(fee_with_change);

            let result = if change > self.dust_threshold {
                SelectionResult {
                    utxos: selected,
                    total_value: total,
                    fee: fee_with_change,
                    change,
                    estimated_size: size_with_change,
                }
            } else {
                SelectionResult {
                    utxos: selected,
                    total_value: total,
                    fee: total - target,
                    change: 0,
                    estimated_size: size_without_change,
                }
            };

            tracing::info!(
                "Selected {} coins, total={}, fee={}, change={}",
                result.utxos.len(),
                result.total_value,
                result.fee,
                result.change
            );
            return Ok(result);
        }

        let fee_all = self.fee.fee_for_size(estimate_size(&input_sizes, output_sizes))?;
        Err(Error::InsufficientFunds {
            required: target.saturating_add(fee_all),
            available: total,
        })
    }

    /// Sum of outputs eligible for selection
    pub fn total_available(available: &[Utxo]) -> u64 {
        available
            .iter()
            .filter(|u| u.status.is_spendable())
            .map(|u| u.value)
            .fold(0u64, u64::saturating_add)
    }
}

/// Ordering used for greedy selection
pub fn selection_order(a: &Utxo, b: &Utxo) -> Ordering {
    fn rank(status: &UtxoStatus) -> (u8, u32) {
        match status {
            UtxoStatus::Confirmed { height } => (0, *height),
            UtxoStatus::Unconfirmed => (1, 0),
            UtxoStatus::PendingReverification { height } => (2, *height),
        }
    }

    rank(&a.status)
        .cmp(&rank(&b.status))
        .then_with(|| b.value.cmp(&a.value))
        .then_with(|| a.outpoint.cmp(&b.outpoint))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::hash::Hash256;
    use crate::transaction::OutPoint;

    fn coin(tag: u8, value: u64, status: UtxoStatus) -> Utxo {
        let address = Address::P2pkh([tag; 20]);
        Utxo {
            outpoint: OutPoint::new(Hash256::digest(&[tag]), 0),
            value,
            script_pubkey: address.script_pubkey(),
            address,
            address_id: None,
            path: None,
            status,
        }
    }

    fn create_test_coins() -> Vec<Utxo> {
        vec![
            coin(1, 100_000, UtxoStatus::Confirmed { height: 1000 }),
            coin(2, 500_000, UtxoStatus::Unconfirmed),
            coin(3, 250_000, UtxoStatus::Confirmed { height: 1000 }),
            coin(4, 1_000_000, UtxoStatus::Confirmed { height: 1003 }),
        ]
    }

    fn selector() -> CoinSelector {
        CoinSelector::new(FeeCalculator::new(10))
    }

    #[test]
    fn test_order_confirmation_then_value() {
        let mut coins = create_test_coins();
        coins.sort_by(selection_order);
        let values: Vec<u64> = coins.iter().map(|c| c.value).collect();
        assert_eq!(values, vec![250_000, 100_000, 1_000_000, 500_000]);
    }

    #[test]
    fn test_selects_with_change() {
        let result = selector()
            .select(&create_test_coins(), &[P2PKH_OUTPUT_SIZE], 300_000)
            .unwrap();

        // 250k alone cannot cover 300k; 250k + 100k can
        assert_eq!(result.utxos.len(), 2);
        assert_eq!(result.total_value, 350_000);
        // two inputs, two outputs: 8 + 1 + 296 + 1 + 68 = 374 bytes
        assert_eq!(result.estimated_size, 374);
        assert_eq!(result.fee, 3_740);
        assert_eq!(result.change, 350_000 - 300_000 - 3_740);
        assert_eq!(result.total_value, 300_000 + result.fee + result.change);
    }

    #[test]
    fn test_dust_leftover_folds_into_fee() {
        let coins = vec![coin(1, 100_000, UtxoStatus::Confirmed { height: 5 })];
        // one input, one output: 192 bytes, fee 1_920
        let target = 100_000 - 1_920 - 300;
        let result = selector().select(&coins, &[P2PKH_OUTPUT_SIZE], target).unwrap();
        assert!(!result.has_change());
        assert_eq!(result.fee, 100_000 - target);
        assert_eq!(result.estimated_size, 192);
    }

    #[test]
    fn test_exact_amount() {
        let coins = vec![coin(1, 100_000, UtxoStatus::Confirmed { height: 5 })];
        let result = selector().select(&coins, &[P2PKH_OUTPUT_SIZE], 98_080).unwrap();
        assert_eq!(result.fee, 1_920);
        assert_eq!(result.change, 0);
    }

    #[test]
    fn test_insufficient_funds() {
        let coins = create_test_coins();
        let before = coins.clone();
        let err = selector()
            .select(&coins, &[P2PKH_OUTPUT_SIZE], 5_000_000)
            .unwrap_err();
        match err {
            Error::InsufficientFunds { required, available } => {
                // The unconfirmed 500k never counts
                assert_eq!(available, 1_350_000);
                assert!(required > 5_000_000);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(coins, before);
    }

    #[test]
    fn test_pending_reverification_excluded() {
        let coins = vec![
            coin(1, 1_000_000, UtxoStatus::PendingReverification { height: 7 }),
            coin(2, 10_000, UtxoStatus::Confirmed { height: 3 }),
        ];
        assert_eq!(CoinSelector::total_available(&coins), 10_000);
        let err = selector().select(&coins, &[P2PKH_OUTPUT_SIZE], 50_000).unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { available: 10_000, .. }));
    }

    #[test]
    fn test_unconfirmed_never_selected() {
        let coins = vec![
            coin(1, 1_000_000, UtxoStatus::Unconfirmed),
            coin(2, 20_000, UtxoStatus::Confirmed { height: 3 }),
        ];
        assert_eq!(CoinSelector::total_available(&coins), 20_000);
        let err = selector().select(&coins, &[P2PKH_OUTPUT_SIZE], 50_000).unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { available: 20_000, .. }));

        let result = selector().select(&coins, &[P2PKH_OUTPUT_SIZE], 10_000).unwrap();
        assert!(result.utxos.iter().all(|u| u.status.is_spendable()));
    }

    #[test]
    fn test_deterministic_tie_break() {
        let a = coin(7, 50_000, UtxoStatus::Confirmed { height: 9 });
        let b = coin(8, 50_000, UtxoStatus::Confirmed { height: 9 });
        let first = selector().select(&[a.clone(), b.clone()], &[34], 10_000).unwrap();
        let second = selector().select(&[b, a], &[34], 10_000).unwrap();
        assert_eq!(first.utxos[0].outpoint, second.utxos[0].outpoint);
    }
}
