//! Sync progress, warnings and status reporting

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use spv_core::Hash256;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sync stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    /// Reaching a server
    Connecting,
    /// Downloading and verifying headers
    Headers,
    /// Fetching address histories
    Histories,
    /// Checking inclusion proofs
    Verifying,
    /// Up to date
    Complete,
}

impl SyncStage {
    /// Get display name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "Connecting",
            Self::Headers => "Fetching Headers",
            Self::Histories => "Fetching Histories",
            Self::Verifying => "Verifying Transactions",
            Self::Complete => "Synced",
        }
    }
}

/// Non-fatal problem met during a sync round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncWarning {
    /// A history entry kept failing verification and was dropped for this round
    InclusionFailed {
        /// Address script hash
        script_hash: String,
        /// Transaction id
        txid: Hash256,
        /// Height the server claimed
        height: u32,
        /// Attempts made
        attempts: u32,
    },
    /// An address could not be synced
    AddressUnavailable {
        /// Address script hash
        script_hash: String,
        /// Last error
        reason: String,
    },
    /// Headers could not be fetched or did not connect
    HeadersUnavailable {
        /// Last error
        reason: String,
    },
    /// A server sent headers that failed validation
    HeadersRejected {
        /// Server address
        server: String,
        /// Validation failure
        reason: String,
    },
}

impl fmt::Display for SyncWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncWarning::InclusionFailed {
                script_hash,
                txid,
                height,
                attempts,
            } => write!(
                f,
                "{txid} at height {height} failed verification {attempts} times (script hash {script_hash})"
            ),
            SyncWarning::AddressUnavailable {
                script_hash,
                reason,
            } => write!(f, "could not sync script hash {script_hash}: {reason}"),
            SyncWarning::HeadersUnavailable { reason } => {
                write!(f, "could not fetch headers: {reason}")
            }
            SyncWarning::HeadersRejected { server, reason } => {
                write!(f, "rejected headers from {server}: {reason}")
            }
        }
    }
}

/// Point-in-time sync status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Height of the active header chain
    pub headers_height: u32,
    /// Chain height at which every address was last fully verified
    pub verified_height: u32,
    /// Addresses still waiting for a successful sync
    pub pending_addresses: usize,
    /// No server could be reached in the last round
    pub stalled: bool,
}

/// Shared progress tracker
#[derive(Debug, Clone)]
pub struct SyncProgress {
    inner: Arc<RwLock<ProgressInner>>,
}

#[derive(Debug, Clone)]
struct ProgressInner {
    stage: SyncStage,
    status: SyncStatus,
    target_height: u32,
    addresses_total: usize,
    addresses_done: usize,
    warnings: Vec<SyncWarning>,
    started: Option<Instant>,
    last_round: Option<Duration>,
}

impl SyncProgress {
    /// Create new progress tracker
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ProgressInner {
                stage: SyncStage::Connecting,
                status: SyncStatus::default(),
                target_height: 0,
                addresses_total: 0,
                addresses_done: 0,
                warnings: Vec::new(),
                started: None,
                last_round: None,
            })),
        }
    }

    /// Tracker resuming from a persisted verified height
    pub fn resume(headers_height: u32, verified_height: u32) -> Self {
        let progress = Self::new();
        {
            let mut inner = progress.inner.write();
            inner.status.headers_height = headers_height;
            inner.status.verified_height = verified_height;
        }
        progress
    }

    /// Begin a round; clears warnings of the previous one
    pub fn start(&self) {
        let mut inner = self.inner.write();
        inner.stage = SyncStage::Connecting;
        inner.warnings.clear();
        inner.status.stalled = false;
        inner.status.pending_addresses = 0;
        inner.addresses_done = 0;
        inner.addresses_total = 0;
        inner.started = Some(Instant::now());
    }

    /// Finish a round
    pub fn finish(&self, verified_height: Option<u32>) {
        let mut inner = self.inner.write();
        if let Some(height) = verified_height {
            inner.status.verified_height = height;
        }
        inner.stage = SyncStage::Complete;
        inner.last_round = inner.started.take().map(|s| s.elapsed());
    }

    /// Set stage
    pub fn set_stage(&self, stage: SyncStage) {
        self.inner.write().stage = stage;
    }

    /// Record the local header height
    pub fn set_headers_height(&self, height: u32) {
        self.inner.write().status.headers_height = height;
    }

    /// Record the server-reported tip height
    pub fn set_target(&self, height: u32) {
        self.inner.write().target_height = height;
    }

    /// Queue more addresses for this round
    pub fn add_pending_addresses(&self, count: usize) {
        let mut inner = self.inner.write();
        inner.status.pending_addresses += count;
        inner.addresses_total += count;
    }

    /// One address finished successfully
    pub fn address_done(&self) {
        let mut inner = self.inner.write();
        inner.status.pending_addresses = inner.status.pending_addresses.saturating_sub(1);
        inner.addresses_done += 1;
    }

    /// Mark whether the round stalled on unreachable servers
    pub fn set_stalled(&self, stalled: bool) {
        self.inner.write().status.stalled = stalled;
    }

    /// Record a warning
    pub fn warn(&self, warning: SyncWarning) {
        tracing::warn!("Sync warning: {}", warning);
        self.inner.write().warnings.push(warning);
    }

    /// Current stage
    pub fn stage(&self) -> SyncStage {
        self.inner.read().stage
    }

    /// Current status
    pub fn status(&self) -> SyncStatus {
        self.inner.read().status
    }

    /// Warnings of the current or last round
    pub fn warnings(&self) -> Vec<SyncWarning> {
        self.inner.read().warnings.clone()
    }

    /// Server-reported tip height
    pub fn target_height(&self) -> u32 {
        self.inner.read().target_height
    }

    /// Fraction of address work done this round, 0.0 to 1.0
    pub fn address_fraction(&self) -> f64 {
        let inner = self.inner.read();
        if inner.addresses_total == 0 {
            return 1.0;
        }
        inner.addresses_done as f64 / inner.addresses_total as f64
    }

    /// Duration of the last completed round
    pub fn last_round(&self) -> Option<Duration> {
        self.inner.read().last_round
    }
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_lifecycle() {
        let progress = SyncProgress::resume(100, 90);
        progress.start();
        progress.add_pending_addresses(4);
        progress.address_done();
        progress.warn(SyncWarning::HeadersUnavailable {
            reason: "timeout".into(),
        });
        assert_eq!(progress.status().pending_addresses, 3);
        assert_eq!(progress.address_fraction(), 0.25);
        assert_eq!(progress.warnings().len(), 1);

        progress.finish(Some(120));
        assert_eq!(progress.stage(), SyncStage::Complete);
        assert_eq!(progress.status().verified_height, 120);
        assert!(progress.last_round().is_some());

        progress.start();
        assert!(progress.warnings().is_empty());
    }

    #[test]
    fn test_warning_display() {
        let warning = SyncWarning::InclusionFailed {
            script_hash: "ab".into(),
            txid: Hash256::ZERO,
            height: 7,
            attempts: 3,
        };
        assert!(warning.to_string().contains("height 7"));
        assert_eq!(SyncStage::Headers.name(), "Fetching Headers");
    }
}
