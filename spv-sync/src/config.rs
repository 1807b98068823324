//! Synchronizer configuration

use serde::{Deserialize, Serialize};
use spv_core::{DEFAULT_CHANGE_GAP_LIMIT, DEFAULT_GAP_LIMIT};
use std::time::Duration;

/// Sync configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Headers requested per call
    pub header_batch_size: u32,
    /// Address histories synced at once
    pub max_concurrent_addresses: usize,
    /// Attempts at verifying one history entry before it becomes a warning
    pub verify_attempts: u32,
    /// Wait before re-querying an address whose entry failed verification
    #[serde(with = "millis")]
    pub retry_delay: Duration,
    /// Unused receiving addresses watched past the last used one
    pub gap_limit: u32,
    /// Unused change addresses watched past the last used one
    pub change_gap_limit: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            header_batch_size: 2016,
            max_concurrent_addresses: 8,
            verify_attempts: 3,
            retry_delay: Duration::from_secs(2),
            gap_limit: DEFAULT_GAP_LIMIT,
            change_gap_limit: DEFAULT_CHANGE_GAP_LIMIT,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
