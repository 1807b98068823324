//! Client and retry configuration

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry configuration for network operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per operation, across servers
    pub max_attempts: u32,
    /// Initial backoff duration
    #[serde(with = "millis")]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[serde(with = "millis")]
    pub max_backoff: Duration,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (1-based), without jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Spread a delay by ±20% so clients do not retry in lockstep
pub fn jitter_duration(duration: Duration) -> Duration {
    let millis = duration.as_millis() as u64;
    if millis == 0 {
        return duration;
    }
    let jitter = rand::thread_rng().gen_range(0.8..1.2);
    let jittered = (millis as f64 * jitter) as u64;
    Duration::from_millis(jittered.max(1))
}

/// Network client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Servers as `host:port`, in preference order
    pub servers: Vec<String>,
    /// Deadline for a single request
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    /// Deadline for opening a connection and the version handshake
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// Retry and backoff policy
    pub retry: RetryConfig,
    /// Client name sent in `server.version`
    pub client_name: String,
    /// Protocol version requested in `server.version`
    pub protocol_version: String,
    /// How long a server caught serving invalid data stays banned
    #[serde(with = "millis")]
    pub ban_duration: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            client_name: concat!("spv-wallet/", env!("CARGO_PKG_VERSION")).to_string(),
            protocol_version: "1.4".to_string(),
            ban_duration: Duration::from_secs(3600),
        }
    }
}

impl ClientConfig {
    /// Configuration for a list of servers
    pub fn with_servers<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            ..Default::default()
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let retry = RetryConfig::default();
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(4), Duration::from_millis(800));
        assert_eq!(retry.backoff(20), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..100 {
            let d = jitter_duration(Duration::from_millis(1000));
            assert!(d >= Duration::from_millis(800) && d <= Duration::from_millis(1200));
        }
        assert_eq!(jitter_duration(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_config_json_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"servers":["a:50001"],"request_timeout":500}"#).unwrap();
        assert_eq!(config.servers, vec!["a:50001".to_string()]);
        assert_eq!(config.request_timeout, Duration::from_millis(500));
        assert_eq!(config.retry.max_attempts, 5);
    }
}
