//! Server scoring and bans
//!
//! Connection failures open a short circuit after a few in a row. A server
//! caught serving data that fails verification is banned and only tried
//! once every other server has been exhausted.

use std::time::Duration;
use tokio::time::Instant;

/// Consecutive failures before a server's circuit opens
const OPEN_THRESHOLD: u32 = 3;
/// How long an open circuit keeps a server at the back of the queue
const OPEN_TIMEOUT: Duration = Duration::from_secs(60);
/// Weight of the newest sample in the latency average
const ALPHA: f64 = 0.3;

/// Observed behaviour of one server
#[derive(Debug, Clone, PartialEq)]
pub struct ServerHealth {
    server: String,
    successes: u64,
    failures: u64,
    consecutive_failures: u32,
    faults: u32,
    avg_latency_ms: Option<f64>,
    open_until: Option<Instant>,
    banned_until: Option<Instant>,
}

impl ServerHealth {
    fn new(server: String) -> Self {
        Self {
            server,
            successes: 0,
            failures: 0,
            consecutive_failures: 0,
            faults: 0,
            avg_latency_ms: None,
            open_until: None,
            banned_until: None,
        }
    }

    /// Server address
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Successful requests
    pub fn successes(&self) -> u64 {
        self.successes
    }

    /// Failed requests and connection attempts
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Times the server served data that failed verification
    pub fn faults(&self) -> u32 {
        self.faults
    }

    /// Moving average of request latency
    pub fn avg_latency(&self) -> Option<Duration> {
        self.avg_latency_ms.map(|ms| Duration::from_millis(ms as u64))
    }

    /// Whether the server is banned at `now`
    pub fn is_banned(&self, now: Instant) -> bool {
        self.banned_until.is_some_and(|until| now < until)
    }

    /// Whether the server's circuit is open at `now`
    pub fn is_open(&self, now: Instant) -> bool {
        self.open_until.is_some_and(|until| now < until)
    }

    /// Preference score; higher is tried first.
    ///
    /// A server with no latency sample is scored as if it had
    /// `unmeasured_latency_ms`, so trying a server never ranks it below
    /// servers nobody has tried.
    pub fn score(&self, unmeasured_latency_ms: f64) -> f64 {
        let latency_penalty = self.avg_latency_ms.unwrap_or(unmeasured_latency_ms) / 100.0;
        100.0 - 20.0 * self.consecutive_failures as f64 - 50.0 * self.faults as f64 - latency_penalty
    }
}

/// Health of every configured server
#[derive(Debug, Clone)]
pub struct ServerPool {
    servers: Vec<ServerHealth>,
    ban_duration: Duration,
}

impl ServerPool {
    /// Pool over servers in configured order
    pub fn new<I, S>(servers: I, ban_duration: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            servers: servers
                .into_iter()
                .map(|s| ServerHealth::new(s.into()))
                .collect(),
            ban_duration,
        }
    }

    /// Whether any server is configured
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Servers in the order they should be tried.
    ///
    /// Healthy servers by score first, then servers with an open circuit,
    /// then banned servers. Ties keep configured order.
    pub fn ranked(&self, now: Instant) -> Vec<String> {
        let tier = |h: &ServerHealth| {
            if h.is_banned(now) {
                2
            } else if h.is_open(now) {
                1
            } else {
                0
            }
        };
        let average = self.average_latency_ms();
        let mut order: Vec<&ServerHealth> = self.servers.iter().collect();
        order.sort_by(|a, b| {
            tier(a)
                .cmp(&tier(b))
                .then_with(|| b.score(average).total_cmp(&a.score(average)))
        });
        order.into_iter().map(|h| h.server.clone()).collect()
    }

    /// Mean latency over servers with a sample; zero when none has one
    fn average_latency_ms(&self) -> f64 {
        let measured: Vec<f64> = self.servers.iter().filter_map(|h| h.avg_latency_ms).collect();
        if measured.is_empty() {
            return 0.0;
        }
        measured.iter().sum::<f64>() / measured.len() as f64
    }

    /// Record a successful request
    pub fn record_success(&mut self, server: &str, latency: Duration) {
        if let Some(health) = self.get_mut(server) {
            health.successes += 1;
            health.consecutive_failures = 0;
            health.open_until = None;
            let sample = latency.as_millis() as f64;
            health.avg_latency_ms = Some(match health.avg_latency_ms {
                Some(avg) => ALPHA * sample + (1.0 - ALPHA) * avg,
                None => sample,
            });
        }
    }

    /// Record a failed request or connection attempt
    pub fn record_failure(&mut self, server: &str, now: Instant) {
        if let Some(health) = self.get_mut(server) {
            health.failures += 1;
            health.consecutive_failures += 1;
            if health.consecutive_failures >= OPEN_THRESHOLD {
                health.open_until = Some(now + OPEN_TIMEOUT);
                tracing::warn!(
                    server,
                    failures = health.consecutive_failures,
                    "Server circuit opened"
                );
            }
        }
    }

    /// Record data from `server` that failed verification; bans it
    pub fn record_fault(&mut self, server: &str, now: Instant) {
        let ban = self.ban_duration;
        if let Some(health) = self.get_mut(server) {
            health.faults += 1;
            health.banned_until = Some(now + ban);
        }
    }

    /// Health of one server
    pub fn health(&self, server: &str) -> Option<&ServerHealth> {
        self.servers.iter().find(|h| h.server == server)
    }

    /// Health of every server, in configured order
    pub fn snapshot(&self) -> Vec<ServerHealth> {
        self.servers.clone()
    }

    fn get_mut(&mut self, server: &str) -> Option<&mut ServerHealth> {
        self.servers.iter_mut().find(|h| h.server == server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ServerPool {
        ServerPool::new(["a", "b", "c"], Duration::from_secs(3600))
    }

    #[test]
    fn test_configured_order_on_ties() {
        assert_eq!(pool().ranked(Instant::now()), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_failure_demotes() {
        let mut pool = pool();
        let now = Instant::now();
        pool.record_failure("a", now);
        assert_eq!(pool.ranked(now), vec!["b", "c", "a"]);

        pool.record_success("a", Duration::from_millis(10));
        assert_eq!(pool.ranked(now)[0], "a");
    }

    #[test]
    fn test_latency_compared_against_pool_average() {
        let mut pool = pool();
        let now = Instant::now();
        pool.record_success("c", Duration::from_millis(40));
        assert_eq!(pool.ranked(now), vec!["a", "b", "c"]);

        // Slower than the average sorts behind untried servers
        pool.record_success("a", Duration::from_millis(400));
        assert_eq!(pool.ranked(now), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_banned_server_tried_last() {
        let mut pool = pool();
        let now = Instant::now();
        pool.record_fault("b", now);
        for _ in 0..OPEN_THRESHOLD {
            pool.record_failure("a", now);
        }
        assert!(pool.health("a").unwrap().is_open(now));
        assert_eq!(pool.ranked(now), vec!["c", "a", "b"]);

        let later = now + Duration::from_secs(7200);
        assert!(!pool.health("b").unwrap().is_banned(later));
        assert_eq!(pool.health("b").unwrap().faults(), 1);
    }

    #[test]
    fn test_latency_average() {
        let mut pool = pool();
        pool.record_success("a", Duration::from_millis(100));
        pool.record_success("a", Duration::from_millis(200));
        assert_eq!(pool.health("a").unwrap().avg_latency(), Some(Duration::from_millis(130)));
    }
}
