//! Electrum-protocol network client
//!
//! Line-delimited JSON-RPC connections with request correlation,
//! subscriptions and deadlines, plus a failover client that scores servers
//! and retries with exponential backoff.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod health;
pub mod protocol;
pub mod subscription;

pub use client::{BoxedTransport, Connector, NetworkClient, Served, TcpConnector};
pub use config::{jitter_duration, ClientConfig, RetryConfig};
pub use connection::{Connection, Transport};
pub use error::{Error, Result};
pub use health::{ServerHealth, ServerPool};
pub use protocol::{methods, BlockHeaders, HeaderNotification, HistoryEntry, MerkleResponse};
pub use subscription::{Notification, Subscription};
