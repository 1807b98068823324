//! Failover client over a set of Electrum-protocol servers
//!
//! Provides:
//! - One live connection to the best-scoring server
//! - Retry with exponential backoff, failing over to the next server
//! - Typed wrappers for the protocol methods a light wallet uses
//!
//! The client never validates content; callers verify headers and proofs
//! and report servers that lied through [`NetworkClient::report_fault`].

use crate::config::{jitter_duration, ClientConfig};
use crate::connection::{Connection, Transport};
use crate::health::{ServerHealth, ServerPool};
use crate::protocol::{methods, BlockHeaders, HeaderNotification, HistoryEntry, MerkleResponse};
use crate::subscription::Subscription;
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Boxed byte stream
pub type BoxedTransport = Box<dyn Transport>;

/// Opens byte streams to servers
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a stream to `server`
    async fn connect(&self, server: &str) -> Result<BoxedTransport>;
}

/// Plain TCP connector
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, server: &str) -> Result<BoxedTransport> {
        let stream = TcpStream::connect(server)
            .await
            .map_err(|e| Error::unavailable(server, format!("connect failed: {e}")))?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}

/// A value with the server that supplied it
#[derive(Debug, Clone, PartialEq)]
pub struct Served<T> {
    /// Server address
    pub server: String,
    /// Response
    pub value: T,
}

/// Network client
pub struct NetworkClient {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    pool: Mutex<ServerPool>,
    connection: tokio::sync::Mutex<Option<Arc<Connection>>>,
}

impl NetworkClient {
    /// Client that connects over TCP
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    /// Client with a custom connector
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let pool = ServerPool::new(config.servers.iter().cloned(), config.ban_duration);
        Self {
            config,
            connector,
            pool: Mutex::new(pool),
            connection: tokio::sync::Mutex::new(None),
        }
    }

    /// Configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Server of the live connection, if any
    pub async fn current_server(&self) -> Option<String> {
        self.connection
            .lock()
            .await
            .as_ref()
            .filter(|c| !c.is_closed())
            .map(|c| c.server().to_string())
    }

    /// Health of every configured server
    pub fn server_health(&self) -> Vec<ServerHealth> {
        self.pool.lock().snapshot()
    }

    /// Connect to the best available server
    pub async fn connect(&self) -> Result<String> {
        let connection = self.live_connection().await?;
        Ok(connection.server().to_string())
    }

    /// Close the live connection
    pub async fn disconnect(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            connection.close("disconnected");
            info!(server = %connection.server(), "Disconnected");
        }
    }

    /// Penalize a server that served data failing verification
    pub async fn report_fault(&self, server: &str, reason: &str) {
        warn!(server, reason, "Server served invalid data");
        self.pool.lock().record_fault(server, Instant::now());

        let mut current = self.connection.lock().await;
        if current.as_ref().is_some_and(|c| c.server() == server) {
            if let Some(connection) = current.take() {
                connection.close("server banned");
            }
        }
    }

    /// Send a request, retrying on other servers when one fails
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value> {
        Ok(self.request_served(method, params).await?.value)
    }

    /// Like [`NetworkClient::request`], also naming the server that answered
    pub async fn request_served(&self, method: &str, params: Vec<Value>) -> Result<Served<Value>> {
        let deadline = self.config.request_timeout;
        self.with_retry(method, |connection| {
            let params = params.clone();
            async move {
                let value = connection.request(method, params, deadline).await?;
                Ok(Served {
                    server: connection.server().to_string(),
                    value,
                })
            }
        })
        .await
    }

    /// Subscribe on the live connection.
    ///
    /// Returns the initial result with the notification stream. The stream
    /// ends if the connection is lost; resubscribe to continue.
    pub async fn subscribe(&self, method: &str, params: Vec<Value>) -> Result<(Value, Subscription)> {
        let deadline = self.config.request_timeout;
        self.with_retry(method, |connection| {
            let params = params.clone();
            async move { connection.subscribe(method, params, deadline).await }
        })
        .await
    }

    /// Keep-alive
    pub async fn ping(&self) -> Result<()> {
        self.request(methods::SERVER_PING, Vec::new()).await.map(|_| ())
    }

    /// Current tip and a stream of new tips
    pub async fn headers_subscribe(&self) -> Result<(HeaderNotification, Subscription)> {
        let (value, subscription) = self.subscribe(methods::HEADERS_SUBSCRIBE, Vec::new()).await?;
        Ok((decode(methods::HEADERS_SUBSCRIBE, value)?, subscription))
    }

    /// Up to `count` raw headers starting at `start_height`
    pub async fn block_headers(&self, start_height: u32, count: u32) -> Result<Served<BlockHeaders>> {
        self.typed(methods::BLOCK_HEADERS, vec![json!(start_height), json!(count)])
            .await
    }

    /// History of a script hash
    pub async fn get_history(&self, script_hash: &str) -> Result<Served<Vec<HistoryEntry>>> {
        self.typed(methods::GET_HISTORY, vec![json!(script_hash)]).await
    }

    /// Status hash of a script hash and a stream of changes
    pub async fn scripthash_subscribe(
        &self,
        script_hash: &str,
    ) -> Result<(Option<String>, Subscription)> {
        let (value, subscription) = self
            .subscribe(methods::SCRIPTHASH_SUBSCRIBE, vec![json!(script_hash)])
            .await?;
        Ok((decode(methods::SCRIPTHASH_SUBSCRIBE, value)?, subscription))
    }

    /// Raw transaction hex
    pub async fn get_transaction(&self, txid: &str) -> Result<Served<String>> {
        self.typed(methods::GET_TRANSACTION, vec![json!(txid)]).await
    }

    /// Merkle branch for a transaction mined at `height`
    pub async fn get_merkle(&self, txid: &str, height: u32) -> Result<Served<MerkleResponse>> {
        self.typed(methods::GET_MERKLE, vec![json!(txid), json!(height)])
            .await
    }

    /// Relay a raw transaction; returns the txid the server reports
    pub async fn broadcast(&self, raw_tx_hex: &str) -> Result<String> {
        let value = self
            .request(methods::BROADCAST, vec![json!(raw_tx_hex)])
            .await?;
        decode(methods::BROADCAST, value)
    }

    async fn typed<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<Served<T>> {
        let served = self.request_served(method, params).await?;
        Ok(Served {
            value: decode(method, served.value)?,
            server: served.server,
        })
    }

    async fn with_retry<T, F, Fut>(&self, method: &str, mut operation: F) -> Result<T>
    where
        F: FnMut(Arc<Connection>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let retry = &self.config.retry;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match self.live_connection().await {
                Ok(connection) => {
                    let started = Instant::now();
                    let result = operation(connection.clone()).await;
                    match &result {
                        Ok(_) => self
                            .pool
                            .lock()
                            .record_success(connection.server(), started.elapsed()),
                        Err(Error::ServerUnavailable { .. }) => {
                            self.pool
                                .lock()
                                .record_failure(connection.server(), Instant::now());
                            self.drop_connection(&connection).await;
                        }
                        Err(_) => {}
                    }
                    result
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                    let backoff = retry.backoff(attempt);
                    warn!(
                        method,
                        attempt,
                        error = %e,
                        "Request failed, retrying in {:?}",
                        backoff
                    );
                    tokio::time::sleep(jitter_duration(backoff)).await;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(method, attempts = attempt, error = %e, "Request failed");
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn live_connection(&self) -> Result<Arc<Connection>> {
        let mut current = self.connection.lock().await;
        if let Some(connection) = current.as_ref() {
            if !connection.is_closed() {
                return Ok(connection.clone());
            }
        }

        let connection = Arc::new(self.connect_best().await?);
        *current = Some(connection.clone());
        Ok(connection)
    }

    async fn drop_connection(&self, failed: &Arc<Connection>) {
        let mut current = self.connection.lock().await;
        if current.as_ref().is_some_and(|c| Arc::ptr_eq(c, failed)) {
            if let Some(connection) = current.take() {
                connection.close("request failed");
            }
        }
    }

    async fn connect_best(&self) -> Result<Connection> {
        let servers = self.pool.lock().ranked(Instant::now());
        if servers.is_empty() {
            return Err(Error::NoServers);
        }

        let mut last_error = Error::NoServers;
        for server in servers {
            match self.open(&server).await {
                Ok(connection) => {
                    info!(server = %server, "Connected");
                    return Ok(connection);
                }
                Err(e) => {
                    warn!(server = %server, error = %e, "Connection attempt failed");
                    self.pool.lock().record_failure(&server, Instant::now());
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    async fn open(&self, server: &str) -> Result<Connection> {
        let deadline = self.config.connect_timeout;
        let io = tokio::time::timeout(deadline, self.connector.connect(server))
            .await
            .map_err(|_| Error::unavailable(server, "connect timed out"))??;
        let connection = Connection::spawn(server, io);

        let version = connection
            .request(
                methods::SERVER_VERSION,
                vec![
                    json!(self.config.client_name),
                    json!(self.config.protocol_version),
                ],
                deadline,
            )
            .await
            .map_err(|e| match e {
                Error::Rpc { message, .. } => {
                    Error::unavailable(server, format!("version rejected: {message}"))
                }
                other => other,
            })?;
        debug!(server, version = %version, "Handshake complete");
        Ok(connection)
    }
}

impl std::fmt::Debug for NetworkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkClient")
            .field("servers", &self.config.servers)
            .finish()
    }
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::Protocol(format!("unexpected {method} result: {e}")))
}
