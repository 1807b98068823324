//! Server operations the synchronizer depends on
//!
//! [`ServerApi`] is the seam between sync logic and the transport. The
//! production implementation is [`NetworkClient`]; tests substitute an
//! in-memory server.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use spv_net::{
    methods, BlockHeaders, HistoryEntry, MerkleResponse, NetworkClient, Notification, Result,
    Served,
};

/// Push event from a server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// The server's chain tip moved
    NewTip {
        /// New tip height
        height: u32,
    },
    /// A watched script hash saw activity
    AddressActivity {
        /// Script hash
        script_hash: String,
    },
}

/// Stream of push events; ends when the connection is lost
pub type ServerEvents = BoxStream<'static, ServerEvent>;

/// Remote operations used during sync
#[async_trait]
pub trait ServerApi: Send + Sync {
    /// Up to `count` headers from `start_height`
    async fn block_headers(&self, start_height: u32, count: u32) -> Result<Served<BlockHeaders>>;

    /// History of a script hash
    async fn get_history(&self, script_hash: &str) -> Result<Served<Vec<HistoryEntry>>>;

    /// Merkle branch for `txid` at `height`
    async fn get_merkle(&self, txid: &str, height: u32) -> Result<Served<MerkleResponse>>;

    /// Raw transaction hex
    async fn get_transaction(&self, txid: &str) -> Result<Served<String>>;

    /// Relay a raw transaction
    async fn broadcast(&self, raw_tx_hex: &str) -> Result<String>;

    /// Penalize a server whose data failed verification
    async fn report_fault(&self, server: &str, reason: &str);

    /// Subscribe to new tips and to activity on `script_hashes`
    async fn subscribe(&self, script_hashes: &[String]) -> Result<ServerEvents>;
}

#[async_trait]
impl ServerApi for NetworkClient {
    async fn block_headers(&self, start_height: u32, count: u32) -> Result<Served<BlockHeaders>> {
        NetworkClient::block_headers(self, start_height, count).await
    }

    async fn get_history(&self, script_hash: &str) -> Result<Served<Vec<HistoryEntry>>> {
        NetworkClient::get_history(self, script_hash).await
    }

    async fn get_merkle(&self, txid: &str, height: u32) -> Result<Served<MerkleResponse>> {
        NetworkClient::get_merkle(self, txid, height).await
    }

    async fn get_transaction(&self, txid: &str) -> Result<Served<String>> {
        NetworkClient::get_transaction(self, txid).await
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<String> {
        NetworkClient::broadcast(self, raw_tx_hex).await
    }

    async fn report_fault(&self, server: &str, reason: &str) {
        NetworkClient::report_fault(self, server, reason).await
    }

    async fn subscribe(&self, script_hashes: &[String]) -> Result<ServerEvents> {
        let (_, tips) = self.headers_subscribe().await?;
        let mut streams = vec![tips.filter_map(|n| async move { to_event(n) }).boxed()];
        for script_hash in script_hashes {
            let (_, activity) = self.scripthash_subscribe(script_hash).await?;
            streams.push(activity.filter_map(|n| async move { to_event(n) }).boxed());
        }
        Ok(stream::select_all(streams).boxed())
    }
}

fn to_event(notification: Notification) -> Option<ServerEvent> {
    let first = notification.params.into_iter().next()?;
    match notification.method.as_str() {
        methods::HEADERS_SUBSCRIBE => {
            let height = first.get("height")?.as_u64()?;
            Some(ServerEvent::NewTip {
                height: u32::try_from(height).ok()?,
            })
        }
        methods::SCRIPTHASH_SUBSCRIBE => Some(ServerEvent::AddressActivity {
            script_hash: first.as_str()?.to_string(),
        }),
        _ => None,
    }
}
