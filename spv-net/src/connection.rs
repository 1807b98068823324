//! One JSON-RPC connection to one server
//!
//! A reader task routes responses to waiting requests by id and
//! notifications to subscriptions; a writer task serializes outgoing
//! lines. When either side fails, every pending request resolves with
//! [`Error::ServerUnavailable`] and every subscription stream ends.

use crate::protocol::{encode_request, parse_line, Incoming};
use crate::subscription::{Notification, Subscription, SubscriptionKey};
use crate::{Error, Result};
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

/// Longest line accepted from a server: a full 2016-header batch is about
/// 330 KB of hex, raw transactions stay well under this
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Byte stream a connection runs over
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Transport for T {}

type Subscribers = Vec<(u64, mpsc::UnboundedSender<Notification>)>;

#[derive(Default)]
struct State {
    pending: HashMap<u64, oneshot::Sender<Result<Value>>>,
    /// Set once the connection is unusable
    closed: Option<String>,
}

pub(crate) struct Shared {
    server: String,
    state: Mutex<State>,
    subscriptions: Mutex<HashMap<SubscriptionKey, Subscribers>>,
}

impl Shared {
    fn resolve(&self, id: u64, result: Result<Value>) {
        match self.state.lock().pending.remove(&id) {
            Some(sender) => {
                let _ = sender.send(result);
            }
            None => debug!(server = %self.server, id, "Response for unknown request"),
        }
    }

    fn notify(&self, method: String, params: Vec<Value>) {
        let mut key = SubscriptionKey::new(&method, &params);
        let mut subscriptions = self.subscriptions.lock();
        if !subscriptions.contains_key(&key) {
            key.item = None;
        }
        let Some(targets) = subscriptions.get_mut(&key) else {
            debug!(server = %self.server, method = %method, "Notification without subscriber");
            return;
        };
        let notification = Notification { method, params };
        targets.retain(|(_, sender)| sender.send(notification.clone()).is_ok());
    }

    fn fail_all(&self, reason: &str) {
        let pending = {
            let mut state = self.state.lock();
            if state.closed.is_some() {
                return;
            }
            state.closed = Some(reason.to_string());
            std::mem::take(&mut state.pending)
        };
        if !pending.is_empty() {
            warn!(
                server = %self.server,
                pending = pending.len(),
                reason,
                "Connection lost with requests in flight"
            );
        }
        for (_, sender) in pending {
            let _ = sender.send(Err(Error::unavailable(&self.server, reason)));
        }
        self.subscriptions.lock().clear();
    }

    pub(crate) fn unsubscribe(&self, key: &SubscriptionKey, id: u64) {
        let mut subscriptions = self.subscriptions.lock();
        if let Some(targets) = subscriptions.get_mut(key) {
            targets.retain(|(sub_id, _)| *sub_id != id);
            if targets.is_empty() {
                subscriptions.remove(key);
            }
        }
    }
}

/// Removes a request's slot when its future completes or is dropped
struct PendingSlot<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.shared.state.lock().pending.remove(&self.id);
    }
}

/// JSON-RPC connection
pub struct Connection {
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<String>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl Connection {
    /// Start reader and writer tasks over `io`
    pub fn spawn<T: Transport>(server: impl Into<String>, io: T) -> Self {
        Self::spawn_with_max_line(server, io, MAX_LINE_LENGTH)
    }

    pub(crate) fn spawn_with_max_line<T: Transport>(
        server: impl Into<String>,
        io: T,
        max_line: usize,
    ) -> Self {
        let shared = Arc::new(Shared {
            server: server.into(),
            state: Mutex::new(State::default()),
            subscriptions: Mutex::new(HashMap::new()),
        });
        let (reader, writer) = tokio::io::split(io);
        let (outgoing, lines) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_loop(shared.clone(), reader, max_line));
        tokio::spawn(write_loop(shared.clone(), writer, lines));

        Self {
            shared,
            outgoing,
            next_id: AtomicU64::new(0),
            reader,
        }
    }

    /// Server address
    pub fn server(&self) -> &str {
        &self.shared.server
    }

    /// Whether the connection has failed or been closed
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed.is_some()
    }

    /// Number of requests awaiting a response
    pub fn pending_requests(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Send a request and wait for its response or the deadline
    pub async fn request(&self, method: &str, params: Vec<Value>, deadline: Duration) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let line = encode_request(id, method, &params)?;

        let (sender, receiver) = oneshot::channel();
        {
            let mut state = self.shared.state.lock();
            if let Some(reason) = &state.closed {
                return Err(Error::unavailable(self.server(), reason.clone()));
            }
            state.pending.insert(id, sender);
        }
        let _slot = PendingSlot {
            shared: &self.shared,
            id,
        };

        if self.outgoing.send(line).is_err() {
            return Err(Error::unavailable(self.server(), "writer stopped"));
        }
        debug!(server = %self.server(), id, method, "Request sent");

        match tokio::time::timeout(deadline, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::unavailable(self.server(), "connection closed")),
            Err(_) => Err(Error::unavailable(
                self.server(),
                format!("{method} missed its {}ms deadline", deadline.as_millis()),
            )),
        }
    }

    /// Register for notifications, then send the subscribe request.
    ///
    /// Returns the request's result with the notification stream.
    pub async fn subscribe(
        &self,
        method: &str,
        params: Vec<Value>,
        deadline: Duration,
    ) -> Result<(Value, Subscription)> {
        let key = SubscriptionKey::new(method, &params);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.shared
            .subscriptions
            .lock()
            .entry(key.clone())
            .or_default()
            .push((id, sender));

        let subscription = Subscription {
            key,
            id,
            server: self.server().to_string(),
            receiver,
            shared: Arc::downgrade(&self.shared),
        };
        let initial = self.request(method, params, deadline).await?;
        Ok((initial, subscription))
    }

    /// Fail pending requests and stop the connection
    pub fn close(&self, reason: &str) {
        self.shared.fail_all(reason);
        self.reader.abort();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close("connection dropped");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("server", &self.shared.server)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn read_loop<R: AsyncRead + Unpin>(shared: Arc<Shared>, reader: R, max_line: usize) {
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(max_line));
    let reason = loop {
        match lines.next().await {
            Some(Ok(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match parse_line(&line) {
                    Ok(Incoming::Response { id, result }) => {
                        shared.resolve(id, result.map_err(Error::from));
                    }
                    Ok(Incoming::Notification { method, params }) => shared.notify(method, params),
                    Err(e) => warn!(server = %shared.server, error = %e, "Ignoring malformed message"),
                }
            }
            None => break "closed by server".to_string(),
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                break format!("line longer than {max_line} bytes")
            }
            Some(Err(LinesCodecError::Io(e))) => break format!("read failed: {e}"),
        }
    };
    shared.fail_all(&reason);
}

async fn write_loop<W: AsyncWrite + Unpin>(
    shared: Arc<Shared>,
    mut writer: W,
    mut lines: mpsc::UnboundedReceiver<String>,
) {
    while let Some(line) = lines.recv().await {
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            shared.fail_all(&format!("write failed: {e}"));
            return;
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn test_responses_matched_by_id() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let conn = Connection::spawn("mock", client_io);

        let server = tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server_io);
            let mut lines = BufReader::new(read).lines();
            let mut requests = Vec::new();
            for _ in 0..2 {
                let line = lines.next_line().await.unwrap().unwrap();
                requests.push(serde_json::from_str::<Value>(&line).unwrap());
            }
            // Answer in reverse order
            for request in requests.iter().rev() {
                let reply = json!({"jsonrpc": "2.0", "id": request["id"], "result": request["params"][0]});
                write.write_all(format!("{reply}\n").as_bytes()).await.unwrap();
            }
            lines
        });

        let deadline = Duration::from_secs(5);
        let (a, b) = tokio::join!(
            conn.request("echo", vec![json!("first")], deadline),
            conn.request("echo", vec![json!("second")], deadline),
        );
        assert_eq!(a.unwrap(), json!("first"));
        assert_eq!(b.unwrap(), json!("second"));
        assert_eq!(conn.pending_requests(), 0);
        drop(server);
    }

    #[tokio::test]
    async fn test_drop_fails_pending_requests() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let conn = Connection::spawn("mock", client_io);

        let request = conn.request("slow", Vec::new(), Duration::from_secs(60));
        let closer = async {
            tokio::task::yield_now().await;
            drop(server_io);
        };
        let (result, _) = tokio::join!(request, closer);
        assert!(matches!(result, Err(Error::ServerUnavailable { .. })));
        assert!(conn.is_closed());

        let after = conn.request("again", Vec::new(), Duration::from_secs(1)).await;
        assert!(matches!(after, Err(Error::ServerUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_overlong_line_closes_connection() {
        let (client_io, server_io) = tokio::io::duplex(4096);
        let conn = Connection::spawn_with_max_line("mock", client_io, 64);

        let (_read, mut write) = tokio::io::split(server_io);
        let flood = async {
            // Never terminated; only the cap ends it
            write.write_all(&[b'7'; 512]).await.unwrap();
        };
        let request = conn.request("headers", Vec::new(), Duration::from_secs(60));
        let (result, ()) = tokio::join!(request, flood);
        match result {
            Err(Error::ServerUnavailable { reason, .. }) => assert!(reason.contains("longer than 64")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(conn.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_releases_slot() {
        let (client_io, _server_io) = tokio::io::duplex(4096);
        let conn = Connection::spawn("mock", client_io);

        let result = conn.request("silent", Vec::new(), Duration::from_millis(250)).await;
        match result {
            Err(Error::ServerUnavailable { reason, .. }) => assert!(reason.contains("deadline")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(conn.pending_requests(), 0);
    }
}
