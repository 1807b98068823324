//! Push notifications from a subscription

use crate::connection::Shared;
use futures_util::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// A subscription update
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Subscription method
    pub method: String,
    /// Notification parameters
    pub params: Vec<Value>,
}

/// Routing key: the method plus, for per-item subscriptions, the item
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SubscriptionKey {
    pub(crate) method: String,
    pub(crate) item: Option<String>,
}

impl SubscriptionKey {
    pub(crate) fn new(method: &str, params: &[Value]) -> Self {
        Self {
            method: method.to_string(),
            item: params.first().and_then(Value::as_str).map(str::to_string),
        }
    }
}

/// Stream of notifications for one subscription.
///
/// Ends when the connection closes. Dropping it unregisters the
/// subscription.
#[derive(Debug)]
pub struct Subscription {
    pub(crate) key: SubscriptionKey,
    pub(crate) id: u64,
    pub(crate) server: String,
    pub(crate) receiver: mpsc::UnboundedReceiver<Notification>,
    pub(crate) shared: Weak<Shared>,
}

impl Subscription {
    /// Server the subscription lives on
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Next notification; `None` once the connection is gone
    pub async fn recv(&mut self) -> Option<Notification> {
        self.receiver.recv().await
    }
}

impl Stream for Subscription {
    type Item = Notification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Notification>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.unsubscribe(&self.key, self.id);
        }
    }
}
