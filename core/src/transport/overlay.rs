//! Abstraction over the overlay-network SDK.
//!
//! Connection handshake, identity generation and wire encryption are the
//! SDK's job; the engine only sees these traits. The in-memory overlay in
//! [`crate::transport::memory`] implements them for tests and demos.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// An overlay network address (`identifier.pubkey` form on the real network).
pub type Address = String;

/// Errors reported by the overlay primitives and the pool built on them.
/// All of them are non-fatal; callers retry or fail over.
#[derive(Debug, Error, Clone)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("send to {dest} failed: {reason}")]
    SendFailed { dest: Address, reason: String },
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("subscriber query failed: {0}")]
    SubscriberQueryFailed(String),
    #[error("no connection available")]
    NoConnection,
    #[error("no pooled connection with identity {0}")]
    IdentityNotPooled(Address),
}

/// A message delivered to one of our identities.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub src: Address,
    pub dest: Address,
    pub payload: Vec<u8>,
}

/// Confirmed and not-yet-finalized subscribers of a topic.
#[derive(Debug, Clone, Default)]
pub struct SubscriberLists {
    pub confirmed: Vec<Address>,
    pub pending: Vec<Address>,
}

impl SubscriberLists {
    /// Union of confirmed and pending subscribers.
    pub fn union(self) -> Vec<Address> {
        let mut all = self.confirmed;
        for addr in self.pending {
            if !all.contains(&addr) {
                all.push(addr);
            }
        }
        all
    }
}

/// One established identity/session on the overlay network.
///
/// Connections are ephemeral: created by a [`ConnectionGenerator`],
/// exclusively owned by the pool, destroyed and replaced on transport error.
#[async_trait]
pub trait OverlayConnection: Send + Sync {
    /// The local identity this session is addressed as.
    fn address(&self) -> Address;

    /// Best-effort topic broadcast; an ack means the network accepted it,
    /// not that any subscriber received it.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Point-to-point send.
    async fn send(&self, dest: &Address, payload: &[u8]) -> Result<(), TransportError>;

    /// Subscribe this identity to `topic` for `duration_blocks`.
    async fn subscribe(&self, topic: &str, duration_blocks: u32) -> Result<(), TransportError>;

    /// Query the confirmed and pending subscriber lists of `topic`.
    async fn subscribers(&self, topic: &str) -> Result<SubscriberLists, TransportError>;

    /// Take the inbound message stream. Yields `Some` exactly once; the pool
    /// takes it when the connection is adopted.
    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<Inbound>>;
}

/// Produces fresh overlay connections for the pool.
#[async_trait]
pub trait ConnectionGenerator: Send + Sync {
    async fn generate(&self) -> Result<Arc<dyn OverlayConnection>, TransportError>;
}

/// Bounded-retry wrapper around any generator. No backoff: the overlay's own
/// connect/connect-failed signaling paces the loop.
pub struct RetryingGenerator {
    inner: Arc<dyn ConnectionGenerator>,
    attempts: u32,
}

impl RetryingGenerator {
    pub fn new(inner: Arc<dyn ConnectionGenerator>, attempts: u32) -> Self {
        Self { inner, attempts }
    }
}

#[async_trait]
impl ConnectionGenerator for RetryingGenerator {
    async fn generate(&self) -> Result<Arc<dyn OverlayConnection>, TransportError> {
        let mut last = TransportError::ConnectFailed("no attempts configured".to_string());
        for attempt in 0..self.attempts {
            match self.inner.generate().await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    debug!(attempt, "connection attempt failed: {e}");
                    last = e;
                }
            }
        }
        Err(last)
    }
}
