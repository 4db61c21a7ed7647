//! In-memory overlay network.
//!
//! A process-local stand-in for the real overlay SDK, used by the test
//! suite and the demo client. Supports the same primitives plus failure
//! injection: individual addresses can be killed and subscriber queries can
//! be made to fail.

use super::overlay::{
    Address, ConnectionGenerator, Inbound, OverlayConnection, SubscriberLists, TransportError,
};
use crate::crypto;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Default)]
struct TopicState {
    confirmed: HashSet<Address>,
    pending: HashSet<Address>,
}

#[derive(Default)]
struct NetState {
    endpoints: HashMap<Address, mpsc::UnboundedSender<Inbound>>,
    topics: HashMap<String, TopicState>,
    refuse_connects: bool,
    fail_queries: bool,
}

/// A process-local overlay network shared by every connection made from it.
#[derive(Clone)]
pub struct MemoryOverlay {
    inner: Arc<Mutex<NetState>>,
}

impl MemoryOverlay {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(NetState::default())),
        }
    }

    /// Establish a connection with the given identity.
    pub fn connect(&self, identity: &str) -> Arc<MemoryConnection> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().endpoints.insert(identity.to_string(), tx);
        Arc::new(MemoryConnection {
            addr: identity.to_string(),
            net: Arc::clone(&self.inner),
            inbound: Mutex::new(Some(rx)),
        })
    }

    /// Drop an address from the network: deliveries to it vanish and every
    /// primitive called from it starts failing.
    pub fn kill(&self, addr: &str) {
        let mut net = self.inner.lock();
        net.endpoints.remove(addr);
        for topic in net.topics.values_mut() {
            topic.confirmed.remove(addr);
            topic.pending.remove(addr);
        }
    }

    /// Make subsequent connection generation fail.
    pub fn refuse_connects(&self, refuse: bool) {
        self.inner.lock().refuse_connects = refuse;
    }

    /// Make subscriber queries fail.
    pub fn fail_queries(&self, fail: bool) {
        self.inner.lock().fail_queries = fail;
    }

    /// Place an address on a topic's not-yet-finalized subscriber list.
    pub fn add_pending(&self, topic: &str, addr: &str) {
        let mut net = self.inner.lock();
        net.topics
            .entry(topic.to_string())
            .or_default()
            .pending
            .insert(addr.to_string());
    }
}

impl Default for MemoryOverlay {
    fn default() -> Self {
        Self::new()
    }
}

/// One identity on a [`MemoryOverlay`].
pub struct MemoryConnection {
    addr: Address,
    net: Arc<Mutex<NetState>>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Inbound>>>,
}

impl MemoryConnection {
    fn alive(&self, net: &NetState) -> bool {
        net.endpoints.contains_key(&self.addr)
    }
}

#[async_trait]
impl OverlayConnection for MemoryConnection {
    fn address(&self) -> Address {
        self.addr.clone()
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let deliveries: Vec<(Address, mpsc::UnboundedSender<Inbound>)> = {
            let net = self.net.lock();
            if !self.alive(&net) {
                return Err(TransportError::PublishFailed(format!(
                    "{} is gone",
                    self.addr
                )));
            }
            let Some(state) = net.topics.get(topic) else {
                return Ok(());
            };
            state
                .confirmed
                .iter()
                .chain(state.pending.iter())
                .filter(|sub| **sub != self.addr)
                .filter_map(|sub| net.endpoints.get(sub).map(|tx| (sub.clone(), tx.clone())))
                .collect()
        };
        for (dest, tx) in deliveries {
            let _ = tx.send(Inbound {
                src: self.addr.clone(),
                dest,
                payload: payload.to_vec(),
            });
        }
        Ok(())
    }

    async fn send(&self, dest: &Address, payload: &[u8]) -> Result<(), TransportError> {
        let tx = {
            let net = self.net.lock();
            if !self.alive(&net) {
                return Err(TransportError::SendFailed {
                    dest: dest.clone(),
                    reason: format!("{} is gone", self.addr),
                });
            }
            net.endpoints.get(dest).cloned()
        };
        let Some(tx) = tx else {
            return Err(TransportError::SendFailed {
                dest: dest.clone(),
                reason: "no such address".to_string(),
            });
        };
        tx.send(Inbound {
            src: self.addr.clone(),
            dest: dest.clone(),
            payload: payload.to_vec(),
        })
        .map_err(|_| TransportError::SendFailed {
            dest: dest.clone(),
            reason: "receiver dropped".to_string(),
        })
    }

    async fn subscribe(&self, topic: &str, _duration_blocks: u32) -> Result<(), TransportError> {
        let mut net = self.net.lock();
        if !self.alive(&net) {
            return Err(TransportError::SubscribeFailed(format!(
                "{} is gone",
                self.addr
            )));
        }
        let state = net.topics.entry(topic.to_string()).or_default();
        state.pending.remove(&self.addr);
        state.confirmed.insert(self.addr.clone());
        Ok(())
    }

    async fn subscribers(&self, topic: &str) -> Result<SubscriberLists, TransportError> {
        let net = self.net.lock();
        if net.fail_queries || !self.alive(&net) {
            return Err(TransportError::SubscriberQueryFailed(
                "query refused".to_string(),
            ));
        }
        let Some(state) = net.topics.get(topic) else {
            return Ok(SubscriberLists::default());
        };
        let mut confirmed: Vec<Address> = state.confirmed.iter().cloned().collect();
        let mut pending: Vec<Address> = state.pending.iter().cloned().collect();
        confirmed.sort();
        pending.sort();
        Ok(SubscriberLists { confirmed, pending })
    }

    fn take_inbound(&self) -> Option<mpsc::UnboundedReceiver<Inbound>> {
        self.inbound.lock().take()
    }
}

/// Generates fresh connections with unique identities on one overlay.
pub struct MemoryGenerator {
    overlay: MemoryOverlay,
    prefix: String,
}

impl MemoryGenerator {
    pub fn new(overlay: MemoryOverlay, prefix: &str) -> Self {
        Self {
            overlay,
            prefix: prefix.to_string(),
        }
    }
}

#[async_trait]
impl ConnectionGenerator for MemoryGenerator {
    async fn generate(&self) -> Result<Arc<dyn OverlayConnection>, TransportError> {
        if self.overlay.inner.lock().refuse_connects {
            return Err(TransportError::ConnectFailed(
                "overlay refusing connects".to_string(),
            ));
        }
        let addr = format!("{}-{}", self.prefix, &crypto::random_hex_256()[..8]);
        Ok(self.overlay.connect(&addr) as Arc<dyn OverlayConnection>)
    }
}
