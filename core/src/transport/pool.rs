//! Redundant, self-healing pool of overlay connections.
//!
//! Presents one logical publish/send/query surface backed by a target count
//! of independent connections. Individual connection failure never disrupts
//! callers: the failing connection is dropped immediately and a replacement
//! is requested in the background.

use super::overlay::{
    Address, ConnectionGenerator, Inbound, OverlayConnection, SubscriberLists, TransportError,
};
use crate::config::Config;
use crate::crypto;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Pool of up to `target` concurrent overlay connections.
///
/// Membership is mutated only by the pool's own logic (adopt on successful
/// generation, discard on transport error) and read concurrently by senders.
pub struct TransportPool {
    connections: RwLock<Vec<Arc<dyn OverlayConnection>>>,
    generator: Arc<dyn ConnectionGenerator>,
    topic: String,
    target: usize,
    subscribe_blocks: u32,
    resubscribe_interval: Duration,
    refill_interval: Duration,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
}

impl TransportPool {
    /// Build a pool. The returned receiver carries every inbound message of
    /// every pooled connection, fanned into one stream.
    pub fn new(
        generator: Arc<dyn ConnectionGenerator>,
        topic: String,
        config: &Config,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Inbound>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let pool = Arc::new(Self {
            connections: RwLock::new(Vec::new()),
            generator,
            topic,
            target: config.pool_target,
            subscribe_blocks: config.subscribe_duration_blocks,
            resubscribe_interval: config.resubscribe_interval,
            refill_interval: config.refill_interval,
            inbound_tx,
        });
        (pool, inbound_rx)
    }

    /// Launch `target` concurrent connection attempts and resolve as soon as
    /// at least one succeeds; the remaining attempts keep filling the pool
    /// in the background. Fails only when every racing attempt fails.
    pub async fn start(self: &Arc<Self>) -> Result<(), TransportError> {
        let (tx, mut rx) = mpsc::channel::<Result<(), TransportError>>(self.target.max(1));
        for slot in 0..self.target {
            let pool = Arc::clone(self);
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome = match pool.generator.generate().await {
                    Ok(conn) => {
                        pool.adopt(conn);
                        Ok(())
                    }
                    Err(e) => {
                        debug!(slot, "initial connection attempt failed: {e}");
                        Err(e)
                    }
                };
                let _ = tx.send(outcome).await;
            });
        }
        drop(tx);

        let mut last = TransportError::NoConnection;
        while let Some(outcome) = rx.recv().await {
            match outcome {
                Ok(()) => {
                    info!(target = self.target, "transport pool online");
                    self.spawn_maintenance();
                    return Ok(());
                }
                Err(e) => last = e,
            }
        }
        Err(last)
    }

    /// Best-effort fan-out: connections in random order, first success wins.
    /// An ack means the overlay accepted the message, nothing more.
    pub async fn publish(self: &Arc<Self>, payload: &[u8]) -> Result<(), TransportError> {
        let mut conns = self.snapshot();
        if conns.is_empty() {
            return Err(TransportError::NoConnection);
        }
        crypto::shuffle(&mut conns);

        let mut last = TransportError::NoConnection;
        for conn in conns {
            match conn.publish(&self.topic, payload).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(addr = %conn.address(), "publish failed, dropping connection: {e}");
                    self.discard(&conn);
                    last = e;
                }
            }
        }
        Err(last)
    }

    /// Point-to-point send over one arbitrary healthy connection.
    ///
    /// A send failure is attributed to the destination, not the connection;
    /// the connection stays pooled and the caller decides whether to ban.
    pub async fn send(&self, dest: &Address, payload: &[u8]) -> Result<(), TransportError> {
        let conns = self.snapshot();
        let Some(conn) = crypto::sample(&conns, 1).pop() else {
            return Err(TransportError::NoConnection);
        };
        conn.send(dest, payload).await
    }

    /// Send from the specific local identity a message was addressed to.
    /// Fails if that identity is no longer pooled.
    pub async fn send_from(
        &self,
        identity: &Address,
        dest: &Address,
        payload: &[u8],
    ) -> Result<(), TransportError> {
        let conn = {
            let conns = self.connections.read();
            conns
                .iter()
                .find(|c| &c.address() == identity)
                .cloned()
                .ok_or_else(|| TransportError::IdentityNotPooled(identity.clone()))?
        };
        conn.send(dest, payload).await
    }

    /// Query the topic's confirmed and pending subscribers, trying
    /// connections in random order until one answers.
    pub async fn subscribers(&self) -> Result<SubscriberLists, TransportError> {
        let mut conns = self.snapshot();
        if conns.is_empty() {
            return Err(TransportError::NoConnection);
        }
        crypto::shuffle(&mut conns);

        let mut last = TransportError::NoConnection;
        for conn in conns {
            match conn.subscribers(&self.topic).await {
                Ok(lists) => return Ok(lists),
                Err(e) => {
                    debug!(addr = %conn.address(), "subscriber query failed: {e}");
                    last = e;
                }
            }
        }
        Err(last)
    }

    /// The local identities currently pooled. Sync cycles exclude these from
    /// the neighbor candidate set.
    pub fn addresses(&self) -> Vec<Address> {
        self.connections.read().iter().map(|c| c.address()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Request replacements for every missing slot. Idempotent: extra
    /// successes beyond the target are discarded without error.
    pub fn refill_now(self: &Arc<Self>) {
        let missing = self.target.saturating_sub(self.len());
        for _ in 0..missing {
            let pool = Arc::clone(self);
            tokio::spawn(async move {
                match pool.generator.generate().await {
                    Ok(conn) => {
                        if !pool.adopt(conn) {
                            debug!("replacement connection discarded, pool already at target");
                        }
                    }
                    Err(e) => warn!("connection replacement failed: {e}"),
                }
            });
        }
    }

    /// Re-subscribe every pooled connection to the shared topic. Idempotent;
    /// a failing connection is dropped and replaced.
    pub async fn resubscribe_all(self: &Arc<Self>) {
        for conn in self.snapshot() {
            if let Err(e) = conn.subscribe(&self.topic, self.subscribe_blocks).await {
                warn!(addr = %conn.address(), "resubscribe failed, dropping connection: {e}");
                self.discard(&conn);
            }
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn OverlayConnection>> {
        self.connections.read().clone()
    }

    /// Adopt a freshly generated connection: keep it only if a slot is still
    /// open (first success per slot wins), then wire its inbound stream and
    /// subscribe it to the shared topic.
    fn adopt(self: &Arc<Self>, conn: Arc<dyn OverlayConnection>) -> bool {
        {
            let mut conns = self.connections.write();
            if conns.len() >= self.target {
                return false;
            }
            conns.push(Arc::clone(&conn));
        }
        info!(addr = %conn.address(), pooled = self.len(), "connection adopted");

        if let Some(mut inbound) = conn.take_inbound() {
            let tx = self.inbound_tx.clone();
            tokio::spawn(async move {
                while let Some(msg) = inbound.recv().await {
                    if tx.send(msg).is_err() {
                        break;
                    }
                }
            });
        }

        let pool = Arc::clone(self);
        let subscribed = Arc::clone(&conn);
        tokio::spawn(async move {
            if let Err(e) = subscribed
                .subscribe(&pool.topic, pool.subscribe_blocks)
                .await
            {
                warn!(addr = %subscribed.address(), "initial subscribe failed: {e}");
                pool.discard(&subscribed);
            }
        });
        true
    }

    /// Remove a connection that reported a transport error and request an
    /// asynchronous replacement.
    fn discard(self: &Arc<Self>, conn: &Arc<dyn OverlayConnection>) {
        {
            let mut conns = self.connections.write();
            conns.retain(|c| !Arc::ptr_eq(c, conn));
        }
        self.refill_now();
    }

    /// Two independent fixed-period timers: topic resubscription and pool
    /// refill. Both idempotent; overlapping runs are harmless.
    fn spawn_maintenance(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(pool.resubscribe_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await; // connections subscribe on adoption
            loop {
                tick.tick().await;
                pool.resubscribe_all().await;
            }
        });

        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(pool.refill_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await;
            loop {
                tick.tick().await;
                pool.refill_now();
            }
        });
    }
}
