//! The anti-entropy engine.
//!
//! Drives the post sets of all reachable peers toward equality over a lossy
//! overlay. Three mechanisms, all idempotent:
//! - new posts are broadcast on the shared topic (POST)
//! - a cheap periodic nudge advertises the latest timestamp and count
//!   (UPDATE), letting stale peers notice and request a full exchange
//! - a periodic full id-set exchange (SYNC / SEND-SYNC) repairs arbitrary
//!   divergence in a bounded number of rounds

pub mod protocol;

pub use protocol::WireMessage;

use crate::config::Config;
use crate::posts::{now_ms, Post, PostStore};
use crate::transport::{Address, Inbound, PeerBanlist, TransportError, TransportPool};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("post rejected by local store")]
    Rejected,
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Coarse health signal for a UI. `Degraded` means the pool is online but
/// the last sync cycle reached no peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Starting,
    Connected,
    Degraded,
}

/// The engine a UI talks to: owns the sync cycles and the inbound dispatch,
/// composes the store, the pool and the banlist.
pub struct SyncEngine {
    store: Arc<PostStore>,
    pool: Arc<TransportPool>,
    banlist: Arc<PeerBanlist>,
    fanout: usize,
    nudge_interval: Duration,
    full_sync_interval: Duration,
    startup_sync_retries: u32,
    /// Targets of the last successful neighbor query, the fallback when the
    /// query itself fails.
    prev_dests: Mutex<Vec<Address>>,
    status_tx: watch::Sender<EngineStatus>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<PostStore>,
        pool: Arc<TransportPool>,
        banlist: Arc<PeerBanlist>,
        config: &Config,
    ) -> Self {
        let (status_tx, _) = watch::channel(EngineStatus::Starting);
        Self {
            store,
            pool,
            banlist,
            fanout: config.fanout,
            nudge_interval: config.nudge_interval,
            full_sync_interval: config.full_sync_interval,
            startup_sync_retries: config.startup_sync_retries,
            prev_dests: Mutex::new(Vec::new()),
            status_tx,
        }
    }

    pub fn status(&self) -> watch::Receiver<EngineStatus> {
        self.status_tx.subscribe()
    }

    pub fn store(&self) -> &Arc<PostStore> {
        &self.store
    }

    /// Bring the engine online: connect the pool (the only fatal failure),
    /// dispatch inbound messages, run the startup sync and the two cycles.
    pub async fn start(
        self: &Arc<Self>,
        mut inbound: mpsc::UnboundedReceiver<Inbound>,
    ) -> Result<(), SyncError> {
        self.pool.start().await?;

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(msg) = inbound.recv().await {
                engine.handle_inbound(&msg).await;
            }
        });

        // Right after connecting the subscriber lists are often still
        // propagating, so the first full sync gets a bounded retry burst.
        let mut reached = 0;
        for attempt in 0..self.startup_sync_retries {
            reached = self.full_sync_cycle().await;
            if reached > 0 {
                break;
            }
            debug!(attempt, "startup sync reached no peer");
            tokio::task::yield_now().await;
        }
        self.publish_status(reached);

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(engine.nudge_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await; // startup already synced
            loop {
                tick.tick().await;
                engine.nudge_cycle().await;
            }
        });

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(engine.full_sync_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await;
            loop {
                tick.tick().await;
                let reached = engine.full_sync_cycle().await;
                engine.publish_status(reached);
            }
        });

        info!("sync engine online");
        Ok(())
    }

    /// Author a post: insert locally, then broadcast it on the shared topic.
    /// The local insert stands even if the broadcast fails; the sync cycles
    /// propagate the post eventually.
    pub async fn broadcast(&self, text: &str) -> Result<Post, SyncError> {
        let post = self
            .store
            .add_post(text, now_ms())
            .ok_or(SyncError::Rejected)?;
        let payload = WireMessage::Post { post: post.body() }.to_bytes()?;
        if let Err(e) = self.pool.publish(&payload).await {
            warn!("broadcast publish failed: {e}");
        }
        Ok(post)
    }

    /// Dispatch one inbound message. Malformed payloads are dropped; traffic
    /// from a banned address lifts the ban before anything else.
    pub async fn handle_inbound(&self, inbound: &Inbound) {
        self.banlist.unban(&inbound.src);

        let msg = match WireMessage::from_bytes(&inbound.payload) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(src = %inbound.src, "dropping undecodable payload: {e}");
                return;
            }
        };

        match msg {
            WireMessage::Post { post } => {
                // The id is never taken from the wire; content re-hashing is
                // the only admission path.
                self.store.add_post(&post.text, post.timestamp);
            }
            WireMessage::Update {
                timestamp,
                num_posts,
            } => self.handle_update(inbound, timestamp, num_posts).await,
            WireMessage::Sync { ids } => self.handle_sync(inbound, ids).await,
            WireMessage::SendSync {} => {
                let ids = self.store.all_ids();
                self.reply(inbound, &WireMessage::Sync { ids }).await;
            }
        }
    }

    /// A peer advertised its latest timestamp and count. Serve anything
    /// newer; failing that, a sender claiming fewer posts than we hold is
    /// missing older entries a timestamp cursor cannot reveal, so ask for
    /// its id set. A sender claiming more draws no reply; its gap surfaces
    /// when our own nudge reaches it.
    async fn handle_update(&self, inbound: &Inbound, timestamp: u64, num_posts: usize) {
        let newer = self.store.posts_after(timestamp);
        if !newer.is_empty() {
            for post in newer {
                self.reply(inbound, &WireMessage::Post { post: post.body() })
                    .await;
            }
            return;
        }
        if num_posts < self.store.len() {
            self.reply(inbound, &WireMessage::SendSync {}).await;
        }
    }

    /// A peer sent its id set. Serve every local post the set omits,
    /// ascending. If the set names ids we lack, send our own id set back;
    /// the peer's handler then serves us exactly the gap, so any divergence
    /// closes within two exchanges. Equal sets are a no-op.
    async fn handle_sync(&self, inbound: &Inbound, ids: Vec<String>) {
        let known: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let any_missing = ids.iter().any(|id| !self.store.contains(id));

        for post in self.store.all_posts() {
            if !known.contains(post.id.as_str()) {
                self.reply(inbound, &WireMessage::Post { post: post.body() })
                    .await;
            }
        }
        if any_missing {
            let ids = self.store.all_ids();
            self.reply(inbound, &WireMessage::Sync { ids }).await;
        }
    }

    /// Nudge cycle: advertise the latest timestamp and count to a sample of
    /// neighbors. An empty store advertises zero, which elicits everything.
    pub async fn nudge_cycle(&self) -> usize {
        let (timestamp, num_posts) = match self.store.latest() {
            Some(post) => (post.timestamp, self.store.len()),
            None => (0, 0),
        };
        self.send_to_neighbors(&WireMessage::Update {
            timestamp,
            num_posts,
        })
        .await
    }

    /// Full-sync cycle: send the complete id set to a sample of neighbors.
    pub async fn full_sync_cycle(&self) -> usize {
        let ids = self.store.all_ids();
        self.send_to_neighbors(&WireMessage::Sync { ids }).await
    }

    /// Send one message to up to `fanout` randomly sampled neighbors.
    ///
    /// Candidates come from a fresh subscriber query, minus our own pooled
    /// identities and banned addresses. When the query fails, the previous
    /// successful candidate list is reused. An empty round is a soft skip.
    /// Returns how many sends succeeded; each failed target is banned.
    async fn send_to_neighbors(&self, msg: &WireMessage) -> usize {
        let payload = match msg.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("encode failed: {e}");
                return 0;
            }
        };

        let own: HashSet<Address> = self.pool.addresses().into_iter().collect();
        let eligible: Vec<Address> = match self.pool.subscribers().await {
            Ok(lists) => {
                let fresh: Vec<Address> = lists
                    .union()
                    .into_iter()
                    .filter(|addr| !own.contains(addr) && !self.banlist.is_banned(addr))
                    .collect();
                *self.prev_dests.lock() = fresh.clone();
                fresh
            }
            Err(e) => {
                debug!("subscriber query failed, reusing previous targets: {e}");
                self.prev_dests
                    .lock()
                    .iter()
                    .filter(|addr| !own.contains(*addr) && !self.banlist.is_banned(addr.as_str()))
                    .cloned()
                    .collect()
            }
        };
        if eligible.is_empty() {
            debug!("no eligible neighbors this round");
            return 0;
        }

        let targets = crate::crypto::sample(&eligible, self.fanout);
        let sends = targets.iter().map(|dest| {
            let payload = &payload;
            async move { (dest, self.pool.send(dest, payload).await) }
        });

        let mut reached = 0;
        for (dest, outcome) in join_all(sends).await {
            match outcome {
                Ok(()) => reached += 1,
                Err(e) => {
                    debug!(dest = %dest, "neighbor send failed, banning: {e}");
                    self.banlist.ban(dest);
                }
            }
        }
        reached
    }

    /// Reply from the identity the message was addressed to. A send failure
    /// bans the peer; a no-longer-pooled identity just drops the reply.
    async fn reply(&self, inbound: &Inbound, msg: &WireMessage) {
        let payload = match msg.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("encode failed: {e}");
                return;
            }
        };
        match self.pool.send_from(&inbound.dest, &inbound.src, &payload).await {
            Ok(()) => {}
            Err(TransportError::IdentityNotPooled(identity)) => {
                debug!(%identity, "reply identity no longer pooled, dropping reply");
            }
            Err(e) => {
                debug!(peer = %inbound.src, "reply failed, banning: {e}");
                self.banlist.ban(&inbound.src);
            }
        }
    }

    fn publish_status(&self, reached: usize) {
        let status = if reached > 0 {
            EngineStatus::Connected
        } else {
            EngineStatus::Degraded
        };
        // send_replace stores the value even when no receiver exists yet.
        self.status_tx.send_replace(status);
    }
}
