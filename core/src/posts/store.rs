//! Bounded post store with eviction and change notifications.
//!
//! Properties:
//! - De-duplicated: ids are content hashes, duplicate submissions are no-ops
//! - Ordered: ascending by timestamp, stable for equal timestamps
//! - Bounded: at capacity the oldest post is evicted before each insert
//! - Atomic: validate-and-insert is one step under a single lock; concurrent
//!   sync handlers never observe a torn state or double-insert

use super::{now_ms, Post, PostId};
use crate::crypto::post_id;
use parking_lot::Mutex;
use std::collections::HashSet;
use tokio::sync::broadcast;
use tracing::debug;

/// Membership change, delivered to every registered observer.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    Added(Post),
    Removed(PostId),
}

struct Inner {
    /// Ascending by timestamp; equal timestamps keep insertion order.
    ordered: Vec<Post>,
    ids: HashSet<PostId>,
}

/// Bounded, content-addressed, timestamp-ordered set of posts.
pub struct PostStore {
    inner: Mutex<Inner>,
    capacity: usize,
    max_text_len: usize,
    max_future_skew_ms: u64,
    events: broadcast::Sender<StoreEvent>,
}

impl PostStore {
    pub fn new(capacity: usize, max_text_len: usize, max_future_skew_ms: u64) -> Self {
        let (events, _) = broadcast::channel(capacity.max(16) * 2);
        Self {
            inner: Mutex::new(Inner {
                ordered: Vec::new(),
                ids: HashSet::new(),
            }),
            capacity,
            max_text_len,
            max_future_skew_ms,
            events,
        }
    }

    pub fn from_config(config: &crate::Config) -> Self {
        Self::new(
            config.store_capacity,
            config.max_text_len,
            config.max_future_skew_ms,
        )
    }

    /// Register an observer of membership changes. Each consumer registers
    /// once at setup; events arrive in the order the store applied them.
    pub fn subscribe_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Validate-and-insert. Returns the stored post with its assigned id,
    /// or `None` if the candidate was rejected or already present.
    ///
    /// Rejection is silent on purpose: malformed or stale posts are expected
    /// noise from possibly-honest peers, not an error condition.
    pub fn add_post(&self, text: &str, timestamp: u64) -> Option<Post> {
        if text.len() > self.max_text_len {
            debug!(len = text.len(), "rejecting oversized post");
            return None;
        }
        if timestamp > now_ms().saturating_add(self.max_future_skew_ms) {
            debug!(timestamp, "rejecting post from the future");
            return None;
        }

        let id = post_id(text, timestamp);
        let post = Post {
            text: text.to_string(),
            timestamp,
            id: id.clone(),
        };

        let evicted;
        {
            let mut inner = self.inner.lock();
            if inner.ids.contains(&id) {
                return None;
            }

            // Evict the single lowest-timestamp entry before inserting the
            // 201st post; the eviction is reported before the addition.
            evicted = if inner.ordered.len() >= self.capacity {
                let oldest = inner.ordered.remove(0);
                inner.ids.remove(&oldest.id);
                Some(oldest.id)
            } else {
                None
            };

            // Stable: before the first strictly-greater timestamp.
            let at = inner
                .ordered
                .iter()
                .position(|p| p.timestamp > timestamp)
                .unwrap_or(inner.ordered.len());
            inner.ordered.insert(at, post.clone());
            inner.ids.insert(id);
        }

        if let Some(removed) = evicted {
            let _ = self.events.send(StoreEvent::Removed(removed));
        }
        let _ = self.events.send(StoreEvent::Added(post.clone()));
        Some(post)
    }

    /// All posts with `timestamp > ts`, ascending.
    pub fn posts_after(&self, ts: u64) -> Vec<Post> {
        let inner = self.inner.lock();
        let from = inner.ordered.partition_point(|p| p.timestamp <= ts);
        inner.ordered[from..].to_vec()
    }

    /// Every stored post, ascending by timestamp.
    pub fn all_posts(&self) -> Vec<Post> {
        self.inner.lock().ordered.clone()
    }

    /// All ids, in ascending-timestamp order.
    pub fn all_ids(&self) -> Vec<PostId> {
        self.inner
            .lock()
            .ordered
            .iter()
            .map(|p| p.id.clone())
            .collect()
    }

    /// The post with the greatest timestamp, or `None` if empty.
    pub fn latest(&self) -> Option<Post> {
        self.inner.lock().ordered.last().cloned()
    }

    pub fn get(&self, id: &str) -> Option<Post> {
        let inner = self.inner.lock();
        inner.ordered.iter().find(|p| p.id == id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().ordered.is_empty()
    }
}
