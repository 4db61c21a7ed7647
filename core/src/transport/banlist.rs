//! Bounded, TTL-based memory of recently unreachable or failing peers.
//!
//! A ban is a hint, not a verdict: any observed traffic from a banned
//! address lifts the ban early, since reachability is all the ban tracks.

use super::overlay::Address;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// FIFO-bounded exclusion set used to avoid repeatedly selecting dead
/// addresses as sync targets.
pub struct PeerBanlist {
    /// Insertion-ordered; front is the oldest ban.
    entries: Mutex<VecDeque<(Address, Instant)>>,
    capacity: usize,
    ttl: Duration,
}

impl PeerBanlist {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity,
            ttl,
        }
    }

    /// Insert or refresh a ban. Refreshing moves the entry to the back of
    /// the FIFO; over capacity, the single oldest entry is evicted.
    pub fn ban(&self, addr: &str) {
        let mut entries = self.entries.lock();
        entries.retain(|(a, _)| a != addr);
        entries.push_back((addr.to_string(), Instant::now()));
        while entries.len() > self.capacity {
            if let Some((evicted, _)) = entries.pop_front() {
                debug!(addr = %evicted, "banlist full, dropping oldest ban");
            }
        }
    }

    /// True iff a ban exists and is younger than the TTL. Expired entries
    /// are removed lazily here.
    pub fn is_banned(&self, addr: &str) -> bool {
        let mut entries = self.entries.lock();
        let Some(at) = entries.iter().position(|(a, _)| a == addr) else {
            return false;
        };
        if entries[at].1.elapsed() > self.ttl {
            entries.remove(at);
            return false;
        }
        true
    }

    /// Lift a ban. Called for every inbound message: traffic from an address
    /// is taken as proof of reachability.
    pub fn unban(&self, addr: &str) {
        self.entries.lock().retain(|(a, _)| a != addr);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
