//! Process-wide configuration.
//!
//! Computed once at startup and passed explicitly into the components that
//! need it; there is no mutable global network state.

use std::time::Duration;

/// Every tunable of the engine, with the protocol's defaults.
///
/// The retry and fan-out counts are part of the protocol's observable
/// behavior; changing them changes how the network converges.
#[derive(Debug, Clone)]
pub struct Config {
    /// Protocol version string all participants hash into the shared topic.
    pub protocol_version: String,
    /// Target number of independent overlay connections.
    pub pool_target: usize,
    /// Bounded retry count for a single connection-establishment request.
    pub connect_retries: u32,
    /// Period of the idempotent topic resubscription timer.
    pub resubscribe_interval: Duration,
    /// Subscription duration requested from the overlay, in blocks.
    pub subscribe_duration_blocks: u32,
    /// Period of the pool-refill maintenance timer.
    pub refill_interval: Duration,
    /// Period of the nudge (UPDATE) cycle.
    pub nudge_interval: Duration,
    /// Period of the full-sync (SYNC) cycle.
    pub full_sync_interval: Duration,
    /// Immediate full-sync retries at startup.
    pub startup_sync_retries: u32,
    /// Neighbors sampled per sync cycle.
    pub fanout: usize,
    /// Bounded size of the peer banlist.
    pub ban_capacity: usize,
    /// How long a ban lasts unless traffic from the address is observed.
    pub ban_ttl: Duration,
    /// Maximum number of posts kept in the store.
    pub store_capacity: usize,
    /// Maximum accepted post text length, in bytes.
    pub max_text_len: usize,
    /// Maximum accepted clock skew into the future, in milliseconds.
    pub max_future_skew_ms: u64,
    /// Bounded attempts of the relay acquisition loop.
    pub acquisition_attempts: u32,
    /// Untrusted relays sampled by the direct-reachability probe.
    pub probe_sample: usize,
}

impl Config {
    /// Shared topic identifier: 256-bit hex hash of the protocol version
    /// string, derived by every participant independently.
    pub fn topic_hex(&self) -> String {
        crate::crypto::topic_hex(&self.protocol_version)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol_version: "agora_v1".to_string(),
            pool_target: 3,
            connect_retries: 10,
            resubscribe_interval: Duration::from_secs(30 * 60),
            subscribe_duration_blocks: 100,
            refill_interval: Duration::from_secs(5 * 60),
            nudge_interval: Duration::from_secs(30),
            full_sync_interval: Duration::from_secs(5 * 60),
            startup_sync_retries: 10,
            fanout: 3,
            ban_capacity: 100,
            ban_ttl: Duration::from_secs(5 * 60),
            store_capacity: 200,
            max_text_len: 10_000,
            max_future_skew_ms: 30_000,
            acquisition_attempts: 50,
            probe_sample: 5,
        }
    }
}
