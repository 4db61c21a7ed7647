//! agora-core — serverless peer-to-peer group chat engine.
//!
//! Participants exchange short text posts over a public overlay pub/sub
//! network with no central server and no delivery guarantees. The engine
//! keeps a redundant pool of overlay connections, a bounded content-addressed
//! post store, and runs an anti-entropy protocol that drives the post sets of
//! all reachable peers toward equality despite loss, duplication and
//! reordering.
//!
//! Component map, leaves first:
//! - [`crypto`]: content hashing and secure shuffling/sampling
//! - [`transport`]: overlay primitives, the redundant connection pool and
//!   the peer banlist
//! - [`relay`]: discovery and verification of trustworthy relay nodes
//! - [`posts`]: the bounded, timestamp-ordered post store
//! - [`sync`]: the anti-entropy engine a UI talks to

pub mod config;
pub mod crypto;
pub mod posts;
pub mod relay;
pub mod sync;
pub mod transport;

pub use config::Config;
pub use posts::{Post, PostId, PostStore, StoreEvent};
pub use sync::{EngineStatus, SyncEngine};
pub use transport::{PeerBanlist, TransportPool};

use thiserror::Error;

/// Top-level error for engine composition.
///
/// Individual modules carry their own error enums; this one exists so a
/// caller wiring the whole engine together can use a single `Result` type.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Transport(#[from] transport::TransportError),
    #[error(transparent)]
    Relay(#[from] relay::RelayError),
    #[error(transparent)]
    Sync(#[from] sync::SyncError),
}
