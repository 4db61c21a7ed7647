//! Overlay transport: the provided network primitives, the redundant
//! connection pool that multiplexes them, and the peer banlist.

pub mod banlist;
pub mod memory;
pub mod overlay;
pub mod pool;

pub use banlist::PeerBanlist;
pub use overlay::{
    Address, ConnectionGenerator, Inbound, OverlayConnection, RetryingGenerator,
    SubscriberLists, TransportError,
};
pub use pool::TransportPool;
