//! Discovery and verification of trustworthy relay nodes.
//!
//! The overlay assigns each client identity to a relay by consistent
//! hashing. Nothing forces that relay to be one we are willing to bootstrap
//! through, so discovery searches identifier space until the assigned relay
//! satisfies a trust predicate, then verifies the network really routes the
//! identity there.

pub mod discovery;
pub mod ring;

pub use discovery::{RelayDiscovery, TrustedIdentityGenerator};
pub use ring::RelayRing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 64-character hex node identifier on the overlay's hashing ring.
pub type NodeId = String;

/// A relay node as returned by neighbor queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayNode {
    pub id: NodeId,
    /// Secure-websocket domain clients reach this relay through; the trust
    /// attribute the default predicate inspects.
    pub ws_domain: Option<String>,
    /// Out-of-band JSON-RPC endpoint.
    pub rpc_endpoint: String,
}

/// Errors of the discovery process. A trust violation excludes the relay
/// permanently but is never fatal to the process.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("no trusted relay known")]
    NoTrustedRelay,
    #[error("acquisition attempts exhausted after {0} tries")]
    AttemptsExhausted(u32),
    #[error("route verification failed for relay {id}: {reason}")]
    VerificationFailed { id: NodeId, reason: String },
    #[error("rpc failed: {0}")]
    Rpc(String),
}

/// Minimal node state returned by the liveness probe.
#[derive(Debug, Clone)]
pub struct NodeState {
    pub timestamp_secs: u64,
}

/// Out-of-band RPC surface of relay nodes.
#[async_trait]
pub trait RelayRpc: Send + Sync {
    /// Liveness/state probe of the node behind `endpoint`.
    async fn node_state(&self, endpoint: &str) -> Result<NodeState, RelayError>;

    /// Neighbor list of the node behind `endpoint`.
    async fn neighbors(&self, endpoint: &str) -> Result<Vec<RelayNode>, RelayError>;

    /// The node id the network actually assigns to `address`.
    async fn resolve_address_route(
        &self,
        address: &str,
        endpoint: &str,
    ) -> Result<NodeId, RelayError>;
}

/// Predicate deciding whether a relay is safe to bootstrap through.
pub trait RelayTrust: Send + Sync {
    fn is_trusted(&self, node: &RelayNode) -> bool;
}

/// Default predicate: the relay is reachable over a secure-websocket domain
/// containing a controlled fragment.
pub struct DomainFragmentTrust {
    fragment: String,
}

impl DomainFragmentTrust {
    pub fn new(fragment: &str) -> Self {
        Self {
            fragment: fragment.to_string(),
        }
    }
}

impl RelayTrust for DomainFragmentTrust {
    fn is_trusted(&self, node: &RelayNode) -> bool {
        node.ws_domain
            .as_deref()
            .map(|domain| domain.contains(&self.fragment))
            .unwrap_or(false)
    }
}
