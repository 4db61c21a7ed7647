//! The bounded, content-addressed, timestamp-ordered working set of posts.

pub mod store;

pub use store::{PostStore, StoreEvent};

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// 64-character lowercase hex of the post's content hash.
pub type PostId = String;

/// Wire shape of a post body: exactly `text` and `timestamp`, nothing else.
/// Payloads carrying extra fields fail to decode and are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PostBody {
    pub text: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// A stored post with its assigned content-addressed id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub text: String,
    pub timestamp: u64,
    pub id: PostId,
}

impl Post {
    /// The wire body of this post (id is recomputed by every receiver).
    pub fn body(&self) -> PostBody {
        PostBody {
            text: self.text.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
