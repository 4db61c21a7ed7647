//! Wire messages of the anti-entropy protocol.
//!
//! JSON with an explicit `command` tag. Every message is idempotent: any of
//! them may be lost, duplicated or reordered without breaking convergence.

use crate::posts::{PostBody, PostId};
use serde::{Deserialize, Serialize};

/// The four protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum WireMessage {
    /// Carry one post. Broadcast on the shared topic for new posts,
    /// point-to-point when filling a peer's gap.
    #[serde(rename = "POST")]
    Post { post: PostBody },

    /// Nudge: latest known timestamp and post count. Cheap staleness probe.
    #[serde(rename = "UPDATE")]
    Update {
        timestamp: u64,
        #[serde(rename = "numPosts")]
        num_posts: usize,
    },

    /// Full id-set exchange.
    #[serde(rename = "SYNC")]
    Sync { ids: Vec<PostId> },

    /// Ask the peer for its full id set.
    #[serde(rename = "SEND-SYNC")]
    SendSync {},
}

impl WireMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode an inbound payload. Anything that does not parse as exactly
    /// one of the four commands is dropped by the caller.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_tags_are_exact() {
        let post = WireMessage::Post {
            post: PostBody {
                text: "hi".to_string(),
                timestamp: 1_000,
            },
        };
        let json = String::from_utf8(post.to_bytes().unwrap()).unwrap();
        assert!(json.contains(r#""command":"POST""#), "{json}");

        let update = WireMessage::Update {
            timestamp: 1_000,
            num_posts: 7,
        };
        let json = String::from_utf8(update.to_bytes().unwrap()).unwrap();
        assert!(json.contains(r#""command":"UPDATE""#), "{json}");
        assert!(json.contains(r#""numPosts":7"#), "{json}");

        let sync = WireMessage::Sync { ids: vec![] };
        let json = String::from_utf8(sync.to_bytes().unwrap()).unwrap();
        assert!(json.contains(r#""command":"SYNC""#), "{json}");

        let send_sync = WireMessage::SendSync {};
        let json = String::from_utf8(send_sync.to_bytes().unwrap()).unwrap();
        assert_eq!(json, r#"{"command":"SEND-SYNC"}"#);
    }

    #[test]
    fn test_round_trip() {
        let messages = vec![
            WireMessage::Post {
                post: PostBody {
                    text: "hello".to_string(),
                    timestamp: 42,
                },
            },
            WireMessage::Update {
                timestamp: 42,
                num_posts: 3,
            },
            WireMessage::Sync {
                ids: vec!["a".repeat(64), "b".repeat(64)],
            },
            WireMessage::SendSync {},
        ];
        for msg in messages {
            let decoded = WireMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn test_unknown_command_fails_to_decode() {
        assert!(WireMessage::from_bytes(br#"{"command":"EXEC"}"#).is_err());
        assert!(WireMessage::from_bytes(br#"{"text":"no tag"}"#).is_err());
        assert!(WireMessage::from_bytes(b"not json at all").is_err());
    }

    #[test]
    fn test_post_with_extra_fields_fails_to_decode() {
        let json = br#"{"command":"POST","post":{"text":"hi","timestamp":1,"admin":true}}"#;
        assert!(WireMessage::from_bytes(json).is_err());
    }

    #[test]
    fn test_update_requires_both_fields() {
        assert!(WireMessage::from_bytes(br#"{"command":"UPDATE","timestamp":1}"#).is_err());
        assert!(WireMessage::from_bytes(br#"{"command":"UPDATE","numPosts":1}"#).is_err());
    }
}
