//! Hashing and secure randomness primitives.
//!
//! Content ids, the shared topic identifier and neighbor sampling all come
//! from here. Everything uses OS-backed entropy; nothing here is seedable.

pub mod hash;
pub mod sample;

pub use hash::{post_id, sha256_hex, topic_hex};
pub use sample::{random_hex_256, sample, shuffle};
