//! Secure shuffling and sampling.
//!
//! Neighbor selection must be uniform and unpredictable, so the RNG is the
//! operating system's, not a seeded PRNG.

use rand::rngs::OsRng;
use rand::Rng;

/// In-place Fisher-Yates shuffle with OS-backed entropy.
pub fn shuffle<T>(items: &mut [T]) {
    let mut rng = OsRng;
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}

/// Uniform sample of `n` items without replacement.
///
/// Returns a copy of the whole slice when `n >= items.len()`.
pub fn sample<T: Clone>(items: &[T], n: usize) -> Vec<T> {
    let mut copy = items.to_vec();
    if n >= copy.len() {
        return copy;
    }
    shuffle(&mut copy);
    copy.truncate(n);
    copy
}

/// 256 bits of OS entropy as 64-character lowercase hex, used as candidate
/// connection identifiers during relay discovery.
pub fn random_hex_256() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill(&mut bytes[..]);
    hex::encode(bytes)
}
