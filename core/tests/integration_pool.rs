//! Transport pool behavior over the in-memory overlay: startup racing,
//! failover, refill and identity-pinned replies.

use agora_core::transport::memory::{MemoryGenerator, MemoryOverlay};
use agora_core::transport::{ConnectionGenerator, OverlayConnection, TransportError};
use agora_core::{Config, TransportPool};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

fn config() -> Config {
    Config::default()
}

#[tokio::test]
async fn test_pool_comes_up_and_subscribes_every_connection() {
    let overlay = MemoryOverlay::new();
    let config = config();
    let generator = Arc::new(MemoryGenerator::new(overlay.clone(), "node"));
    let (pool, _rx) = TransportPool::new(generator, config.topic_hex(), &config);

    pool.start().await.expect("start");
    settle().await;
    assert_eq!(pool.len(), 3);

    let subs = pool.subscribers().await.expect("query").union();
    for addr in pool.addresses() {
        assert!(subs.contains(&addr), "{addr} subscribed to the shared topic");
    }
}

#[tokio::test]
async fn test_start_succeeds_while_two_of_three_attempts_fail() {
    struct MostlyDown {
        inner: MemoryGenerator,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ConnectionGenerator for MostlyDown {
        async fn generate(&self) -> Result<Arc<dyn OverlayConnection>, TransportError> {
            // Only every third attempt gets through.
            if self.calls.fetch_add(1, Ordering::SeqCst) % 3 != 2 {
                return Err(TransportError::ConnectFailed("congested".to_string()));
            }
            self.inner.generate().await
        }
    }

    let overlay = MemoryOverlay::new();
    let config = config();
    let generator = Arc::new(MostlyDown {
        inner: MemoryGenerator::new(overlay, "node"),
        calls: AtomicU32::new(0),
    });
    let (pool, _rx) = TransportPool::new(generator, config.topic_hex(), &config);

    pool.start().await.expect("one success is enough");
    settle().await;
    assert!(pool.len() >= 1);
}

#[tokio::test]
async fn test_publish_fails_over_to_surviving_connection() {
    let overlay = MemoryOverlay::new();
    let config = config();
    let generator = Arc::new(MemoryGenerator::new(overlay.clone(), "node"));
    let (pool, _rx) = TransportPool::new(generator, config.topic_hex(), &config);
    pool.start().await.expect("start");
    settle().await;

    let listener = overlay.connect("listener");
    listener
        .subscribe(&config.topic_hex(), 1)
        .await
        .expect("subscribe");
    let mut listener_rx = listener.take_inbound().expect("stream");

    // Two of three die; publish still succeeds via the survivor.
    let addrs = pool.addresses();
    overlay.kill(&addrs[0]);
    overlay.kill(&addrs[1]);
    pool.publish(b"still here").await.expect("survivor delivers");

    let got = listener_rx.recv().await.expect("delivered");
    assert_eq!(got.payload, b"still here");

    // The dead connections were discarded and replaced.
    settle().await;
    assert_eq!(pool.len(), 3);
    assert!(!pool.addresses().contains(&addrs[0]));
    assert!(!pool.addresses().contains(&addrs[1]));
}

#[tokio::test]
async fn test_inbound_streams_fan_into_one_receiver() {
    let overlay = MemoryOverlay::new();
    let config = config();
    let generator = Arc::new(MemoryGenerator::new(overlay.clone(), "node"));
    let (pool, mut rx) = TransportPool::new(generator, config.topic_hex(), &config);
    pool.start().await.expect("start");
    settle().await;

    let sender = overlay.connect("sender");
    for addr in pool.addresses() {
        sender.send(&addr, b"direct").await.expect("send");
    }
    settle().await;

    let mut seen = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        assert_eq!(msg.src, "sender");
        assert_eq!(msg.payload, b"direct");
        seen.push(msg.dest);
    }
    seen.sort();
    let mut addrs = pool.addresses();
    addrs.sort();
    assert_eq!(seen, addrs, "one message per pooled identity");
}

#[tokio::test]
async fn test_send_failure_keeps_connection_pooled() {
    let overlay = MemoryOverlay::new();
    let config = config();
    let generator = Arc::new(MemoryGenerator::new(overlay.clone(), "node"));
    let (pool, _rx) = TransportPool::new(generator, config.topic_hex(), &config);
    pool.start().await.expect("start");
    settle().await;

    let before = pool.addresses();
    let err = pool
        .send(&"nobody-home".to_string(), b"x")
        .await
        .expect_err("unknown destination");
    assert!(matches!(err, TransportError::SendFailed { .. }));

    // The failure belongs to the destination; the pool is untouched.
    settle().await;
    let mut after = pool.addresses();
    let mut before = before;
    before.sort();
    after.sort();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_resubscribe_drops_dead_connections() {
    let overlay = MemoryOverlay::new();
    let config = config();
    let generator = Arc::new(MemoryGenerator::new(overlay.clone(), "node"));
    let (pool, _rx) = TransportPool::new(generator, config.topic_hex(), &config);
    pool.start().await.expect("start");
    settle().await;

    let dead = pool.addresses()[0].clone();
    overlay.kill(&dead);
    pool.resubscribe_all().await;
    settle().await;

    assert_eq!(pool.len(), 3, "replacement filled the slot");
    assert!(!pool.addresses().contains(&dead));
}
