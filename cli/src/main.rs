// agora-cli — local demo room for the agora sync engine.
//
// Runs a handful of peers over the in-memory overlay in one process, so the
// whole anti-entropy loop can be watched from a terminal without touching a
// real network.

use agora_core::sync::SyncEngine;
use agora_core::transport::memory::{MemoryGenerator, MemoryOverlay};
use agora_core::transport::RetryingGenerator;
use agora_core::{Config, PeerBanlist, PostStore, StoreEvent, TransportPool};
use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use clap::{Parser, Subcommand};
use colored::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tracing::info;

#[derive(Parser)]
#[command(name = "agora")]
#[command(about = "Agora — serverless peer-to-peer group chat", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an interactive room with simulated peers
    Demo {
        /// Number of simulated peers in the room
        #[arg(short, long, default_value = "2")]
        peers: usize,
        /// Nickname prefixed to your messages
        #[arg(short, long, default_value = "you")]
        name: String,
    },
    /// Print the shared topic identifier
    Topic {
        /// Protocol version to derive the topic from
        #[arg(short, long)]
        version: Option<String>,
    },
    /// Compute the content-addressed id of a post
    Id {
        text: String,
        /// Milliseconds since the Unix epoch
        timestamp: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Demo { peers, name } => cmd_demo(peers, &name).await,
        Commands::Topic { version } => {
            let mut config = Config::default();
            if let Some(version) = version {
                config.protocol_version = version;
            }
            println!("{}", config.topic_hex());
            Ok(())
        }
        Commands::Id { text, timestamp } => {
            println!("{}", agora_core::crypto::post_id(&text, timestamp));
            Ok(())
        }
    }
}

async fn cmd_demo(peers: usize, name: &str) -> Result<()> {
    let overlay = MemoryOverlay::new();
    let config = Config::default();

    for i in 0..peers {
        let engine = spawn_engine(&overlay, &format!("peer-{i}"), &config).await?;
        tokio::spawn(simulate(engine, i));
    }

    let engine = spawn_engine(&overlay, name, &config).await?;
    info!("room online with {peers} simulated peers");

    let mut events = engine.store().subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let StoreEvent::Added(post) = event {
                println!("{} {}", format!("[{}]", clock(post.timestamp)).dimmed(), post.text);
            }
        }
    });

    let mut status = engine.status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow();
            eprintln!("{} {current:?}", "status:".dimmed());
        }
    });

    println!("{}", "Type a message and press enter. Ctrl-D quits.".bold());
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if let Err(e) = engine.broadcast(&format!("{name}: {text}")).await {
            eprintln!("{} {e}", "send failed:".red());
        }
    }
    Ok(())
}

async fn spawn_engine(
    overlay: &MemoryOverlay,
    name: &str,
    config: &Config,
) -> Result<Arc<SyncEngine>> {
    let generator = Arc::new(RetryingGenerator::new(
        Arc::new(MemoryGenerator::new(overlay.clone(), name)),
        config.connect_retries,
    ));
    let (pool, inbound) = TransportPool::new(generator, config.topic_hex(), config);
    let store = Arc::new(PostStore::from_config(config));
    let banlist = Arc::new(PeerBanlist::new(config.ban_capacity, config.ban_ttl));
    let engine = Arc::new(SyncEngine::new(store, pool, banlist, config));
    engine
        .start(inbound)
        .await
        .with_context(|| format!("starting engine for {name}"))?;
    Ok(engine)
}

/// A simulated peer that authors a post now and then.
async fn simulate(engine: Arc<SyncEngine>, index: usize) {
    let phrases = [
        "anyone around?",
        "the overlay is quiet today",
        "still syncing fine over here",
        "ping from the other side of the ring",
    ];
    let mut tick = tokio::time::interval(Duration::from_secs(20 + 7 * index as u64));
    tick.tick().await;
    loop {
        tick.tick().await;
        let text = format!("peer-{index}: {}", phrases[index % phrases.len()]);
        if engine.broadcast(&text).await.is_err() {
            break;
        }
    }
}

fn clock(timestamp_ms: u64) -> String {
    Local
        .timestamp_millis_opt(timestamp_ms as i64)
        .single()
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string())
}
