//! voxreplay - replays cache workload scripts against a voxcache instance

mod handler;
mod payload;
mod script;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use voxcache::CacheConfig;

use crate::handler::{read_script, CommandHandler};
use crate::payload::ReplayCache;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Script to replay (reads stdin when omitted)
    script: Option<PathBuf>,

    /// Cache budget in bytes (overrides VOXCACHE_MAX_CACHE_SIZE)
    #[arg(short, long)]
    max_cache_size: Option<u64>,

    /// Print final statistics as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = CacheConfig::from_env()?;
    if let Some(bytes) = args.max_cache_size {
        config = config.with_max_cache_size(bytes);
    }
    info!(
        "Starting voxreplay v{} with a {} byte budget",
        env!("CARGO_PKG_VERSION"),
        config.max_cache_size
    );

    let cache = ReplayCache::new(config)?;

    let mut events = cache.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(event = event.name(), key = event.key(), "cache event"),
                Err(RecvError::Lagged(missed)) => warn!(missed, "event log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let script = read_script(args.script.as_deref()).await?;
    let mut handler = CommandHandler::new(cache);

    let stdout = std::io::stdout();
    let errors = handler.replay(&script, &mut stdout.lock()).await?;

    let snapshot = handler.cache().snapshot();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!(
            "\n{} of {} bytes used, {} images, {} volumes, {} geometries",
            snapshot.cache_size,
            snapshot.max_cache_size,
            snapshot.images,
            snapshot.volumes,
            snapshot.geometries
        );
        println!(
            "hit ratio {:.2}, {} evictions, {} rejections",
            handler.cache().stats().hit_ratio(),
            snapshot.counters.evictions,
            snapshot.counters.rejections
        );
    }

    if errors > 0 {
        warn!(errors, "script finished with errors");
    }
    Ok(())
}
