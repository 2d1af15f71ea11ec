use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

use croft::clock::SystemClock;
use croft::feed::{FeedEvent, ReplayFeed};
use croft::runtime::{self, Command};
use croft::{EngineEvent, GrowthConfig};

/// Replays a scripted feed of authority messages against the tile engine and
/// prints every observer notification as it happens.
#[derive(Debug, Parser)]
#[command(author, version, about = "Croft tile engine replay harness")]
struct Cli {
    /// Path to the growth-curve YAML file
    #[arg(long, default_value = "configs/growth.yaml")]
    growth_config: PathBuf,

    /// Path to the replay feed YAML file
    #[arg(long, default_value = "feeds/demo.yaml")]
    feed: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let growth = GrowthConfig::from_yaml(&cli.growth_config)
        .with_context(|| format!("loading growth config {}", cli.growth_config.display()))?;
    let feed = ReplayFeed::load(&cli.feed, Utc::now())?;
    info!(feed = %feed.name, events = feed.events.len(), "starting replay");

    let engine = runtime::spawn(Arc::new(SystemClock), growth);
    let printer = tokio::spawn(print_events(BroadcastStream::new(engine.subscribe())));

    let replay = async {
        let started = tokio::time::Instant::now();
        for event in feed.events {
            tokio::time::sleep_until(started + Duration::from_millis(event.at_ms())).await;
            let command = match event {
                FeedEvent::Snapshot { tiles, .. } => Command::InitialSnapshot { tiles },
                FeedEvent::Update { x, y, fields, .. } => Command::TileUpdated { x, y, fields },
            };
            if !engine.apply(command).await {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(feed.settle_ms)).await;
    };

    tokio::select! {
        () = replay => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted, shutting down"),
    }

    engine.shutdown().await;
    let _ = printer.await;
    info!("replay finished");
    Ok(())
}

async fn print_events(mut events: BroadcastStream<EngineEvent>) {
    while let Some(event) = events.next().await {
        let Ok(event) = event else {
            // lagged; the next item resumes from the current position
            continue;
        };
        match event {
            EngineEvent::RentDue { coord, due_at } => {
                println!("[due]      rent payable on tile {coord} (since {due_at})");
            }
            EngineEvent::RentSnapshotChanged(snapshot) => {
                println!("[snapshot] {} lease(s) tracked", snapshot.len());
            }
            EngineEvent::CropStageAdvanced {
                coord,
                stage,
                next_stage_at,
            } => match next_stage_at {
                Some(next) => {
                    println!("[stage]    tile {coord} reached stage {stage}, next at {next}");
                }
                None => println!("[stage]    tile {coord} reached final stage {stage}"),
            },
            EngineEvent::CropSnapshotChanged(snapshot) => {
                println!("[snapshot] {} crop(s) tracked", snapshot.len());
            }
            EngineEvent::TileChanged {
                coord,
                needs_visual_refresh,
                ..
            } => {
                println!("[tile]     {coord} changed (visual refresh: {needs_visual_refresh})");
            }
        }
    }
}
