//! Runs the preview crawler against a set of simulated rooms and prints their previews.
//!
//! Each simulated room buries its newest message further back in history than the last,
//! such that the crawler must backfill progressively more pages, and the deepest rooms
//! exceed the lookback bound and end up without a preview.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use ruma::{OwnedRoomId, UserId};
use serde_json::json;
use tracing::{info, Level};

use room_preview_store::{
    event::event_types, InMemoryTimeline, PaginationStats, PreviewContext, PreviewGeneratorTable,
    PreviewStore, PreviewStoreConfig, RoomRef, TagId, TimelineEvent,
};

#[derive(Parser, Debug)]
struct Cli {
    /// The number of simulated rooms.
    #[clap(short, long, default_value_t = 5)]
    rooms: usize,

    /// How many events further back each successive room's newest message is.
    #[clap(long, default_value_t = 30)]
    depth_step: usize,

    /// The number of newest events initially loaded in each room.
    #[clap(long, default_value_t = 10)]
    initially_loaded: usize,

    /// Simulated latency of each pagination request, in milliseconds.
    #[clap(long, default_value_t = 20)]
    latency_ms: u64,

    /// A JSON file with the preview store config. Defaults are used if it doesn't exist.
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging output.
    #[clap(short, long, action)]
    verbose: bool,
}

/// Builds a room whose newest `m.room.message` is followed by `depth` unpreviewable events.
fn simulated_room(index: usize, depth: usize, cli: &Cli, stats: &Arc<PaginationStats>) -> Result<RoomRef> {
    let room_id = OwnedRoomId::try_from(format!("!room{index}:example.org"))
        .context("invalid simulated room ID")?;
    let sender = UserId::parse(format!("@user{index}:example.org"))
        .context("invalid simulated user ID")?;

    let mut history = vec![
        TimelineEvent::new(
            room_id.clone(),
            sender.clone(),
            event_types::ROOM_MESSAGE,
            json!({ "msgtype": "m.text", "body": format!("hello from room {index}") }),
        )
        .with_sender_display_name(format!("User {index}")),
    ];
    history.extend((0..depth).map(|_| TimelineEvent::new(
        room_id.clone(),
        sender.clone(),
        "org.example.unpreviewable",
        json!({}),
    )));

    let timeline = InMemoryTimeline::new(room_id, history, cli.initially_loaded)
        .with_stats(Arc::clone(stats))
        .with_latency(Duration::from_millis(cli.latency_ms));
    Ok(Arc::new(timeline))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let config = match &cli.config {
        Some(path) => PreviewStoreConfig::load_from_file(path)?,
        None => PreviewStoreConfig::default(),
    };
    let store = PreviewStore::for_current_runtime(config, PreviewGeneratorTable::with_default_generators())?;
    let updates = store.subscribe_channel();

    let stats = Arc::new(PaginationStats::default());
    let rooms = (0..cli.rooms)
        .map(|i| simulated_room(i, i * cli.depth_step, &cli, &stats))
        .collect::<Result<Vec<_>>>()?;

    let start = std::time::Instant::now();
    store.on_ready(rooms.iter().cloned());
    info!("Backfilling rooms: {:?}", store.pending_rooms());
    store.wait_until_idle().await;
    info!(
        "Crawler finished in {:?}: {} pagination requests, at most {} in flight, {} preview updates",
        start.elapsed(),
        stats.total_requests(),
        stats.max_in_flight(),
        updates.try_iter().count(),
    );

    let dm = PreviewContext::Tag(TagId::direct_messages());
    for room in &rooms {
        let any = store.preview_for_room(room, &PreviewContext::Any);
        let in_dm = store.preview_for_room(room, &dm);
        println!(
            "{}: {} loaded events, preview: {:?}, as a DM: {:?}",
            room.room_id(),
            room.loaded_event_count(),
            any,
            in_dm,
        );
    }
    Ok(())
}
