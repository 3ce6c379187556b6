use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, trace};

use marquee::cache::{CacheStore, SqliteStorage};
use marquee::fetch::BackgroundFetchService;
use marquee::graceful::GracefulUpdateCoordinator;
use marquee::scheduler::{Frame, LiveSignalBoard, ModeCollaborator, RotationScheduler};
use marquee::{clock, config, logging};

#[derive(Parser, Debug)]
#[command(name = "marquee")]
#[command(about = "Rotating content controller for LED matrix displays")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/marquee/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Pin a single mode on startup instead of rotating
  #[arg(short, long)]
  mode: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.logging)?;

  let cache = if config.cache.persist {
    let store = CacheStore::with_storage(&config.cache, Arc::new(SqliteStorage::open()?));
    store.warm_start();
    Arc::new(store)
  } else {
    Arc::new(CacheStore::new(&config.cache))
  };

  let (fetch, completions) = BackgroundFetchService::new(&config.fetch, Arc::clone(&cache));
  let graceful = Arc::new(GracefulUpdateCoordinator::new(&config.graceful));
  let live = Arc::new(LiveSignalBoard::new());

  // Data-source adapters register their modes here; the built-in clock is
  // always available as the rotation fallback.
  let collaborators: Vec<Arc<dyn ModeCollaborator>> = vec![Arc::new(clock::ClockMode::new())];

  let scheduler = RotationScheduler::new(
    &config,
    collaborators,
    Arc::clone(&cache),
    fetch,
    graceful,
    live,
  );

  if let Some(mode) = args.mode {
    scheduler.handle().request_override(mode);
  }

  // Stand-in for the pixel pipeline: the matrix driver consumes frames
  // from this channel.
  let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<Frame>();
  tokio::spawn(async move {
    while let Some(frame) = frame_rx.recv().await {
      trace!(mode_id = %frame.mode_id, text = %frame.text, "Frame");
    }
  });

  info!("marquee starting");
  scheduler.run(completions, frame_tx).await
}
