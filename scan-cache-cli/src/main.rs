use std::time::Duration;

use clap::Parser;
use scan_cache::{CacheConfig, DeleteOutcome, EntryState, ScanCacheManager, ScanDescriptor, ScanId};
use tokio::sync::broadcast::error::RecvError;
use tracing::{Level, error, info, warn};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod cli;
mod error;
mod utils;

use cli::{CliArgs, Command};
use error::AppError;
use utils::progress::ProgressManager;
use utils::{format_bytes, parse_headers, parse_size};

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    let args = CliArgs::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    // Log lines go through the indicatif writer so they suspend progress bars
    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(LevelFilter::from_level(log_level))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(indicatif_layer.get_stderr_writer())
                .with_ansi(true),
        )
        .with(indicatif_layer)
        .try_init()
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    let config = build_config(&args)?;
    info!(root = ?config.cache_root(), "Using scan cache");

    let manager = ScanCacheManager::new(config)?;

    match args.command {
        Command::Fetch {
            id,
            url,
            no_progress,
        } => fetch(&manager, id, &url, no_progress).await,
        Command::Status { ids } => {
            for id in ids {
                println!("{id}\t{}", state_label(manager.entry_state(&id).await));
            }
            Ok(())
        }
        Command::List => list(&manager).await,
        Command::Delete { id } => {
            match manager.delete_cached(&id).await? {
                DeleteOutcome::Deleted(n) => println!("Deleted {n} file(s) for scan {id}"),
                DeleteOutcome::EmptyDirectory | DeleteOutcome::NotFound => {
                    println!("Scan {id} is not cached")
                }
            }
            Ok(())
        }
        Command::Filter {
            site_id,
            slab_id,
            listing,
        } => {
            let raw = tokio::fs::read(&listing).await?;
            let scans: Vec<ScanDescriptor> = serde_json::from_slice(&raw)
                .map_err(|e| AppError::InvalidInput(format!("{}: {e}", listing.display())))?;
            for scan in manager.cached_scans(site_id, slab_id, &scans).await {
                println!("{}\t{}\t{}", scan.identifier(site_id, slab_id), scan.timestamp, scan.url);
            }
            Ok(())
        }
    }
}

fn build_config(args: &CliArgs) -> Result<CacheConfig, AppError> {
    let fragment_size = usize::try_from(parse_size(&args.fragment_size)?)
        .map_err(|_| AppError::InvalidInput("Fragment size too large".to_string()))?;
    if fragment_size == 0 {
        return Err(AppError::InvalidInput(
            "Fragment size must be greater than zero".to_string(),
        ));
    }

    let mut builder = CacheConfig::builder()
        .with_fragment_size(fragment_size)
        .with_timeout(Duration::from_secs(args.timeout))
        .with_connect_timeout(Duration::from_secs(args.connect_timeout))
        .with_read_timeout(Duration::from_secs(args.read_timeout))
        .with_headers(parse_headers(&args.headers))
        .with_system_proxy(!args.no_proxy);

    if let Some(root) = &args.root {
        builder = builder.with_app_data_root(root);
    }
    Ok(builder.build())
}

fn state_label(state: EntryState) -> &'static str {
    match state {
        EntryState::Absent => "absent",
        EntryState::Cached => "cached",
        EntryState::Downloading => "downloading",
        EntryState::Corrupt => "corrupt",
    }
}

async fn fetch(
    manager: &ScanCacheManager,
    id: ScanId,
    url: &str,
    no_progress: bool,
) -> Result<(), AppError> {
    let mut events = manager.subscribe();
    let progress_task = tokio::spawn(async move {
        let mut progress = if no_progress {
            ProgressManager::new_disabled()
        } else {
            ProgressManager::new()
        };
        loop {
            match events.recv().await {
                Ok(event) => progress.handle_event(&event),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "Progress display fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let result = tokio::select! {
        loaded = manager.load_or_fetch(id, url) => loaded.map_err(AppError::from),
        _ = tokio::signal::ctrl_c() => {
            info!(scan = %id, "Interrupt received, cancelling download");
            manager.cancel(&id).await;
            Err(AppError::Interrupted)
        }
    };
    progress_task.abort();

    let content = result?;
    println!(
        "Loaded scan {id} ({}) from {:?}: {}",
        format_bytes(content.data.len() as u64),
        content.origin,
        content.path.display()
    );
    Ok(())
}

async fn list(manager: &ScanCacheManager) -> Result<(), AppError> {
    let cached = manager.list_cached().await?;
    if cached.is_empty() {
        println!("No cached scans");
        return Ok(());
    }

    for id in cached {
        let size = match manager.store().read_metadata(&id).await {
            Some(meta) => format_bytes(meta.size),
            None => "unknown size".to_string(),
        };
        println!("{id}\t{}\t{size}", state_label(manager.entry_state(&id).await));
    }
    Ok(())
}
