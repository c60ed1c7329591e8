//! `mksync` - CLI for markersync
//!
//! This binary drives the marker sync service against the local document
//! store: placing, listing, moving and deleting markers, and watching for
//! markers added by other sessions.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use serde_json::json;

use markersync::cli::{Cli, Command, ConfigCommand, PlaceCommand};
use markersync::placement::{format_distance, MarkerSymbol};
use markersync::{
    init_logging, Config, Coordinate, FsObjectStore, Marker, MarkerDraft, MarkerSyncService,
    OwnerId, RemoteId, SqliteStore, StaticAuth,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone())?;

    match cli.command {
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
        command => {
            let (store, service) = connect(cli.owner.as_deref(), &config)?;
            run(command, &service, &store, &config).await
        }
    }
}

/// Open the store and object directory and build a service for the owner
/// named on the command line, or the configured default owner.
fn connect(
    owner: Option<&str>,
    config: &Config,
) -> anyhow::Result<(Arc<SqliteStore>, MarkerSyncService)> {
    let store = Arc::new(
        SqliteStore::open_with_capacity(config.database_path(), config.listener.channel_capacity)
            .context("opening marker database")?
            .with_poll_interval(config.poll_interval()),
    );
    let owner = owner.map(OwnerId::new).or_else(|| config.default_owner());
    let auth = Arc::new(owner.map_or_else(StaticAuth::anonymous, StaticAuth::signed_in));
    let objects = Arc::new(FsObjectStore::open(config.objects_dir())?);
    let service = MarkerSyncService::new(store.clone(), objects, auth, config);
    Ok((store, service))
}

async fn run(
    command: Command,
    service: &MarkerSyncService,
    store: &SqliteStore,
    config: &Config,
) -> anyhow::Result<()> {
    match command {
        Command::Place(cmd) => handle_place(service, cmd).await,
        Command::List(cmd) => handle_list(service, cmd.json).await,
        Command::Nearby(cmd) => {
            service.refresh().await?;
            let center = Coordinate::new(cmd.latitude, cmd.longitude);
            let limit = cmd.limit.unwrap_or(service.policy().nearby_limit);
            let found = service.nearby(center, limit);
            if found.is_empty() {
                println!("No notes or photos nearby.");
            }
            for (marker, distance) in found {
                println!("{:>9}  {}", format_distance(distance), describe(&marker));
            }
            Ok(())
        }
        Command::Move(cmd) => {
            let coordinate = Coordinate::new(cmd.latitude, cmd.longitude);
            if !service.move_marker(&RemoteId::new(cmd.id.as_str()), coordinate).await {
                bail!("could not move marker {}", cmd.id);
            }
            println!("Moved {} to {coordinate}", cmd.id);
            Ok(())
        }
        Command::Delete(cmd) => {
            if !service.delete_by_id(&RemoteId::new(cmd.id.as_str())).await {
                bail!("could not delete marker {}", cmd.id);
            }
            println!("Deleted {}", cmd.id);
            Ok(())
        }
        Command::Wipe(cmd) => {
            if !cmd.yes {
                println!("This will delete all of your markers.");
                println!("Use --yes to confirm.");
                return Ok(());
            }
            service.owner()?;
            if !service.wipe_all().await {
                bail!("could not delete markers; nothing was removed");
            }
            println!("All markers deleted.");
            Ok(())
        }
        Command::Reconcile(cmd) => {
            service.refresh().await?;
            let device = Coordinate::new(cmd.latitude, cmd.longitude);
            let resynced = service.reconcile_all(device).await;
            println!(
                "{resynced} of {} markers restored to their saved location.",
                service.markers().len()
            );
            Ok(())
        }
        Command::Watch => handle_watch(service).await,
        Command::Register(cmd) => {
            let profile = service.register_owner(&cmd.email).await?;
            println!(
                "Registered {} <{}> at {}",
                profile.owner_id,
                profile.email,
                profile.created_at.to_rfc3339()
            );
            Ok(())
        }
        Command::Status(cmd) => handle_status(service, store, config, cmd.json).await,
        Command::Config(cmd) => handle_config(config, cmd),
    }
}

async fn handle_place(service: &MarkerSyncService, cmd: PlaceCommand) -> anyhow::Result<()> {
    service.refresh().await?;
    let coordinate = cmd.coordinate();

    let marker = match cmd.kind.to_kind(cmd.note.clone()) {
        Some(kind) => service.place_marker(MarkerDraft::new(coordinate, kind)).await?,
        None => {
            let mut images = Vec::with_capacity(cmd.images.len());
            for path in &cmd.images {
                images.push(
                    tokio::fs::read(path)
                        .await
                        .with_context(|| format!("reading image {}", path.display()))?,
                );
            }
            service.place_photo(coordinate, images).await?
        }
    };

    let place = service.describe_location(coordinate).await;
    println!("Placed {} at {place}", describe(&marker));
    Ok(())
}

async fn handle_list(service: &MarkerSyncService, as_json: bool) -> anyhow::Result<()> {
    service.refresh().await?;
    let markers = service.markers();

    if as_json {
        let list: Vec<_> = markers.iter().map(marker_json).collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    if markers.is_empty() {
        println!("No markers.");
    }
    for marker in &markers {
        println!("{}", describe(marker));
    }
    Ok(())
}

async fn handle_watch(service: &MarkerSyncService) -> anyhow::Result<()> {
    service.refresh().await?;
    let subscription = service
        .start_listening_with(|marker| println!("+ {}", describe(marker)))
        .await?;

    println!("Watching for new markers (Ctrl-C to stop)...");
    tokio::signal::ctrl_c().await?;
    subscription.cancel_and_wait().await;
    Ok(())
}

async fn handle_status(
    service: &MarkerSyncService,
    store: &SqliteStore,
    config: &Config,
    as_json: bool,
) -> anyhow::Result<()> {
    let stats = store.stats()?;
    let owner = service.owner().ok();
    let (marker_count, profile) = match &owner {
        Some(owner) => (
            Some(store.count(&owner.markers_collection())?),
            service.owner_profile().await?,
        ),
        None => (None, None),
    };

    if as_json {
        let status = json!({
            "database_path": config.database_path(),
            "objects_dir": config.objects_dir(),
            "total_documents": stats.total_documents,
            "collections": stats.collections,
            "db_size_bytes": stats.db_size_bytes,
            "owner": owner.as_ref().map(ToString::to_string),
            "markers": marker_count,
            "email": profile.as_ref().map(|p| p.email.as_str()),
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("mksync status");
    println!("-------------");
    println!("Database:      {}", config.database_path().display());
    println!("Objects:       {}", config.objects_dir().display());
    println!("Documents:     {}", stats.total_documents);
    println!("Size:          {} bytes", stats.db_size_bytes);
    match owner {
        Some(owner) => {
            println!("Owner:         {owner}");
            println!("Markers:       {}", marker_count.unwrap_or(0));
            match profile {
                Some(profile) => println!("Email:         {}", profile.email),
                None => println!("Email:         (not registered)"),
            }
        }
        None => println!("Owner:         (none, use --owner)"),
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Objects dir:        {}", config.objects_dir().display());
                println!();
                println!("[Placement]");
                println!(
                    "  Drift threshold:    {}",
                    format_distance(config.placement.drift_threshold_meters)
                );
                println!(
                    "  Nearby radius:      {}",
                    format_distance(config.placement.nearby_radius_meters)
                );
                println!("  Nearby limit:       {}", config.placement.nearby_limit);
                println!();
                println!("[Listener]");
                println!("  Channel capacity:   {}", config.listener.channel_capacity);
                println!("  Poll interval:      {} ms", config.listener.poll_interval_ms);
                println!();
                println!("[Session]");
                println!(
                    "  Owner:              {}",
                    config.session.owner_id.as_deref().unwrap_or("(none)")
                );
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}

fn describe(marker: &Marker) -> String {
    let symbol = MarkerSymbol::for_kind(marker.kind());
    let mut line = format!(
        "{}  {:<8} {} [{}]",
        marker.id(),
        marker.kind().tag(),
        marker.coordinate(),
        symbol.glyph
    );
    if let Some(note) = marker.note() {
        line.push_str(&format!("  \"{note}\""));
    }
    for url in marker.image_urls() {
        line.push_str(&format!("\n    {url}"));
    }
    line
}

fn marker_json(marker: &Marker) -> serde_json::Value {
    json!({
        "id": marker.id().to_string(),
        "type": marker.kind().tag(),
        "latitude": marker.coordinate().latitude,
        "longitude": marker.coordinate().longitude,
        "note": marker.note(),
        "imageUrls": marker.image_urls(),
    })
}
