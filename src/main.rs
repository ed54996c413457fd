//! Command-line entry point for the matchmaking coordinator
//!
//! Runs the coordinator against the in-process directory and loopback
//! transport. Events are printed as JSON lines.
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use matchmaking::session::CoordinatorEvent;
use matchmaking::{
    CoordinatorConfig, HostSettings, InMemoryDirectory, LoopbackTransport, SearchQuery, SearchResult,
    SessionCoordinator,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Game session matchmaking coordinator", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Host a session and keep it advertised until Ctrl-C
    Host {
        /// Match type advertised to searchers
        #[arg(short, long)]
        match_type: Option<String>,

        /// Public connection slots
        #[arg(short = 'n', long)]
        max_players: Option<u32>,
    },

    /// Seed a few sessions and print what a search returns
    Browse {
        /// Only list sessions with this match type
        #[arg(short, long)]
        match_type: Option<String>,

        /// Number of fake remote sessions to seed
        #[arg(long, default_value = "5")]
        seed: u8,
    },

    /// Host, search, join, start and tear down in one run
    Demo,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<CoordinatorConfig> {
    match path {
        Some(path) => CoordinatorConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(CoordinatorConfig::default()),
    }
}

fn build(
    config: CoordinatorConfig,
) -> anyhow::Result<(SessionCoordinator, Arc<InMemoryDirectory>, Arc<LoopbackTransport>)> {
    let directory = Arc::new(InMemoryDirectory::new());
    let transport = Arc::new(LoopbackTransport::new());
    let coordinator = SessionCoordinator::builder(config)
        .directory(directory.clone())
        .transport(transport.clone())
        .build()?;
    Ok((coordinator, directory, transport))
}

/// Print every coordinator event as a JSON line
fn print_events(coordinator: &SessionCoordinator) {
    let mut events = coordinator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event);
        }
    });
}

fn print_event(event: &CoordinatorEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!("Could not serialize {} event: {}", event.event_name(), e),
    }
}

fn seed_remotes(directory: &InMemoryDirectory, config: &CoordinatorConfig, count: u8, match_type: &str) {
    for host in 0..count {
        let mut descriptor = HostSettings::new(config, 4, match_type)
            .with_name(format!("Remote {}", host + 1))
            .to_descriptor();
        descriptor.owner = format!("player-{}", host + 1);
        descriptor.host_endpoint = format!("10.0.0.{}:7777", host + 2);
        descriptor.occupancy = u32::from(host) % 4;
        directory.seed_remote(descriptor, Duration::from_millis(20 + u64::from(host) * 17 % 90));
    }
}

async fn host(config: CoordinatorConfig, match_type: Option<String>, max_players: Option<u32>) -> anyhow::Result<()> {
    let mut settings = HostSettings::from_config(&config);
    if let Some(match_type) = match_type {
        settings.match_type = match_type;
    }
    if let Some(max_players) = max_players {
        settings.max_public_connections = max_players;
    }

    let (coordinator, _directory, _transport) = build(config)?;
    print_events(&coordinator);

    if !coordinator.create(settings, None)?.await {
        bail!("session could not be created");
    }
    info!("Hosting; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    if !coordinator.shutdown().await {
        warn!("Advertisement may not have been withdrawn");
    }
    Ok(())
}

async fn browse(config: CoordinatorConfig, match_type: Option<String>, seed: u8) -> anyhow::Result<()> {
    let seeded_type = match_type.clone().unwrap_or_else(|| config.session.match_type.clone());
    let mut query = SearchQuery::from_config(&config);
    if let Some(match_type) = match_type {
        query = query.with_match_type(match_type);
    }

    let (coordinator, directory, _transport) = build(config.clone())?;
    seed_remotes(&directory, &config, seed, &seeded_type);

    let outcome = coordinator.find(query, None)?.await;
    if !outcome.success {
        bail!("search failed");
    }
    for result in outcome.results {
        println!("{}", serde_json::to_string(&result)?);
    }
    Ok(())
}

async fn demo(config: CoordinatorConfig) -> anyhow::Result<()> {
    let (coordinator, directory, _transport) = build(config.clone())?;
    print_events(&coordinator);

    let settings = HostSettings::from_config(&config).with_name("Demo Host");
    if !coordinator.create(settings, None)?.await {
        bail!("session could not be created");
    }
    let hosted = coordinator.current_local().context("no hosted session after create")?;
    coordinator.set_occupancy(1).await?;
    if !coordinator.start(None)?.await {
        warn!("Start failed for {}", hosted.id);
    }

    seed_remotes(&directory, &config, 3, &config.session.match_type);
    let outcome = coordinator.find(SearchQuery::from_config(&config), None)?.await;
    let target: Option<SearchResult> = outcome.results.into_iter().find(|r| r.descriptor.id != hosted.id);

    if let Some(target) = target {
        match coordinator.join(target, None)?.await {
            Ok(connection) => info!("Demo joined {} at {}", connection.session_id, connection.connect_string),
            Err(e) => warn!("Demo join failed: {}", e),
        }
    }

    if !coordinator.destroy(None)?.await {
        warn!("Destroy failed");
    }
    coordinator.shutdown().await;
    // Let the event printer drain
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    match args.command {
        Command::Host { match_type, max_players } => host(config, match_type, max_players).await,
        Command::Browse { match_type, seed } => browse(config, match_type, seed).await,
        Command::Demo => demo(config).await,
    }
}
