// Command-line launcher: bootstrap a ROM into the headless core, or host ROM files.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use rom_boot_engine::api::launcher::{build_session, init_tracing, ConsoleErrors, ConsoleLoading};
use rom_boot_engine::config::LaunchConfig;
use rom_boot_engine::engine::emulator::Button;
use rom_boot_engine::engine::headless::HeadlessCore;
use rom_boot_engine::server::handler::ContentServer;

#[derive(Parser)]
#[command(name = "rom-boot")]
#[command(about = "Fetch, cache, validate and boot a ROM image")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap a ROM into the headless core and keep it running until Ctrl-C
    Run(RunArgs),
    /// Serve a directory containing `data/<rom>` over HTTP
    Serve(ServeArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Launcher config file (TOML)
    #[arg(long, env = "ROM_BOOT_CONFIG")]
    config: Option<PathBuf>,

    /// ROM name under `data/` (overrides config)
    #[arg(long, env = "ROM_BOOT_ROM")]
    rom: Option<String>,

    /// Cache key; empty disables caching (overrides config)
    #[arg(long, env = "ROM_BOOT_CACHE_KEY")]
    cache_key: Option<String>,

    /// Origin serving `data/` (overrides config)
    #[arg(long, env = "ROM_BOOT_BASE_URL")]
    base_url: Option<String>,

    /// Directory for the persistent ROM cache (overrides config)
    #[arg(long, env = "ROM_BOOT_CACHE_DIR")]
    cache_dir: Option<String>,

    /// Directory battery saves are synced to
    #[arg(long)]
    save_dir: Option<PathBuf>,

    /// Enable demo pacing delays between steps
    #[arg(long)]
    slow: bool,

    /// Buttons to hold once the game is running (e.g. `--hold start`)
    #[arg(long, value_name = "BUTTON")]
    hold: Vec<Button>,
}

#[derive(Args)]
struct ServeArgs {
    /// Directory to serve
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Bind address
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Serve(args) => serve(args).await,
    }
}

fn resolve_config(args: &RunArgs) -> Result<LaunchConfig> {
    let mut config = match &args.config {
        Some(path) => LaunchConfig::load(path)?,
        None => LaunchConfig::default(),
    };
    if let Some(rom) = &args.rom {
        config.rom_name = rom.clone();
    }
    if let Some(key) = &args.cache_key {
        config.cache_key = key.clone();
    }
    if let Some(url) = &args.base_url {
        config.base_url = url.clone();
    }
    if let Some(dir) = &args.cache_dir {
        config.cache_dir = dir.clone();
    }
    if args.slow {
        config.delays.enabled = true;
    }
    if config.rom_name.is_empty() {
        anyhow::bail!("no ROM configured: pass --rom or set rom_name in the config");
    }
    Ok(config)
}

async fn run(args: RunArgs) -> Result<()> {
    let config = resolve_config(&args)?;
    let core = Arc::new(HeadlessCore::new(args.save_dir.clone()));
    let session = build_session(
        config,
        core,
        Arc::new(ConsoleLoading),
        Arc::new(ConsoleErrors),
    );

    let origin = session
        .bootstrap()
        .await
        .with_context(|| format!("bootstrap of {} failed", session.rom_name()))?;
    info!("{} running (loaded from {:?}); press Ctrl-C to exit", session.rom_name(), origin);

    for button in &args.hold {
        if session.press(*button) {
            info!("holding {}", button);
        }
    }

    tokio::signal::ctrl_c().await?;
    session.release_all();
    session.flush_cache_writes().await;
    session.close().await;
    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let server = ContentServer::start(args.root, &args.bind).await?;
    info!("serving {} at {}", server.root().display(), server.base_url());
    tokio::signal::ctrl_c().await?;
    server.shutdown();
    Ok(())
}
