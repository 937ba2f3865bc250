//! jet-vpn: host shell for the Jet VPN session manager
//!
//! Initializes logging, loads the daemon config, and drives the command
//! surface either from one-shot subcommands or as a JSON line bridge.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::DaemonConfig;
use crossbeam_channel::{unbounded, Receiver};
use jet_session::{
    CommandSurface, ConfigSource, DelayNegotiator, DirectoryConfigSource, FileStateStore,
    SessionManager, ShellEvent, StateStore, VirtualBackend,
};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Use mimalloc as the global allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Extra time allowed on top of the handshake before giving up on an event
const EVENT_GRACE: Duration = Duration::from_secs(30);

/// Jet VPN - client-side VPN session manager
#[derive(Parser)]
#[command(name = "jet-vpn")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "jet-vpn.toml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect with a profile, hold the session, then disconnect
    Connect {
        /// Profile name in the config directory, or a path to a config file
        profile: String,

        /// Seconds to stay connected
        #[arg(long, default_value_t = 10)]
        hold: u64,
    },

    /// Print the last persisted connection state
    Status,

    /// List available profiles
    List,

    /// Read JSON commands from stdin, write replies and events to stdout
    Bridge,

    /// Generate a sample configuration file
    GenConfig {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "jet-vpn.toml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match cli.command {
        Commands::Connect { profile, hold } => {
            run_connect(&load(&cli.config)?, &profile, Duration::from_secs(hold))
        }
        Commands::Status => run_status(&load(&cli.config)?),
        Commands::List => run_list(&load(&cli.config)?),
        Commands::Bridge => run_bridge(&load(&cli.config)?),
        Commands::GenConfig { output } => generate_config(&output),
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout belongs to the bridge protocol
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}

fn load(path: &Path) -> Result<DaemonConfig> {
    DaemonConfig::load(path)
}

/// Build the session manager and command surface for this process
fn build_surface(config: &DaemonConfig) -> Result<(CommandSurface, Receiver<ShellEvent>)> {
    let store: Arc<FileStateStore> = Arc::new(
        FileStateStore::new(&config.state_dir)
            .with_context(|| format!("Failed to open state dir {}", config.state_dir.display()))?,
    );
    let (tx, rx) = unbounded();

    let manager = SessionManager::builder(
        VirtualBackend::new(),
        DelayNegotiator::new(config.negotiate_delay()),
    )
    .settings(config.interface.clone())
    .store(store.clone())
    .sink(Arc::new(tx))
    .start()
    .context("Failed to start session manager")?;

    let surface = CommandSurface::new(
        manager,
        store,
        DirectoryConfigSource::new(&config.config_dir),
    );

    Ok((surface, rx))
}

fn run_connect(config: &DaemonConfig, profile: &str, hold: Duration) -> Result<()> {
    let (mut surface, events) = build_surface(config)?;

    let text = if Path::new(profile).is_file() {
        std::fs::read_to_string(profile).with_context(|| format!("Failed to read {}", profile))?
    } else {
        match surface.read_config(profile) {
            Some(text) => text,
            None => bail!("Unknown profile: {}", profile),
        }
    };

    // The refusal reason is logged by the surface
    if !surface.connect(&text) {
        bail!("Connect refused for profile {}", profile);
    }

    let timeout = config.negotiate_delay() + EVENT_GRACE;
    wait_for(&events, timeout, |update| update.is_connected)?;

    info!("Holding session for {:?}", hold);
    thread::sleep(hold);

    surface.disconnect();
    wait_for(&events, timeout, |update| !update.is_connected && !update.is_connecting)?;

    surface.shutdown();
    Ok(())
}

/// Wait for a status matching `done`; an error event ends the wait early
fn wait_for(
    events: &Receiver<ShellEvent>,
    timeout: Duration,
    done: impl Fn(&jet_session::StatusUpdate) -> bool,
) -> Result<()> {
    loop {
        let event = events
            .recv_timeout(timeout)
            .context("Timed out waiting for VPN status")?;

        match event {
            ShellEvent::StatusChanged(update) => {
                info!("Status: {}", update.status);
                if done(&update) {
                    return Ok(());
                }
            }
            ShellEvent::Error { kind, message } => bail!("VPN error ({}): {}", kind, message),
            ShellEvent::Indicator { .. } => {}
        }
    }
}

fn run_status(config: &DaemonConfig) -> Result<()> {
    let store = FileStateStore::new(&config.state_dir)?;
    let connected = store.load().context("Failed to read connection state")?;

    println!("{}", if connected { "connected" } else { "disconnected" });
    Ok(())
}

fn run_list(config: &DaemonConfig) -> Result<()> {
    let source = DirectoryConfigSource::new(&config.config_dir);
    let configs = source
        .list()
        .with_context(|| format!("Failed to list {}", source.dir().display()))?;

    for name in configs {
        println!("{}", name);
    }
    Ok(())
}

fn run_bridge(config: &DaemonConfig) -> Result<()> {
    let (mut surface, events) = build_surface(config)?;

    // Forward events until the worker drops its sink
    let forwarder = thread::Builder::new()
        .name("event-forwarder".to_string())
        .spawn(move || {
            for event in events.iter() {
                let line = match serde_json::to_string(&event) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Failed to encode event: {}", e);
                        continue;
                    }
                };
                let mut out = io::stdout().lock();
                if writeln!(out, "{}", line).and_then(|_| out.flush()).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn event forwarder")?;

    info!("Bridge ready, reading commands from stdin");

    for line in io::stdin().lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let reply = surface.handle_json(&line);
        let mut out = io::stdout().lock();
        writeln!(out, r#"{{"reply":{}}}"#, reply)?;
        out.flush()?;
    }

    info!("stdin closed, shutting down");
    surface.shutdown();
    drop(surface);

    if forwarder.join().is_err() {
        warn!("Event forwarder panicked");
    }
    Ok(())
}

fn generate_config(output: &Path) -> Result<()> {
    let sample = DaemonConfig::default().to_toml()?;
    std::fs::write(output, sample)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!("Sample configuration written to {}", output.display());
    Ok(())
}
