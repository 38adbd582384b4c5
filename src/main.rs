//! multichat CLI - runs the chat room over poll(2) or epoll(7).
//!
//! See the `multichat` library for the server itself.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use multichat::{open_listener, ChatServer, Config, Console, PollSource};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Global flag for signal-triggered shutdown (as Arc for signal-hook compatibility)
static SHUTDOWN_FLAG: std::sync::LazyLock<Arc<AtomicBool>> =
    std::sync::LazyLock::new(|| Arc::new(AtomicBool::new(false)));

// CLI
#[derive(Parser)]
#[command(name = "multichat")]
#[command(version)]
#[command(about = "Multi-user TCP chat room on a single event loop")]
struct Cli {
    /// JSON config file (defaults and MULTICHAT_* env vars apply otherwise)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Level-triggered poll(2) loop over a growable descriptor array
    Poll {
        /// Port number or service name
        service: String,
        /// Maximum room size (sizes the initial registry)
        max_room_size: usize,
    },
    /// epoll(7) loop with O(1) registration and removal
    #[cfg(target_os = "linux")]
    Epoll {
        /// Port number or service name
        service: String,
    },
}

/// Route logs to stderr, or to `MULTICHAT_LOG_FILE` when set.
fn init_logging() {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();

    if let Ok(path) = std::env::var("MULTICHAT_LOG_FILE") {
        match std::fs::File::create(&path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Warning: could not open log file {path}: {e}"),
        }
    }
    builder.init();
}

fn register_signals() -> Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::flag;
    flag::register(SIGINT, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGTERM, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGHUP, Arc::clone(&SHUTDOWN_FLAG))?;
    Ok(())
}

fn serve<S: multichat::ReadinessSource>(config: &Config, source: S) -> Result<()> {
    let listener = open_listener(&config.service, config.backlog, config.family)
        .context("create_listening_socket")?;
    let mut server = ChatServer::new(
        listener,
        source,
        config.initial_capacity(),
        config.read_chunk(),
        Console::stdout(),
    )?;
    server.run(&SHUTDOWN_FLAG)
}

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    register_signals()?;

    match cli.command {
        Commands::Poll {
            service,
            max_room_size,
        } => {
            config.service = service;
            config.room_size = Some(max_room_size);
            let source = PollSource::with_capacity(config.initial_capacity())
                .context("allocate poll array")?;
            serve(&config, source)?;
        }
        #[cfg(target_os = "linux")]
        Commands::Epoll { service } => {
            config.service = service;
            let source = multichat::EpollSource::new(config.max_events)
                .context("epoll_create1")?;
            serve(&config, source)?;
        }
    }

    log::info!("multichat exited cleanly");
    Ok(())
}
