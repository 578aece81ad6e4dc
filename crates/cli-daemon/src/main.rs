//! CLI entry point for the Steam animation daemon
//!
//! `start` runs the daemon in the foreground; `stop`, `reload` and `status`
//! talk to a running instance through the PID in its lock file.

use clap::{Parser, Subcommand};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use steam_animation_daemon::config::ConfigError;
use steam_animation_daemon::{running_pid, AnimationTarget, Config, Daemon, DaemonError, LockError};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "/home/deck/.config/steam-animation-manager/config.toml";

/// Steam animation daemon - swaps the Steam Deck boot and suspend movies
#[derive(Parser, Debug)]
#[command(name = "steam-animation-daemon")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (created with defaults if missing)
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG, global = true)]
    config: PathBuf,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon in the foreground
    Start,
    /// Ask the running daemon to restore the defaults and exit
    Stop,
    /// Show whether the daemon runs and what it is configured to show
    Status,
    /// Ask the running daemon to re-read its configuration
    Reload,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Lock file location without creating a config file as a side effect
fn load_config_readonly(path: &Path) -> Result<Config, ConfigError> {
    if path.exists() {
        Config::load(path)
    } else {
        Ok(Config::default())
    }
}

fn signal_daemon(config_path: &Path, signal: Signal) -> ExitCode {
    let config = match load_config_readonly(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Cannot read {}: {}", config_path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let Some(pid) = running_pid(&config.paths.lock_file) else {
        error!("Daemon is not running");
        return ExitCode::FAILURE;
    };

    match kill(Pid::from_raw(pid), signal) {
        Ok(()) => {
            info!("Sent {} to daemon (pid {})", signal, pid);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to signal pid {}: {}", pid, e);
            ExitCode::FAILURE
        }
    }
}

fn print_status(config_path: &Path) -> ExitCode {
    let config = match load_config_readonly(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Cannot read {}: {}", config_path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match running_pid(&config.paths.lock_file) {
        Some(pid) => println!("Daemon: running (pid {})", pid),
        None => println!("Daemon: not running"),
    }
    for target in AnimationTarget::ALL {
        let choice = target
            .configured_path(&config)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "default".to_string());
        println!("{:<9} {}", format!("{}:", target), choice);
    }
    println!("Randomize: {}", config.animations.randomize_mode);
    ExitCode::SUCCESS
}

async fn start(config_path: &Path) -> ExitCode {
    info!(
        "Steam animation daemon v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let daemon = match Daemon::new(config_path) {
        Ok(daemon) => daemon,
        Err(DaemonError::Lock(e @ LockError::AlreadyRunning { .. })) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!("Failed to initialize daemon: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = daemon.run().await {
        error!("Daemon error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Start => start(&args.config).await,
        Command::Stop => signal_daemon(&args.config, Signal::SIGTERM),
        Command::Reload => signal_daemon(&args.config, Signal::SIGHUP),
        Command::Status => print_status(&args.config),
    }
}
