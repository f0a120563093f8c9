//! askbridge: relays editor task questions to Telegram and replies back.
//!
//! The editor extension connects over a local WebSocket and sends `followup`
//! frames; each question goes to the chat registered for its task, and the
//! next message typed in that chat goes back to the editor as a `reply`.

mod daemon;

use askbridge::config::{self, BridgeConfig, STATE_DIR};
use askbridge::registration::RegistrationStore;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use std::path::{Path, PathBuf};

/// askbridge: answer editor task questions from Telegram.
#[derive(Parser)]
#[command(name = "askbridge", version, about)]
struct Cli {
    /// Working directory (defaults to current directory).
    #[arg(short = 'C', long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starter config to `.askbridge/config.toml`.
    Init,

    /// Show config, registrations and daemon state.
    Status,

    /// Manage the bridge daemon (Telegram bot + editor socket).
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the daemon (backgrounds by default).
    Start {
        /// Run in foreground instead of daemonizing.
        #[arg(long)]
        foreground: bool,
    },
    /// Stop the running daemon.
    Stop,
    /// Restart the daemon.
    Restart,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let cwd = match &cli.dir {
        Some(d) => d.clone(),
        None => std::env::current_dir().wrap_err("failed to get current directory")?,
    };

    match cli.command {
        Command::Init => cmd_init(&cwd),
        Command::Status => cmd_status(&cwd),
        Command::Daemon { action } => match action {
            DaemonAction::Start { foreground } => daemon::start(&cwd, foreground).await,
            DaemonAction::Stop => daemon::stop(&cwd),
            DaemonAction::Restart => {
                let _ = daemon::stop(&cwd);
                daemon::start(&cwd, false).await
            }
        },
    }
}

/// Write the config template unless one already exists.
fn cmd_init(root: &Path) -> Result<()> {
    let path = config::config_path(root);
    if path.exists() {
        println!("Config already exists: {}", path.display());
        return Ok(());
    }

    let dir = root.join(STATE_DIR);
    std::fs::create_dir_all(&dir)
        .wrap_err_with(|| format!("failed to create {}", dir.display()))?;
    std::fs::write(&path, config::TEMPLATE)
        .wrap_err_with(|| format!("failed to write {}", path.display()))?;

    println!("Config written: {}", path.display());
    println!(
        "Set telegram.bot_token there (or export {}), then run `askbridge daemon start`.",
        config::TOKEN_ENV
    );
    Ok(())
}

/// Show config, registrations and daemon state.
fn cmd_status(root: &Path) -> Result<()> {
    let config = BridgeConfig::read(root)?;
    let registrations = RegistrationStore::load(config.resolved_registration_path(root));

    println!("Config: {}", config::config_path(root).display());
    println!("Editor socket: ws://{}", config.socket_addr());
    if let Err(e) = config.validate() {
        println!("Config problem: {e}");
    }
    if config.allowed_user_ids.is_empty() {
        println!("Allowed users: everyone");
    } else {
        println!("Allowed users: {:?}", config.allowed_user_ids);
    }

    match daemon::read_pid(root) {
        Some(pid) if daemon::is_process_alive(pid) => println!("Daemon: running (PID {pid})"),
        Some(pid) => println!("Daemon: not running (stale PID {pid})"),
        None => println!("Daemon: not running"),
    }

    if registrations.is_empty() {
        println!("\nNo registered tasks. Send /register <task_id> to the bot.");
    } else {
        println!("\nRegistered tasks ({}):", registrations.path().display());
        for (task_id, chat_id) in registrations.iter() {
            println!("  {task_id} -> chat {chat_id}");
        }
    }

    Ok(())
}
