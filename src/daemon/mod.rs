//! Daemon mode: the long-running bridge process.
//!
//! The daemon runs a `tokio::select!` loop over three sources:
//! 1. Telegram updates (via mpsc channel from the background long-poll)
//! 2. Editor link events (via mpsc channel from the WebSocket accept loop)
//! 3. Shutdown signals (SIGTERM/SIGINT)

use askbridge::bridge::Bridge;
use askbridge::channel::telegram::TelegramChannel;
use askbridge::channel::{Channel, ChannelEvent};
use askbridge::config::{BridgeConfig, STATE_DIR};
use askbridge::link::websocket::WebSocketLink;
use askbridge::link::{EditorLink, LinkEvent};
use askbridge::logging;
use askbridge::registration::RegistrationStore;
use color_eyre::eyre::{Result, WrapErr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// PID file helpers
// ---------------------------------------------------------------------------

fn pid_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join("daemon.pid")
}

fn write_pid(root: &Path) -> Result<()> {
    let path = pid_path(root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(&path, std::process::id().to_string())
        .wrap_err_with(|| format!("failed to write PID file {}", path.display()))
}

/// PID recorded by a running (or crashed) daemon.
pub fn read_pid(root: &Path) -> Option<u32> {
    std::fs::read_to_string(pid_path(root))
        .ok()
        .and_then(|s| s.trim().parse().ok())
}

fn remove_pid(root: &Path) {
    let _ = std::fs::remove_file(pid_path(root));
}

pub fn is_process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

fn log_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join("daemon.log")
}

// ---------------------------------------------------------------------------
// Public API: start / stop
// ---------------------------------------------------------------------------

/// Start the daemon.
///
/// By default, spawns a background child process with output redirected to
/// `.askbridge/daemon.log` and returns immediately. With `foreground: true`,
/// runs the event loop inline (blocking).
pub async fn start(root: &Path, foreground: bool) -> Result<()> {
    let config = BridgeConfig::load(root)?;

    if let Some(pid) = read_pid(root) {
        if is_process_alive(pid) {
            color_eyre::eyre::bail!("daemon already running (PID {pid})");
        }
        eprintln!("Removing stale PID file (PID {pid} is not running)");
        remove_pid(root);
    }

    if !foreground {
        return spawn_background(root);
    }

    logging::init(&config.log_level)?;

    write_pid(root)?;
    info!(pid = std::process::id(), "daemon started");
    info!(
        socket = %config.socket_addr(),
        registrations = %config.resolved_registration_path(root).display(),
        allowed_users = config.allowed_user_ids.len(),
        "loaded config"
    );

    let result = async {
        let mut runner = DaemonRunner::new(root, &config).await?;
        runner.run().await
    }
    .await;

    remove_pid(root);
    info!("PID file removed");
    result
}

/// Spawn `askbridge daemon start --foreground` as a detached background
/// process, with stdout/stderr redirected to `.askbridge/daemon.log`.
fn spawn_background(root: &Path) -> Result<()> {
    let exe = std::env::current_exe().wrap_err("failed to find askbridge executable")?;
    let log = log_path(root);
    if let Some(parent) = log.parent() {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("failed to create {}", parent.display()))?;
    }

    let log_file = std::fs::File::create(&log)
        .wrap_err_with(|| format!("failed to create log file {}", log.display()))?;
    let stderr_file = log_file
        .try_clone()
        .wrap_err("failed to clone log file handle")?;

    let mut cmd = std::process::Command::new(exe);
    cmd.args(["-C", &root.display().to_string()]);
    cmd.args(["daemon", "start", "--foreground"]);
    cmd.stdout(log_file);
    cmd.stderr(stderr_file);
    cmd.stdin(std::process::Stdio::null());

    // Detach from parent process group so it survives our exit.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let child = cmd.spawn().wrap_err("failed to spawn daemon process")?;
    let pid = child.id();

    println!("daemon started (PID {pid})");
    println!("logs: {}", log.display());

    Ok(())
}

/// Stop the running daemon by reading its PID file and sending SIGTERM.
pub fn stop(root: &Path) -> Result<()> {
    let pid = match read_pid(root) {
        Some(pid) => pid,
        None => {
            eprintln!("daemon is not running (no PID file)");
            return Ok(());
        }
    };

    if !is_process_alive(pid) {
        eprintln!("daemon is not running (PID {pid} is stale), removing PID file");
        remove_pid(root);
        return Ok(());
    }

    let _ = std::process::Command::new("kill")
        .args([&pid.to_string()])
        .status();

    // Wait up to 5 seconds for the process to exit.
    for _ in 0..50 {
        if !is_process_alive(pid) {
            remove_pid(root);
            eprintln!("daemon stopped (PID {pid})");
            return Ok(());
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    }

    let _ = std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status();
    remove_pid(root);
    eprintln!("daemon killed (PID {pid})");

    Ok(())
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

struct DaemonRunner {
    bridge: Bridge,
    channel: Arc<TelegramChannel>,
    link: Arc<WebSocketLink>,
}

impl DaemonRunner {
    async fn new(root: &Path, config: &BridgeConfig) -> Result<Self> {
        let channel = Arc::new(
            TelegramChannel::new(&config.telegram, config.allowed_user_ids.clone())
                .wrap_err("failed to create Telegram channel")?,
        );

        let addr = config.socket_addr();
        let link = Arc::new(
            WebSocketLink::bind(&addr)
                .await
                .wrap_err_with(|| format!("failed to bind editor socket on {addr}"))?,
        );

        let registrations = RegistrationStore::load(config.resolved_registration_path(root));
        info!(count = registrations.len(), "registrations loaded");

        let bridge = Bridge::new(
            registrations,
            channel.clone() as Arc<dyn Channel>,
            link.clone() as Arc<dyn EditorLink>,
        );

        Ok(Self {
            bridge,
            channel,
            link,
        })
    }

    async fn run(&mut self) -> Result<()> {
        let cancel = CancellationToken::new();

        let shutdown_cancel = cancel.clone();
        tokio::spawn(async move {
            wait_for_shutdown_signal().await;
            info!("shutdown signal received");
            shutdown_cancel.cancel();
        });

        let (chat_tx, mut chat_rx) = mpsc::channel::<ChannelEvent>(64);
        let channel = self.channel.clone();
        let poll_cancel = cancel.clone();
        let poll_task = tokio::spawn(async move {
            channel.run(chat_tx, poll_cancel).await;
        });

        let (link_tx, mut link_rx) = mpsc::channel::<LinkEvent>(64);
        let link = self.link.clone();
        let link_cancel = cancel.clone();
        let link_task = tokio::spawn(async move {
            link.run(link_tx, link_cancel).await;
        });

        info!("ready, listening for Telegram updates and editor frames");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shutting down");
                    break;
                }

                event = chat_rx.recv() => match event {
                    Some(event) => self.bridge.handle_channel_event(event).await,
                    None => {
                        warn!("Telegram channel closed, shutting down");
                        break;
                    }
                },

                event = link_rx.recv() => match event {
                    Some(event) => self.bridge.handle_link_event(event).await,
                    None => {
                        warn!("editor link closed, shutting down");
                        break;
                    }
                },
            }
        }

        cancel.cancel();
        // The link loop sends "Server shutdown" to a connected editor on exit.
        if let Err(e) = link_task.await {
            error!(error = %e, "editor link task failed");
        }
        poll_task.abort();

        if let Err(e) = self.bridge.registrations().save() {
            error!(error = %e, "failed to save registrations");
        }
        info!("state saved, goodbye");
        Ok(())
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler, relying on Ctrl-C");
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
