//! `tether`
//!
//! Drives a Claude Code subprocess over stream-json: reads prompts from
//! stdin one per line, sends each as a turn on the default session, and
//! prints the reply.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

use tether_core::Config;
use tether_core::config::{PermissionMode, load_config};
use tether_core::tracing_init::{default_filter, init_tracing};
use tether_daemon::runner::{ObserverSubscription, RunnerState};
use tether_daemon::session::{ManagerConfig, Session, SessionManager};
use tether_daemon::subprocess::ClaudeSpawner;

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(version, about = "Drive a Claude Code session over stream-json")]
struct Args {
    /// Project directory: source of `.tether/settings.json` and default
    /// working directory for the subprocess.
    #[arg(long)]
    project_dir: Option<PathBuf>,

    /// Model for the session (overrides `sessions.default_model`).
    #[arg(long)]
    model: Option<String>,

    /// Path to the `claude` CLI binary.
    #[arg(long)]
    claude_bin: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long)]
    log_level: Option<String>,

    /// Seconds to wait for each reply.
    #[arg(long)]
    timeout: Option<u64>,

    /// Pass `--dangerously-skip-permissions` to the subprocess.
    #[arg(long)]
    skip_permissions: bool,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "TETHER_LOG_JSON")]
    log_json: bool,

    /// Copy every raw protocol line to stderr.
    #[arg(long)]
    echo_raw: bool,
}

impl Args {
    /// Apply CLI overrides on top of the resolved config.
    fn apply(&self, config: &mut Config) {
        if let Some(model) = &self.model {
            config.sessions.default_model.clone_from(model);
        }
        if let Some(bin) = &self.claude_bin {
            config.daemon.claude_bin.clone_from(bin);
        }
        if let Some(level) = &self.log_level {
            config.daemon.log_level.clone_from(level);
        }
        if let Some(secs) = self.timeout {
            config.sessions.request_timeout_secs = secs;
        }
        if self.skip_permissions {
            config.sessions.permission_mode = PermissionMode::SkipPermissions;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let project_dir = match &args.project_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let mut config = load_config(Some(project_dir.as_path()))?;
    args.apply(&mut config);

    init_tracing(&default_filter(&config.daemon.log_level), args.log_json)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        model = %config.sessions.default_model,
        claude_bin = %config.daemon.claude_bin.display(),
        "Starting tether"
    );

    let mut manager_config = ManagerConfig::from_config(&config);
    if config.sessions.working_directory.is_none() {
        manager_config.working_directory = project_dir;
    }
    let spawner = Arc::new(ClaudeSpawner::new(config.daemon.claude_bin.clone()));
    let manager = SessionManager::new(spawner, manager_config);
    info!(
        working_directory = %manager.config().working_directory.display(),
        request_timeout_secs = manager.config().request_timeout.as_secs(),
        max_sessions = manager.config().max_sessions,
        "Session manager ready"
    );

    let session = manager.get_or_create_default().await?;
    let echo_handle = if args.echo_raw {
        let subscription = manager.subscribe(&session.id).await?;
        Some(tokio::spawn(echo_raw(subscription)))
    } else {
        None
    };

    let outcome = tokio::select! {
        result = prompt_loop(&manager, &session) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
            Ok(())
        }
    };

    manager.shutdown().await;
    // The runner drops its observers on stop, which ends the echo task.
    if let Some(handle) = echo_handle {
        let _ = handle.await;
    }

    info!("tether stopped");
    outcome
}

/// Send each non-blank stdin line as a turn until EOF.
async fn prompt_loop(manager: &SessionManager, session: &Session) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut turn: u64 = 0;

    while let Some(line) = lines.next_line().await? {
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }

        if let RunnerState::Error { message } = session.state() {
            warn!(session_id = %session.id, error = %message, "Runner in error state, retrying");
            session.runner.retry();
        }

        turn += 1;
        let request_id = format!("turn-{turn}");
        match manager.send_turn(&session.id, &request_id, prompt).await {
            Ok(reply) => {
                stdout.write_all(reply.text.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
            Err(e) => error!(%request_id, error = %e, "Turn failed"),
        }
    }

    info!("stdin closed");
    Ok(())
}

async fn echo_raw(mut subscription: ObserverSubscription) {
    let mut stderr = tokio::io::stderr();
    while let Some(line) = subscription.lines.recv().await {
        let written = async {
            stderr.write_all(line.as_bytes()).await?;
            stderr.write_all(b"\n").await?;
            stderr.flush().await
        };
        if written.await.is_err() {
            break;
        }
    }
}
