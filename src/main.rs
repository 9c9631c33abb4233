//! mcrelay CLI entry point.
//!
//! Provides `start`, `check` and `classify` subcommands for running the relay
//! daemon, verifying the RCON setup, or replaying a log file offline.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use mcrelay::channel::telegram::{self, TelegramChannel};
use mcrelay::channel::ChatChannel;
use mcrelay::classifier::{LineClassifier, LogTimestamp};
use mcrelay::config::{default_runtime_paths, load_config, RelayConfig, RuntimePaths};
use mcrelay::credentials::load_credentials;
use mcrelay::lifecycle::{detect_initial_state, Decision, LifecycleStateMachine, ServerState};
use mcrelay::rcon::{CommandSink, RconSession};
use mcrelay::relay::format::outbound_text;
use mcrelay::relay::{OutboundPipeline, RecentMessages, Relay};
use mcrelay::tailer::{run_tailer, LogTailer};
use mcrelay::vanish::VanishRegistry;

/// Tailed lines buffered between the tailer and the relay.
const LINE_BUFFER: usize = 256;

/// mcrelay: relay between a Minecraft server and a Telegram chat.
#[derive(Parser)]
#[command(name = "mcrelay", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the relay daemon.
    Start {
        /// Config file (default: ~/.mcrelay/config.toml).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Validate the config, connect to RCON and print the server TPS.
    Check {
        /// Config file (default: ~/.mcrelay/config.toml).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Classify an existing log file and print what would be forwarded.
    Classify {
        /// Log file to replay.
        log_file: PathBuf,
        /// Config file supplying extra lifecycle markers.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Start { config } => handle_start(config).await,
        Command::Check { config } => handle_check(config).await,
        Command::Classify { log_file, config } => handle_classify(&log_file, config.as_deref()),
    }
}

fn resolve_paths(config: Option<PathBuf>) -> anyhow::Result<RuntimePaths> {
    match config {
        Some(path) => Ok(RuntimePaths::for_config(&path)),
        None => default_runtime_paths(),
    }
}

fn build_classifier(config: &RelayConfig) -> anyhow::Result<LineClassifier> {
    LineClassifier::with_markers(&config.lifecycle_markers())
        .context("invalid lifecycle marker in config")
}

/// Run the relay daemon until Ctrl-C or SIGTERM.
async fn handle_start(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let paths = resolve_paths(config_path)?;
    let _logging_guard = mcrelay::logging::init_production(&paths.logs_dir)?;

    let config = load_config(&paths.config_toml)?;
    let credentials = load_credentials(&paths.env_file)
        .with_context(|| format!("failed to load {}", paths.env_file.display()))?;
    let bot_token = credentials.require(&config.channel.bot_token_env)?;
    let rcon_password = credentials.require(&config.rcon.password_env)?;

    let classifier = build_classifier(&config)?;
    let log_path = config.log_path();
    let initial_state = match config.log.initial_state {
        Some(state) => state,
        None => match detect_initial_state(&log_path, &classifier, &LogTimestamp) {
            Ok(state) => state.unwrap_or(ServerState::Stopped),
            Err(e) => {
                warn!(path = %log_path.display(), error = %e, "could not read log to detect server state");
                ServerState::Stopped
            }
        },
    };

    let vanish = match &config.relay.vanish_store {
        Some(path) => VanishRegistry::load(path),
        None => VanishRegistry::in_memory(),
    };

    let session = Arc::new(RconSession::new(config.rcon_settings(rcon_password)));
    let telegram_channel = TelegramChannel::new(&bot_token);
    let channel: Arc<dyn ChatChannel> = Arc::new(telegram_channel.clone());
    let sink: Arc<dyn CommandSink> = Arc::clone(&session) as Arc<dyn CommandSink>;

    let relay = Relay::new(Arc::clone(&channel), sink, config.relay_options());
    let (inbound_tx, inbound_rx) = relay.inbound_queue(config.relay.inbound_queue_capacity);
    let pipeline = OutboundPipeline::new(
        classifier,
        Box::new(LogTimestamp),
        LifecycleStateMachine::new(initial_state),
        vanish,
        RecentMessages::new(config.dedup_window(), config.relay.dedup_capacity),
        channel,
        config.channel.chat_id,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        mcrelay::shutdown::os_signal().await;
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let (lines_tx, lines_rx) = mpsc::channel(LINE_BUFFER);
    let tailer = LogTailer::open(&log_path, config.start_position());
    let tailer_handle = tokio::spawn(run_tailer(
        tailer,
        config.tailer_options(),
        lines_tx,
        shutdown_rx.clone(),
    ));
    let inbound_handle = tokio::spawn(telegram::run_inbound(
        telegram_channel,
        config.channel.chat_id,
        inbound_tx,
        shutdown_rx.clone(),
    ));

    info!(
        config = %paths.config_toml.display(),
        log = %log_path.display(),
        rcon = %session.addr(),
        state = %initial_state,
        "mcrelay started"
    );

    relay.run(pipeline, lines_rx, inbound_rx, shutdown_rx).await;

    session.close().await;
    if let Err(e) = tailer_handle.await {
        warn!(error = %e, "tailer task ended abnormally");
    }
    if let Err(e) = inbound_handle.await {
        warn!(error = %e, "telegram task ended abnormally");
    }
    info!("mcrelay stopped");
    Ok(())
}

/// Validate config and RCON connectivity.
async fn handle_check(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    mcrelay::logging::init_cli();
    let paths = resolve_paths(config_path)?;

    let config = load_config(&paths.config_toml)?;
    build_classifier(&config)?;
    println!("config ok: {}", paths.config_toml.display());

    let credentials = load_credentials(&paths.env_file)
        .with_context(|| format!("failed to load {}", paths.env_file.display()))?;
    credentials.require(&config.channel.bot_token_env)?;
    let password = credentials.require(&config.rcon.password_env)?;

    let session = RconSession::new(config.rcon_settings(password));
    session
        .connect()
        .await
        .with_context(|| format!("failed to connect to RCON at {}", session.addr()))?;
    println!("rcon ok: {}", session.addr());

    match session.query_tps().await {
        Ok(Some(tps)) => println!("tps: {tps:.1}"),
        Ok(None) => println!("tps: unknown (could not parse `{}` output)", config.rcon.perf_command),
        Err(e) => println!("tps: unavailable ({e})"),
    }
    session.close().await;
    Ok(())
}

/// Replay a log file through classification, lifecycle gating and vanish
/// handling, printing the forwarded events.
fn handle_classify(log_file: &Path, config_path: Option<&Path>) -> anyhow::Result<()> {
    mcrelay::logging::init_cli();

    let classifier = match config_path {
        Some(path) => build_classifier(&load_config(path)?)?,
        None => LineClassifier::default(),
    };
    let bytes = std::fs::read(log_file)
        .with_context(|| format!("failed to read {}", log_file.display()))?;
    let text = String::from_utf8_lossy(&bytes);

    let mut machine = LifecycleStateMachine::default();
    let mut vanish = VanishRegistry::in_memory();
    let mut forwarded: usize = 0;

    for line in text.lines() {
        let event = classifier.classify(line, &LogTimestamp);
        let (state, decision) = machine.apply(&event);
        if decision == Decision::Suppress {
            continue;
        }
        let Some(event) = vanish.filter(event) else {
            continue;
        };
        if let Some(message) = outbound_text(&event) {
            println!("{state}\t{}\t{message}", event.kind_name());
            forwarded = forwarded.saturating_add(1);
        }
    }

    info!(forwarded, final_state = %machine.state(), "classification done");
    Ok(())
}
