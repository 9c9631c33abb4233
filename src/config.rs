//! Configuration loading and validation.
//!
//! Loads `config.toml` with per-section defaults. Every section except
//! `[channel]` is optional, and secrets are never stored in the file: the
//! config only names the environment variables that hold them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::classifier::LifecycleMarkers;
use crate::lifecycle::ServerState;
use crate::rcon::{ReconnectPolicy, RconSettings, DEFAULT_PERF_COMMAND};
use crate::relay::{InboundStyle, RelayOptions};
use crate::tailer::{StartPosition, TailerOptions};

/// Top-level relay configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Chat channel settings.
    pub channel: ChannelConfig,

    /// RCON connection settings.
    #[serde(default)]
    pub rcon: RconConfig,

    /// Server log location and tailing.
    #[serde(default)]
    pub log: LogConfig,

    /// Relay behaviour.
    #[serde(default)]
    pub relay: RelaySection,
}

/// Chat channel settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Telegram chat receiving server events and sending messages in.
    pub chat_id: i64,

    /// Environment variable holding the bot token.
    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,
}

/// RCON connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RconConfig {
    /// RCON host.
    #[serde(default = "default_rcon_host")]
    pub host: String,

    /// RCON port.
    #[serde(default = "default_rcon_port")]
    pub port: u16,

    /// Environment variable holding the RCON password.
    #[serde(default = "default_password_env")]
    pub password_env: String,

    /// Seconds to wait for a command response.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Command printing tick statistics.
    #[serde(default = "default_perf_command")]
    pub perf_command: String,

    /// First reconnect delay in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Reconnect delay ceiling in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Connection attempts per reconnect.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

impl Default for RconConfig {
    fn default() -> Self {
        Self {
            host: default_rcon_host(),
            port: default_rcon_port(),
            password_env: default_password_env(),
            timeout_secs: default_timeout_secs(),
            perf_command: default_perf_command(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

/// Server log location and tailing.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Read the log from `path` instead of the server directory.
    #[serde(default)]
    pub debug: bool,

    /// Explicit log file, used when `debug` is set.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Minecraft server root; the log is `logs/latest.log` below it.
    #[serde(default = "default_server_dir")]
    pub server_dir: PathBuf,

    /// Milliseconds between polls when the log is idle.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Skip the existing log content on startup.
    #[serde(default = "default_true")]
    pub start_at_end: bool,

    /// Force the initial server state instead of detecting it from the log.
    #[serde(default)]
    pub initial_state: Option<ServerState>,

    /// Additional message prefixes meaning the server stopped.
    #[serde(default)]
    pub extra_stopped_markers: Vec<String>,

    /// Additional message prefixes meaning the server is starting.
    #[serde(default)]
    pub extra_starting_markers: Vec<String>,

    /// Additional message prefixes meaning the server has started.
    #[serde(default)]
    pub extra_started_markers: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            path: None,
            server_dir: default_server_dir(),
            poll_interval_ms: default_poll_interval_ms(),
            start_at_end: true,
            initial_state: None,
            extra_stopped_markers: Vec::new(),
            extra_starting_markers: Vec::new(),
            extra_started_markers: Vec::new(),
        }
    }
}

/// Relay behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct RelaySection {
    /// Seconds during which an identical outbound text is posted once.
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,

    /// Texts remembered for deduplication.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,

    /// Channel messages that may wait for delivery in game.
    #[serde(default = "default_inbound_queue_capacity")]
    pub inbound_queue_capacity: usize,

    /// Seconds between liveness log lines; 0 disables them.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Seconds between TPS polls; 0 disables polling.
    #[serde(default)]
    pub perf_poll_secs: u64,

    /// TPS below which the poll posts a notice.
    #[serde(default = "default_low_tps_threshold")]
    pub low_tps_threshold: f64,

    /// How channel messages appear in game.
    #[serde(default)]
    pub inbound_style: InboundStyle,

    /// JSON file persisting vanished players.
    #[serde(default)]
    pub vanish_store: Option<PathBuf>,

    /// Name used in join and leave announcements.
    #[serde(default = "default_relay_name")]
    pub name: String,

    /// Announce the relay joining and leaving.
    #[serde(default = "default_true")]
    pub announce: bool,
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            dedup_window_secs: default_dedup_window_secs(),
            dedup_capacity: default_dedup_capacity(),
            inbound_queue_capacity: default_inbound_queue_capacity(),
            ping_interval_secs: default_ping_interval_secs(),
            perf_poll_secs: 0,
            low_tps_threshold: default_low_tps_threshold(),
            inbound_style: InboundStyle::default(),
            vanish_store: None,
            name: default_relay_name(),
            announce: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_bot_token_env() -> String {
    "MCRELAY_TELEGRAM_TOKEN".to_owned()
}

fn default_rcon_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_rcon_port() -> u16 {
    25575
}

fn default_password_env() -> String {
    "MCRELAY_RCON_PASSWORD".to_owned()
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_perf_command() -> String {
    DEFAULT_PERF_COMMAND.to_owned()
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_server_dir() -> PathBuf {
    PathBuf::from("/data")
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_dedup_window_secs() -> u64 {
    5
}

fn default_dedup_capacity() -> usize {
    64
}

fn default_inbound_queue_capacity() -> usize {
    32
}

fn default_ping_interval_secs() -> u64 {
    300
}

fn default_low_tps_threshold() -> f64 {
    15.0
}

fn default_relay_name() -> String {
    "Relay".to_owned()
}

// ---------------------------------------------------------------------------
// Validation and conversion
// ---------------------------------------------------------------------------

impl RelayConfig {
    /// Validate bounds across all sections.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid value.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.channel.chat_id != 0, "channel.chat_id must be set");
        anyhow::ensure!(
            !self.channel.bot_token_env.trim().is_empty(),
            "channel.bot_token_env must not be empty"
        );
        anyhow::ensure!(!self.rcon.host.trim().is_empty(), "rcon.host must not be empty");
        anyhow::ensure!(self.rcon.port > 0, "rcon.port must be > 0");
        anyhow::ensure!(
            (1..=300).contains(&self.rcon.timeout_secs),
            "rcon.timeout_secs must be between 1 and 300"
        );
        anyhow::ensure!(
            !self.rcon.perf_command.trim().is_empty(),
            "rcon.perf_command must not be empty"
        );
        anyhow::ensure!(
            self.rcon.initial_backoff_ms > 0,
            "rcon.initial_backoff_ms must be > 0"
        );
        anyhow::ensure!(
            self.rcon.max_backoff_ms >= self.rcon.initial_backoff_ms,
            "rcon.max_backoff_ms must be >= rcon.initial_backoff_ms"
        );
        anyhow::ensure!(
            self.rcon.max_reconnect_attempts > 0,
            "rcon.max_reconnect_attempts must be > 0"
        );
        anyhow::ensure!(
            !self.log.debug || self.log.path.is_some(),
            "log.path is required when log.debug is set"
        );
        anyhow::ensure!(
            (10..=60_000).contains(&self.log.poll_interval_ms),
            "log.poll_interval_ms must be between 10 and 60000"
        );
        anyhow::ensure!(
            self.relay.dedup_capacity > 0,
            "relay.dedup_capacity must be > 0"
        );
        anyhow::ensure!(
            self.relay.inbound_queue_capacity > 0,
            "relay.inbound_queue_capacity must be > 0"
        );
        anyhow::ensure!(
            self.relay.low_tps_threshold.is_finite() && self.relay.low_tps_threshold >= 0.0,
            "relay.low_tps_threshold must be a non-negative number"
        );
        anyhow::ensure!(!self.relay.name.trim().is_empty(), "relay.name must not be empty");
        Ok(())
    }

    /// Log file to tail.
    pub fn log_path(&self) -> PathBuf {
        match (&self.log.path, self.log.debug) {
            (Some(path), true) => path.clone(),
            _ => self.log.server_dir.join("logs").join("latest.log"),
        }
    }

    /// Where the tailer starts on first open.
    pub fn start_position(&self) -> StartPosition {
        if self.log.start_at_end {
            StartPosition::End
        } else {
            StartPosition::Beginning
        }
    }

    /// Tailer timing.
    pub fn tailer_options(&self) -> TailerOptions {
        TailerOptions {
            poll_interval: Duration::from_millis(self.log.poll_interval_ms),
            max_backoff: Duration::from_millis(self.rcon.max_backoff_ms),
        }
    }

    /// Configured extra lifecycle markers.
    pub fn lifecycle_markers(&self) -> LifecycleMarkers {
        LifecycleMarkers {
            stopped: self.log.extra_stopped_markers.clone(),
            starting: self.log.extra_starting_markers.clone(),
            started: self.log.extra_started_markers.clone(),
        }
    }

    /// RCON session settings with the resolved password.
    pub fn rcon_settings(&self, password: String) -> RconSettings {
        RconSettings {
            addr: format!("{}:{}", self.rcon.host, self.rcon.port),
            password,
            timeout: Duration::from_secs(self.rcon.timeout_secs),
            perf_command: self.rcon.perf_command.clone(),
            policy: ReconnectPolicy {
                initial_backoff: Duration::from_millis(self.rcon.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.rcon.max_backoff_ms),
                max_attempts: self.rcon.max_reconnect_attempts,
            },
        }
    }

    /// Relay options.
    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            channel_id: self.channel.chat_id,
            name: self.relay.name.clone(),
            announce: self.relay.announce,
            inbound_style: self.relay.inbound_style,
            ping_interval: Duration::from_secs(self.relay.ping_interval_secs),
            perf_poll: (self.relay.perf_poll_secs > 0)
                .then(|| Duration::from_secs(self.relay.perf_poll_secs)),
            low_tps_threshold: self.relay.low_tps_threshold,
        }
    }

    /// Deduplication window.
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.relay.dedup_window_secs)
    }
}

/// Load and validate a config file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or validated.
pub fn load_config(path: &Path) -> anyhow::Result<RelayConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let config: RelayConfig = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config at {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Runtime paths
// ---------------------------------------------------------------------------

/// Filesystem locations used by the relay.
#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// Root directory, `~/.mcrelay` by default.
    pub root: PathBuf,
    /// Config file.
    pub config_toml: PathBuf,
    /// Optional `.env` file with secrets.
    pub env_file: PathBuf,
    /// Relay's own log directory.
    pub logs_dir: PathBuf,
}

impl RuntimePaths {
    /// Paths for a config file at `config_toml`; siblings live next to it.
    pub fn for_config(config_toml: &Path) -> Self {
        let root = config_toml
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self {
            env_file: root.join(".env"),
            logs_dir: root.join("logs"),
            config_toml: config_toml.to_path_buf(),
            root,
        }
    }
}

/// Root configuration directory: `~/.mcrelay`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn config_dir() -> anyhow::Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".mcrelay"))
}

/// Paths for the default config location.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn default_runtime_paths() -> anyhow::Result<RuntimePaths> {
    Ok(RuntimePaths::for_config(&config_dir()?.join("config.toml")))
}
