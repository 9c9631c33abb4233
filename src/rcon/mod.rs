//! RCON client: wire codec, a single connection, and a reconnecting session.
//!
//! [`RconSession`] is what the rest of the crate talks to. It serializes
//! commands behind an async mutex, reconnects on lost connections with capped
//! exponential backoff, and retries the interrupted command exactly once.

pub mod connection;
pub mod packet;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::classifier::parse_tps;
use connection::RconConnection;
use packet::{PacketError, MAX_REQUEST_PAYLOAD};

/// Perf command used when none is configured.
pub const DEFAULT_PERF_COMMAND: &str = "forge tps";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from RCON operations.
#[derive(Debug, thiserror::Error)]
pub enum RconError {
    /// No matching response within the deadline. Not retried, since the
    /// command may still have run.
    #[error("RCON command timed out after {0:?}")]
    Timeout(Duration),

    /// The connection dropped or could not be opened.
    #[error("RCON connection lost: {0}")]
    Disconnected(String),

    /// Every reconnect attempt failed.
    #[error("RCON unavailable after {attempts} connection attempts")]
    Unavailable {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// The server rejected the password.
    #[error("RCON password rejected")]
    AuthRejected,

    /// The command is over the request payload limit. Nothing was sent and
    /// the connection is kept.
    #[error("RCON command is {len} bytes, limit is {MAX_REQUEST_PAYLOAD}")]
    CommandTooLong {
        /// Command size in bytes.
        len: usize,
    },

    /// The server sent something that is not a valid RCON packet.
    #[error("RCON protocol error: {0}")]
    Protocol(#[source] PacketError),

    /// The session was closed.
    #[error("RCON session closed")]
    Closed,
}

impl From<PacketError> for RconError {
    fn from(e: PacketError) -> Self {
        match e {
            PacketError::Io(io) => Self::Disconnected(io.to_string()),
            PacketError::PayloadTooLarge { len } => Self::CommandTooLong { len },
            other => Self::Protocol(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Command sink seam
// ---------------------------------------------------------------------------

/// Anything that can run console commands on the server.
///
/// The relay depends on this trait rather than on [`RconSession`] so it can be
/// driven by an in-memory fake.
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Run one console command and return its response text.
    async fn execute(&self, command: &str) -> Result<String, RconError>;

    /// Command that prints tick statistics.
    fn perf_command(&self) -> &str {
        DEFAULT_PERF_COMMAND
    }

    /// Query the server's mean TPS. `Ok(None)` when the response could not
    /// be parsed.
    async fn query_tps(&self) -> Result<Option<f64>, RconError> {
        let response = self.execute(self.perf_command()).await?;
        Ok(parse_tps(&response))
    }

    /// Response of the `list` command, trailing colon removed.
    async fn list_players(&self) -> Result<String, RconError> {
        let response = self.execute("list").await?;
        Ok(response.trim_end().trim_end_matches(':').to_owned())
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Reconnect backoff settings.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Ceiling for the delay.
    pub max_backoff: Duration,
    /// Connection attempts per reconnect before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt + 1`, doubling per attempt up to the cap
    /// plus up to 25% random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        let base = self
            .initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff);
        let base_ms = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
        let jitter_ms = rand::thread_rng().gen_range(0..=base_ms.saturating_div(4));
        base.saturating_add(Duration::from_millis(jitter_ms))
    }
}

/// Connection settings for [`RconSession`].
#[derive(Debug, Clone)]
pub struct RconSettings {
    /// `host:port` of the RCON listener.
    pub addr: String,
    /// RCON password.
    pub password: String,
    /// Per-command response deadline, also used for connect and login.
    pub timeout: Duration,
    /// Command printing tick statistics.
    pub perf_command: String,
    /// Reconnect behaviour.
    pub policy: ReconnectPolicy,
}

/// Reconnecting, serialized RCON client.
pub struct RconSession {
    settings: RconSettings,
    conn: Mutex<Option<RconConnection>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for RconSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RconSession")
            .field("addr", &self.settings.addr)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RconSession {
    /// Create a session. No connection is opened until [`Self::connect`] or
    /// the first command.
    pub fn new(settings: RconSettings) -> Self {
        Self {
            settings,
            conn: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Address the session connects to.
    pub fn addr(&self) -> &str {
        &self.settings.addr
    }

    /// Make sure a connection is open, reconnecting under the policy.
    ///
    /// # Errors
    ///
    /// [`RconError::Unavailable`] when every attempt fails,
    /// [`RconError::AuthRejected`] on a bad password, [`RconError::Closed`]
    /// after [`Self::close`].
    pub async fn connect(&self) -> Result<(), RconError> {
        let mut guard = self.conn.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(RconError::Closed);
        }
        if guard.is_none() {
            *guard = Some(self.reconnect().await?);
        }
        Ok(())
    }

    /// Run `command`, reconnecting and retrying once if the connection drops.
    ///
    /// # Errors
    ///
    /// [`RconError::CommandTooLong`] if `command` cannot fit one request.
    /// [`RconError::Timeout`] is returned as is, with no retry.
    /// [`RconError::Disconnected`] is returned if the retry also loses the
    /// connection. Otherwise the errors are those of [`Self::connect`].
    pub async fn send(&self, command: &str) -> Result<String, RconError> {
        if command.len() > MAX_REQUEST_PAYLOAD {
            warn!(len = command.len(), "RCON command too long, not sent");
            return Err(RconError::CommandTooLong {
                len: command.len(),
            });
        }
        let mut guard = self.conn.lock().await;
        let mut retried = false;

        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(RconError::Closed);
            }
            if guard.is_none() {
                *guard = Some(self.reconnect().await?);
            }
            let Some(conn) = guard.as_mut() else {
                continue;
            };

            match conn.exec(command, self.settings.timeout).await {
                Ok(response) => {
                    debug!(command, len = response.len(), "RCON command done");
                    return Ok(response);
                }
                Err(RconError::Disconnected(reason)) => {
                    *guard = None;
                    if retried {
                        warn!(command, reason = %reason, "RCON connection lost again on retry");
                        return Err(RconError::Disconnected(reason));
                    }
                    warn!(command, reason = %reason, "RCON connection lost, reconnecting");
                    retried = true;
                }
                Err(e @ RconError::Protocol(_)) => {
                    // The stream can no longer be trusted.
                    *guard = None;
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drop the current connection without closing the session. The next
    /// command reconnects.
    pub async fn reset(&self) {
        if self.conn.lock().await.take().is_some() {
            debug!(addr = %self.settings.addr, "RCON connection reset");
        }
    }

    /// Close the session and its socket. Later commands fail with
    /// [`RconError::Closed`].
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if self.conn.lock().await.take().is_some() {
            info!(addr = %self.settings.addr, "RCON connection closed");
        }
    }

    async fn reconnect(&self) -> Result<RconConnection, RconError> {
        let policy = self.settings.policy;
        let attempts = policy.max_attempts.max(1);

        for attempt in 1..=attempts {
            match RconConnection::connect(
                &self.settings.addr,
                &self.settings.password,
                self.settings.timeout,
            )
            .await
            {
                Ok(conn) => {
                    info!(addr = %self.settings.addr, attempt, "RCON connected");
                    return Ok(conn);
                }
                Err(RconError::AuthRejected) => {
                    warn!(addr = %self.settings.addr, "RCON password rejected");
                    return Err(RconError::AuthRejected);
                }
                Err(e) => {
                    if attempt == attempts {
                        warn!(error = %e, attempt, "RCON connect failed, giving up");
                        break;
                    }
                    let delay = policy.delay(attempt);
                    warn!(
                        error = %e,
                        attempt,
                        retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "RCON connect failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Err(RconError::Unavailable { attempts })
    }
}

#[async_trait]
impl CommandSink for RconSession {
    async fn execute(&self, command: &str) -> Result<String, RconError> {
        self.send(command).await
    }

    fn perf_command(&self) -> &str {
        &self.settings.perf_command
    }
}
