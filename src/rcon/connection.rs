//! A single authenticated RCON TCP connection.
//!
//! Packets are read by a dedicated task so a command timing out never leaves
//! a half-read packet on the socket; late responses stay framed and are
//! dropped by request id on the next command.

use std::time::Duration;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::packet::{Packet, PacketError, AUTH_FAILED_ID, TYPE_AUTH_RESPONSE};
use super::RconError;

/// Packets buffered between the reader task and the caller.
const READ_BUFFER: usize = 16;

/// Authenticated connection. Dropping it closes the socket.
#[derive(Debug)]
pub struct RconConnection {
    writer: OwnedWriteHalf,
    packets: mpsc::Receiver<Result<Packet, PacketError>>,
    reader: JoinHandle<()>,
    next_id: i32,
}

impl RconConnection {
    /// Open a TCP connection to `addr` and log in with `password`.
    ///
    /// # Errors
    ///
    /// [`RconError::Disconnected`] if the socket cannot be opened or drops
    /// during login, [`RconError::AuthRejected`] if the password is wrong and
    /// [`RconError::Timeout`] if the server does not answer in time.
    pub async fn connect(addr: &str, password: &str, timeout: Duration) -> Result<Self, RconError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RconError::Timeout(timeout))?
            .map_err(|e| RconError::Disconnected(format!("connect to {addr}: {e}")))?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }

        let (mut read_half, writer) = stream.into_split();
        let (tx, packets) = mpsc::channel(READ_BUFFER);
        let reader = tokio::spawn(async move {
            loop {
                let result = Packet::read_from(&mut read_half).await;
                let failed = result.is_err();
                if tx.send(result).await.is_err() || failed {
                    break;
                }
            }
        });

        let mut conn = Self {
            writer,
            packets,
            reader,
            next_id: 1,
        };

        let auth_id = conn.allocate_id();
        Packet::auth(auth_id, password)
            .write_to(&mut conn.writer)
            .await
            .map_err(RconError::from)?;

        let id = tokio::time::timeout(timeout, async {
            loop {
                let packet = conn.recv().await?;
                // Some servers send an empty response value before the auth
                // response; only the auth response decides.
                if packet.kind == TYPE_AUTH_RESPONSE {
                    return Ok::<i32, RconError>(packet.id);
                }
            }
        })
        .await
        .map_err(|_| RconError::Timeout(timeout))??;

        if id == AUTH_FAILED_ID || id != auth_id {
            return Err(RconError::AuthRejected);
        }
        Ok(conn)
    }

    /// Run `command` and return the response text.
    ///
    /// Responses carrying any other request id are stale answers to earlier
    /// timed-out commands and are discarded.
    ///
    /// # Errors
    ///
    /// [`RconError::Timeout`] if no matching response arrives within
    /// `timeout` (the connection stays usable), [`RconError::Disconnected`] on
    /// socket failure and [`RconError::Protocol`] for malformed packets.
    pub async fn exec(&mut self, command: &str, timeout: Duration) -> Result<String, RconError> {
        let id = self.allocate_id();
        Packet::exec(id, command)
            .write_to(&mut self.writer)
            .await
            .map_err(RconError::from)?;

        tokio::time::timeout(timeout, async {
            loop {
                let packet = self.recv().await?;
                if packet.id == id {
                    return Ok(packet.text());
                }
                debug!(expected = id, got = packet.id, "discarding stale RCON response");
            }
        })
        .await
        .map_err(|_| RconError::Timeout(timeout))?
    }

    async fn recv(&mut self) -> Result<Packet, RconError> {
        match self.packets.recv().await {
            Some(result) => result.map_err(RconError::from),
            None => Err(RconError::Disconnected("reader stopped".to_owned())),
        }
    }

    /// Next request id, always positive so it never collides with the
    /// auth-failure marker.
    fn allocate_id(&mut self) -> i32 {
        let id = self.next_id;
        self.next_id = self.next_id.checked_add(1).unwrap_or(1);
        id
    }
}

impl Drop for RconConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
