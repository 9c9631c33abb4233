//! Source RCON packet codec.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! i32 length   bytes that follow this field
//! i32 id       request id, echoed by the server (-1 on auth failure)
//! i32 type     3 auth, 2 exec command / auth response, 0 response value
//! [u8] payload
//! u8 0, u8 0   terminators
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Packet type: login request.
pub const TYPE_AUTH: i32 = 3;
/// Packet type: command request. Also the type of the auth response.
pub const TYPE_EXEC: i32 = 2;
/// Packet type: auth response.
pub const TYPE_AUTH_RESPONSE: i32 = 2;
/// Packet type: command response value.
pub const TYPE_RESPONSE: i32 = 0;

/// Request id the server answers with when authentication fails.
pub const AUTH_FAILED_ID: i32 = -1;

/// Largest payload the server accepts in a request.
pub const MAX_REQUEST_PAYLOAD: usize = 1446;
/// Largest response packet, length field included.
pub const MAX_RESPONSE_PACKET: usize = 4110;

/// Bytes of id + type + two terminators counted by the length field.
const BODY_OVERHEAD: usize = 10;
/// Size of the length field itself.
const LENGTH_FIELD: usize = 4;

/// Malformed or oversized packet.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    /// Request payload over [`MAX_REQUEST_PAYLOAD`].
    #[error("request payload is {len} bytes, limit is {MAX_REQUEST_PAYLOAD}")]
    PayloadTooLarge {
        /// Payload size.
        len: usize,
    },
    /// Length field outside the valid range.
    #[error("invalid packet length {0}")]
    BadLength(i32),
    /// Packet body did not end with two NUL bytes.
    #[error("packet is missing its NUL terminators")]
    MissingTerminator,
    /// Socket error while reading or writing a packet.
    #[error("packet I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One RCON packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Request id.
    pub id: i32,
    /// Packet type, one of the `TYPE_*` constants.
    pub kind: i32,
    /// Payload without terminators.
    pub payload: Vec<u8>,
}

impl Packet {
    /// Login packet carrying the password.
    pub fn auth(id: i32, password: &str) -> Self {
        Self {
            id,
            kind: TYPE_AUTH,
            payload: password.as_bytes().to_vec(),
        }
    }

    /// Command packet.
    pub fn exec(id: i32, command: &str) -> Self {
        Self {
            id,
            kind: TYPE_EXEC,
            payload: command.as_bytes().to_vec(),
        }
    }

    /// Payload as text, invalid UTF-8 replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Serialize into wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PacketError::PayloadTooLarge`] if the payload exceeds
    /// [`MAX_REQUEST_PAYLOAD`].
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let len = self.payload.len();
        if len > MAX_REQUEST_PAYLOAD {
            return Err(PacketError::PayloadTooLarge { len });
        }
        let body_len = len.saturating_add(BODY_OVERHEAD);
        let length_field =
            i32::try_from(body_len).map_err(|_| PacketError::PayloadTooLarge { len })?;

        let mut buf = Vec::with_capacity(body_len.saturating_add(LENGTH_FIELD));
        buf.extend_from_slice(&length_field.to_le_bytes());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.kind.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf.extend_from_slice(&[0, 0]);
        Ok(buf)
    }

    /// Parse a packet body (everything after the length field).
    ///
    /// # Errors
    ///
    /// Returns an error if the body is too short or lacks its terminators.
    pub fn decode_body(body: &[u8]) -> Result<Self, PacketError> {
        let mut off = 0;
        let id = read_i32_le(body, &mut off)?;
        let kind = read_i32_le(body, &mut off)?;
        let rest = body.get(off..).unwrap_or_default();
        let payload = rest
            .strip_suffix(&[0, 0])
            .ok_or(PacketError::MissingTerminator)?;
        Ok(Self {
            id,
            kind,
            payload: payload.to_vec(),
        })
    }

    /// Write this packet to `writer`.
    ///
    /// # Errors
    ///
    /// Returns an error on oversized payloads or socket failures.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<(), PacketError>
    where
        W: AsyncWrite + Unpin,
    {
        let bytes = self.encode()?;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one packet from `reader`.
    ///
    /// # Errors
    ///
    /// Returns [`PacketError::Io`] with `UnexpectedEof` when the peer closes
    /// the connection, or a protocol error for malformed packets.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self, PacketError>
    where
        R: AsyncRead + Unpin,
    {
        let mut len_buf = [0u8; LENGTH_FIELD];
        reader.read_exact(&mut len_buf).await?;
        let length = i32::from_le_bytes(len_buf);

        let body_len = usize::try_from(length).map_err(|_| PacketError::BadLength(length))?;
        let max_body = MAX_RESPONSE_PACKET.saturating_sub(LENGTH_FIELD);
        if !(BODY_OVERHEAD..=max_body).contains(&body_len) {
            return Err(PacketError::BadLength(length));
        }

        let mut body = vec![0u8; body_len];
        reader.read_exact(&mut body).await?;
        Self::decode_body(&body)
    }
}

fn read_i32_le(b: &[u8], off: &mut usize) -> Result<i32, PacketError> {
    let end = off.checked_add(4).ok_or(PacketError::BadLength(-1))?;
    let bytes: [u8; 4] = b
        .get(*off..end)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| PacketError::BadLength(i32::try_from(b.len()).unwrap_or(i32::MAX)))?;
    *off = end;
    Ok(i32::from_le_bytes(bytes))
}
