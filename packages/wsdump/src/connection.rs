//! The connection handle seen by the dispatcher and the interactive loop.
//!
//! [`Connection`] is implemented by [`crate::transport::WsConnection`] for
//! real sockets and by an in-memory mock in tests.

use std::fmt;
use std::future::Future;

use crate::error::ConnectionError;

/// Frame type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// Reserved opcode value from the frame header.
    Other(u8),
}

impl Opcode {
    pub fn is_data(self) -> bool {
        matches!(self, Opcode::Text | Opcode::Binary)
    }

    /// Short symbolic name used in verbose output.
    pub fn name(self) -> String {
        match self {
            Opcode::Continuation => "cont".into(),
            Opcode::Text => "text".into(),
            Opcode::Binary => "binary".into(),
            Opcode::Close => "close".into(),
            Opcode::Ping => "ping".into(),
            Opcode::Pong => "pong".into(),
            Opcode::Other(code) => format!("reserved(0x{code:x})"),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// One decoded protocol unit.
///
/// Close payloads keep their wire layout: a big-endian status code followed
/// by a UTF-8 reason, or nothing at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            opcode,
            payload: payload.into(),
        }
    }

    pub fn text(text: &str) -> Self {
        Self::new(Opcode::Text, text.as_bytes())
    }

    pub fn close(code: Option<u16>, reason: &str) -> Self {
        let mut payload = Vec::new();
        if let Some(code) = code {
            payload.extend_from_slice(&code.to_be_bytes());
            payload.extend_from_slice(reason.as_bytes());
        }
        Self::new(Opcode::Close, payload)
    }

    /// Status code and reason of a close frame, if present.
    pub fn close_status(&self) -> Option<(u16, String)> {
        if self.opcode != Opcode::Close || self.payload.len() < 2 {
            return None;
        }
        let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
        let reason = String::from_utf8_lossy(&self.payload[2..]).into_owned();
        Some((code, reason))
    }
}

/// One open WebSocket session.
///
/// Implementations must serialize writes: `send_text` from the interactive
/// loop and `send_pong`/`send_close` from the dispatcher may run concurrently
/// and must never interleave bytes of different frames. `receive_frame` is
/// only ever called from one task at a time.
pub trait Connection: Send + Sync + 'static {
    /// Wait for the next frame. There is no built-in timeout.
    fn receive_frame(&self) -> impl Future<Output = Result<Frame, ConnectionError>> + Send;

    fn send_text(&self, payload: &str) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Reply to a ping with its payload. Called once per received ping. A
    /// transport that answers pings on its own only has to get that reply
    /// onto the wire.
    fn send_pong(
        &self,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Start or acknowledge the closing handshake. Calls after the first are
    /// no-ops.
    fn send_close(&self) -> impl Future<Output = Result<(), ConnectionError>> + Send;
}
